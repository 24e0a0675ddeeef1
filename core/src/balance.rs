//! Balance projector: read and reconcile the cached balances.
//!
//! RULE: never writes the ledger. The only write allowed here is
//! rebuilding a stale cache from the ledger sum.

use crate::{
    error::{EngineError, EngineResult},
    locks::{KeyedLocks, LockKey},
    store::SettlementStore,
    types::{LedgerKind, MemberId},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub member_id: MemberId,
    pub kind: LedgerKind,
    pub cached: Decimal,
    pub ledger_sum: Decimal,
}

impl Reconciliation {
    pub fn matches(&self) -> bool {
        self.cached == self.ledger_sum
    }
}

pub struct BalanceProjector<'a> {
    store: &'a SettlementStore,
    locks: &'a KeyedLocks<LockKey>,
}

impl<'a> BalanceProjector<'a> {
    pub fn new(store: &'a SettlementStore, locks: &'a KeyedLocks<LockKey>) -> Self {
        Self { store, locks }
    }

    fn require_member(&self, member_id: &str) -> EngineResult<()> {
        if self.store.member_exists(member_id)? {
            Ok(())
        } else {
            Err(EngineError::UnknownMember {
                member_id: member_id.to_string(),
            })
        }
    }

    pub fn current_balance(&self, member_id: &str, kind: LedgerKind) -> EngineResult<Decimal> {
        self.require_member(member_id)?;
        self.store.cached_balance(member_id, kind)
    }

    /// Compare the cache against the ledger. Holds the balance lock so an
    /// in-flight post cannot be seen half-applied.
    pub fn reconcile(&self, member_id: &str, kind: LedgerKind) -> EngineResult<Reconciliation> {
        self.require_member(member_id)?;
        let key = LockKey::Balance(member_id.to_string(), kind);
        self.locks.with_locked(&[key], || {
            Ok(Reconciliation {
                member_id: member_id.to_string(),
                kind,
                cached: self.store.cached_balance(member_id, kind)?,
                ledger_sum: self.store.ledger_sum(member_id, kind)?,
            })
        })
    }

    /// Rebuild a stale cache from the ledger. Returns the state before repair.
    pub fn repair(&self, member_id: &str, kind: LedgerKind) -> EngineResult<Reconciliation> {
        self.require_member(member_id)?;
        let key = LockKey::Balance(member_id.to_string(), kind);
        self.locks.with_locked(&[key], || {
            let (cached, ledger_sum) = self.store.rebuild_balance(member_id, kind)?;
            if cached != ledger_sum {
                log::warn!("repaired {member_id}/{kind} balance cache: {cached} -> {ledger_sum}");
            }
            Ok(Reconciliation {
                member_id: member_id.to_string(),
                kind,
                cached,
                ledger_sum,
            })
        })
    }

    /// Reconcile every balance on record; returns only the mismatches.
    pub fn audit(&self) -> EngineResult<Vec<Reconciliation>> {
        let mut mismatches = Vec::new();
        for (member_id, kind) in self.store.balance_keys()? {
            let rec = self.reconcile(&member_id, kind)?;
            if !rec.matches() {
                log::warn!(
                    "balance mismatch {member_id}/{kind}: cached {} ledger {}",
                    rec.cached,
                    rec.ledger_sum
                );
                mismatches.push(rec);
            }
        }
        Ok(mismatches)
    }
}

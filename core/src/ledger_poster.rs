//! Ledger poster: the only component that appends ledger rows or moves a
//! cached balance.
//!
//! RULES:
//!   - A post commits its rows and balance updates together or not at all.
//!   - Same idempotency key + same parameters = silent no-op.
//!     Same key + different parameters = ConflictingReplay.
//!   - Posts touching a (member, kind) balance hold that balance's lock.
//!   - Only debit paths (withdraw, move_to_wallet, cash_out, transfer) may
//!     reduce a balance, and only when funds exist.

use crate::{
    error::{EngineError, EngineResult},
    ledger::{idempotency_key, Nature, PostOutcome, PostRequest},
    locks::{KeyedLocks, LockKey},
    money::round_money,
    store::SettlementStore,
    types::{ActorId, Direction, LedgerKind, MemberId},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A member-initiated movement of funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsRequest {
    /// Caller-supplied id; retries must reuse it.
    pub request_id: String,
    pub member_id: MemberId,
    pub amount: Decimal,
    pub actor_id: ActorId,
}

pub struct LedgerPoster<'a> {
    store: &'a SettlementStore,
    locks: &'a KeyedLocks<LockKey>,
}

impl<'a> LedgerPoster<'a> {
    pub fn new(store: &'a SettlementStore, locks: &'a KeyedLocks<LockKey>) -> Self {
        Self { store, locks }
    }

    /// Post a single leg.
    pub fn post(&self, request: &PostRequest) -> EngineResult<PostOutcome> {
        let mut outcomes = self.post_all(std::slice::from_ref(request))?;
        outcomes
            .pop()
            .ok_or_else(|| anyhow::anyhow!("store returned no outcome for {}", request.idempotency_key).into())
    }

    /// Post several legs as one atomic unit.
    pub fn post_all(&self, legs: &[PostRequest]) -> EngineResult<Vec<PostOutcome>> {
        let legs = legs
            .iter()
            .map(Self::normalise)
            .collect::<EngineResult<Vec<_>>>()?;
        let keys: Vec<LockKey> = legs
            .iter()
            .map(|l| LockKey::Balance(l.recipient.clone(), l.kind))
            .collect();

        let outcomes = self
            .locks
            .with_locked(&keys, || self.store.commit_postings(&legs))?;

        for outcome in &outcomes {
            match outcome {
                PostOutcome::Posted {
                    entry_id,
                    member_id,
                    kind,
                    balance_after,
                } => log::debug!("posted #{entry_id} to {member_id}/{kind}, balance {balance_after}"),
                PostOutcome::Replayed { entry_id, member_id } => {
                    log::debug!("replay of #{entry_id} for {member_id} suppressed")
                }
            }
        }
        Ok(outcomes)
    }

    fn normalise(leg: &PostRequest) -> EngineResult<PostRequest> {
        let amount = round_money(leg.amount);
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount { amount: leg.amount });
        }
        if leg.nature.is_commission() && leg.direction == Direction::Debit {
            return Err(EngineError::InvalidRequest {
                reason: format!("commission posting {} must be a credit", leg.idempotency_key),
            });
        }
        Ok(PostRequest {
            amount,
            ..leg.clone()
        })
    }

    // ── Debit paths ───────────────────────────────────────────────

    fn leg(
        request: &FundsRequest,
        member_id: &str,
        kind: LedgerKind,
        direction: Direction,
        nature: Nature,
        counterpart_id: Option<&str>,
    ) -> PostRequest {
        PostRequest {
            recipient: member_id.to_string(),
            kind,
            amount: request.amount,
            direction,
            nature,
            source_ref: request.request_id.clone(),
            counterpart_id: counterpart_id.map(str::to_string),
            idempotency_key: idempotency_key(&request.request_id, member_id, nature),
            actor_id: request.actor_id.clone(),
        }
    }

    /// Pay out of the earning balance.
    pub fn withdraw(&self, request: &FundsRequest) -> EngineResult<PostOutcome> {
        let leg = Self::leg(
            request,
            &request.member_id,
            LedgerKind::Earning,
            Direction::Debit,
            Nature::Withdrawal,
            None,
        );
        self.post(&leg)
    }

    /// Move earnings into the member's spendable wallet.
    pub fn move_to_wallet(&self, request: &FundsRequest) -> EngineResult<Vec<PostOutcome>> {
        let m = request.member_id.as_str();
        self.post_all(&[
            Self::leg(request, m, LedgerKind::Earning, Direction::Debit, Nature::WalletMove, None)
                .with_kind_suffix(),
            Self::leg(request, m, LedgerKind::Wallet, Direction::Credit, Nature::WalletMove, None)
                .with_kind_suffix(),
        ])
    }

    /// Convert wallet funds into the cash wallet.
    pub fn cash_out(&self, request: &FundsRequest) -> EngineResult<Vec<PostOutcome>> {
        let m = request.member_id.as_str();
        self.post_all(&[
            Self::leg(request, m, LedgerKind::Wallet, Direction::Debit, Nature::CashOut, None)
                .with_kind_suffix(),
            Self::leg(request, m, LedgerKind::Cash, Direction::Credit, Nature::CashOut, None)
                .with_kind_suffix(),
        ])
    }

    /// Wallet-to-wallet transfer between two members.
    pub fn transfer(&self, request: &FundsRequest, to: &str) -> EngineResult<Vec<PostOutcome>> {
        let from = request.member_id.as_str();
        if from == to {
            return Err(EngineError::InvalidRequest {
                reason: format!("transfer {} sends {from} funds to itself", request.request_id),
            });
        }
        self.post_all(&[
            Self::leg(request, from, LedgerKind::Wallet, Direction::Debit, Nature::Transfer, Some(to)),
            Self::leg(request, to, LedgerKind::Wallet, Direction::Credit, Nature::Transfer, Some(from)),
        ])
    }
}

//! Read-only query surface for the presentation and reporting layers.

use crate::{
    ancestry::AncestryResolver,
    badge::{BadgeStatus, Tier},
    badge_evaluator::BadgeEvaluator,
    balance::BalanceProjector,
    config::EngineConfig,
    error::{EngineError, EngineResult},
    ledger::LedgerEntry,
    locks::{KeyedLocks, LockKey},
    store::{LedgerPageQuery, SettlementMarker, SettlementStore},
    types::{EntryId, LedgerKind, MemberId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Half-open `[from, to)` window on entry timestamps. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    /// Pass back as `after` to fetch the next page. None on the last page.
    pub next_cursor: Option<EntryId>,
}

pub struct EngineQueries<'a> {
    store: &'a SettlementStore,
    locks: &'a KeyedLocks<LockKey>,
    config: &'a EngineConfig,
}

impl<'a> EngineQueries<'a> {
    pub fn new(
        store: &'a SettlementStore,
        locks: &'a KeyedLocks<LockKey>,
        config: &'a EngineConfig,
    ) -> Self {
        Self { store, locks, config }
    }

    pub fn get_balance(&self, member_id: &str, kind: LedgerKind) -> EngineResult<Decimal> {
        BalanceProjector::new(self.store, self.locks).current_balance(member_id, kind)
    }

    /// One page of entries, oldest first, ties broken by entry id.
    pub fn list_ledger_entries(
        &self,
        member_id: &str,
        kind: LedgerKind,
        range: DateRange,
        after: Option<EntryId>,
    ) -> EngineResult<LedgerPage> {
        if !self.store.member_exists(member_id)? {
            return Err(EngineError::UnknownMember {
                member_id: member_id.to_string(),
            });
        }
        let limit = self.config.ledger_page_size.max(1);
        // Fetch one extra row to learn whether another page exists.
        let mut entries = self.store.ledger_page(&LedgerPageQuery {
            member_id: member_id.to_string(),
            kind,
            from: range.from,
            to: range.to,
            after_id: after,
            limit: limit + 1,
        })?;
        let has_more = entries.len() > limit;
        entries.truncate(limit);
        let next_cursor = if has_more {
            entries.last().map(|e| e.entry_id)
        } else {
            None
        };
        Ok(LedgerPage { entries, next_cursor })
    }

    /// Walk every matching entry page by page.
    pub fn ledger_cursor(
        &self,
        member_id: &str,
        kind: LedgerKind,
        range: DateRange,
    ) -> LedgerCursor<'_, 'a> {
        LedgerCursor {
            queries: self,
            member_id: member_id.to_string(),
            kind,
            range,
            after: None,
            buffer: Vec::new().into_iter(),
            done: false,
        }
    }

    pub fn badge_status(&self, member_id: &str) -> EngineResult<Vec<BadgeStatus>> {
        if !self.store.member_exists(member_id)? {
            return Err(EngineError::MemberNotFound {
                member_id: member_id.to_string(),
            });
        }
        self.store.badge_statuses(member_id)
    }

    /// Tier holders computed from the live graph and badge state. The
    /// `upline_rank` row saved at settlement is the snapshot that order used.
    pub fn upline_chain(&self, member_id: &str) -> EngineResult<Vec<(Tier, Option<MemberId>)>> {
        let chain = AncestryResolver::new(self.store, self.config.max_depth).resolve(member_id)?;
        let policy = self.config.cascade_policy();
        let rank = BadgeEvaluator::new(self.store, self.locks, self.config, policy.as_ref())
            .rank_upline(&chain)?;
        Ok(rank.entries())
    }

    pub fn settlement_status(&self, order_id: &str) -> EngineResult<Option<SettlementMarker>> {
        self.store.settlement_marker(order_id)
    }
}

/// Restartable iterator over a member's ledger. Each page is a fresh query,
/// so rows appended while iterating show up on later pages.
pub struct LedgerCursor<'q, 'a> {
    queries: &'q EngineQueries<'a>,
    member_id: MemberId,
    kind: LedgerKind,
    range: DateRange,
    after: Option<EntryId>,
    buffer: std::vec::IntoIter<LedgerEntry>,
    done: bool,
}

impl LedgerCursor<'_, '_> {
    /// Position to resume from after a restart.
    pub fn position(&self) -> Option<EntryId> {
        self.after
    }
}

impl Iterator for LedgerCursor<'_, '_> {
    type Item = EngineResult<LedgerEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.next() {
                self.after = Some(entry.entry_id);
                return Some(Ok(entry));
            }
            if self.done {
                return None;
            }
            match self
                .queries
                .list_ledger_entries(&self.member_id, self.kind, self.range, self.after)
            {
                Ok(page) => {
                    self.done = page.next_cursor.is_none();
                    if page.entries.is_empty() {
                        return None;
                    }
                    self.buffer = page.entries.into_iter();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

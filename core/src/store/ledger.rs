use super::{millis_to_datetime, now_millis, parse_col, SettlementStore};
use crate::{
    error::{EngineError, EngineResult},
    ledger::{LedgerEntry, Nature, PostOutcome, PostRequest},
    money::{from_cents, to_cents},
    types::{Direction, EntryId, LedgerKind, MemberId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

/// Filter for one page of a member's ledger.
#[derive(Debug, Clone)]
pub struct LedgerPageQuery {
    pub member_id: MemberId,
    pub kind: LedgerKind,
    /// Inclusive lower bound on created_at.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on created_at.
    pub to: Option<DateTime<Utc>>,
    /// Resume after this entry id.
    pub after_id: Option<EntryId>,
    pub limit: usize,
}

/// What is stored for an idempotency key, for replay comparison.
struct StoredLeg {
    entry_id: EntryId,
    member_id: MemberId,
    kind: String,
    amount_cents: i64,
    direction: String,
    nature: String,
    source_ref: String,
    counterpart_id: Option<MemberId>,
}

impl StoredLeg {
    fn matches(&self, leg: &PostRequest, cents: i64) -> bool {
        self.member_id == leg.recipient
            && self.kind == leg.kind.as_str()
            && self.amount_cents == cents
            && self.direction == leg.direction.as_str()
            && self.nature == leg.nature.to_string()
            && self.source_ref == leg.source_ref
            && self.counterpart_id == leg.counterpart_id
    }
}

const ENTRY_COLUMNS: &str = "entry_id, member_id, kind, counterpart_id, source_ref, amount_cents,
     direction, nature, idempotency_key, actor_id, created_at";

impl SettlementStore {
    // ── Posting ───────────────────────────────────────────────────

    /// Append every leg and move the cached balances, in one write
    /// transaction. Any error rolls the whole batch back.
    ///
    /// A leg whose idempotency key is already on the ledger with the same
    /// parameters is skipped; with different parameters the batch fails
    /// with ConflictingReplay.
    pub(crate) fn commit_postings(&self, legs: &[PostRequest]) -> EngineResult<Vec<PostOutcome>> {
        let tx = self.immediate()?;
        let now = now_millis();
        let mut outcomes = Vec::with_capacity(legs.len());

        for leg in legs {
            let cents = to_cents(leg.amount)
                .filter(|c| *c > 0)
                .ok_or(EngineError::InvalidAmount { amount: leg.amount })?;

            if let Some(stored) = Self::leg_by_key(&tx, &leg.idempotency_key)? {
                if !stored.matches(leg, cents) {
                    return Err(EngineError::ConflictingReplay {
                        key: leg.idempotency_key.clone(),
                    });
                }
                outcomes.push(PostOutcome::Replayed {
                    entry_id: stored.entry_id,
                    member_id: stored.member_id,
                });
                continue;
            }

            let known: i64 = tx.query_row(
                "SELECT COUNT(*) FROM member WHERE member_id = ?1",
                params![leg.recipient],
                |row| row.get(0),
            )?;
            if known == 0 {
                return Err(EngineError::UnknownMember {
                    member_id: leg.recipient.clone(),
                });
            }

            let balance = Self::balance_cents_on(&tx, &leg.recipient, leg.kind)?;
            let next = match leg.direction {
                Direction::Credit => balance.checked_add(cents),
                Direction::Debit => balance.checked_sub(cents),
            }
            .ok_or(EngineError::InvalidAmount { amount: leg.amount })?;
            if leg.direction == Direction::Debit && next < 0 {
                return Err(EngineError::InsufficientFunds {
                    member_id: leg.recipient.clone(),
                    kind: leg.kind,
                    balance: from_cents(balance),
                    requested: leg.amount,
                });
            }

            tx.execute(
                "INSERT INTO ledger_entry
                 (member_id, kind, counterpart_id, source_ref, amount_cents,
                  direction, nature, idempotency_key, actor_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    leg.recipient,
                    leg.kind.as_str(),
                    leg.counterpart_id,
                    leg.source_ref,
                    cents,
                    leg.direction.as_str(),
                    leg.nature.to_string(),
                    leg.idempotency_key,
                    leg.actor_id,
                    now,
                ],
            )?;
            let entry_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO balance (member_id, kind, amount_cents, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (member_id, kind) DO UPDATE SET
                    amount_cents = excluded.amount_cents,
                    updated_at   = excluded.updated_at",
                params![leg.recipient, leg.kind.as_str(), next, now],
            )?;

            outcomes.push(PostOutcome::Posted {
                entry_id,
                member_id: leg.recipient.clone(),
                kind: leg.kind,
                balance_after: from_cents(next),
            });
        }

        tx.commit()?;
        Ok(outcomes)
    }

    fn leg_by_key(conn: &Connection, key: &str) -> EngineResult<Option<StoredLeg>> {
        let stored = conn
            .query_row(
                "SELECT entry_id, member_id, kind, amount_cents, direction, nature,
                        source_ref, counterpart_id
                 FROM ledger_entry WHERE idempotency_key = ?1",
                params![key],
                |row| {
                    Ok(StoredLeg {
                        entry_id: row.get(0)?,
                        member_id: row.get(1)?,
                        kind: row.get(2)?,
                        amount_cents: row.get(3)?,
                        direction: row.get(4)?,
                        nature: row.get(5)?,
                        source_ref: row.get(6)?,
                        counterpart_id: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(stored)
    }

    fn balance_cents_on(conn: &Connection, member_id: &str, kind: LedgerKind) -> EngineResult<i64> {
        let cents = conn
            .query_row(
                "SELECT amount_cents FROM balance WHERE member_id = ?1 AND kind = ?2",
                params![member_id, kind.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .unwrap_or(0);
        Ok(cents)
    }

    // ── Balance cache ─────────────────────────────────────────────

    /// Cached balance; zero when the member has never been posted to.
    pub fn cached_balance(&self, member_id: &str, kind: LedgerKind) -> EngineResult<Decimal> {
        Ok(from_cents(Self::balance_cents_on(&self.conn, member_id, kind)?))
    }

    /// credits - debits, straight from the ledger.
    pub fn ledger_sum(&self, member_id: &str, kind: LedgerKind) -> EngineResult<Decimal> {
        let cents: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(CASE direction WHEN 'credit' THEN amount_cents
                                                ELSE -amount_cents END), 0)
             FROM ledger_entry WHERE member_id = ?1 AND kind = ?2",
            params![member_id, kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(from_cents(cents))
    }

    /// Rewrite the cache from the ledger sum inside one write transaction.
    /// Returns the (previous, corrected) values.
    pub(crate) fn rebuild_balance(
        &self,
        member_id: &str,
        kind: LedgerKind,
    ) -> EngineResult<(Decimal, Decimal)> {
        let tx = self.immediate()?;
        let previous = Self::balance_cents_on(&tx, member_id, kind)?;
        let sum: i64 = tx.query_row(
            "SELECT COALESCE(SUM(CASE direction WHEN 'credit' THEN amount_cents
                                                ELSE -amount_cents END), 0)
             FROM ledger_entry WHERE member_id = ?1 AND kind = ?2",
            params![member_id, kind.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO balance (member_id, kind, amount_cents, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (member_id, kind) DO UPDATE SET
                amount_cents = excluded.amount_cents,
                updated_at   = excluded.updated_at",
            params![member_id, kind.as_str(), sum, now_millis()],
        )?;
        tx.commit()?;
        Ok((from_cents(previous), from_cents(sum)))
    }

    /// Every (member, kind) pair that has a cached balance or a ledger row.
    pub fn balance_keys(&self) -> EngineResult<Vec<(MemberId, LedgerKind)>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id, kind FROM balance
             UNION
             SELECT DISTINCT member_id, kind FROM ledger_entry
             ORDER BY 1, 2",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let kind: String = row.get(1)?;
                Ok((row.get::<_, String>(0)?, parse_col(1, &kind, LedgerKind::parse)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Ledger reads ──────────────────────────────────────────────

    /// One page of a member's ledger in entry-id order.
    pub fn ledger_page(&self, q: &LedgerPageQuery) -> EngineResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entry
             WHERE member_id = ?1 AND kind = ?2
               AND entry_id > ?3
               AND created_at >= ?4 AND created_at < ?5
             ORDER BY entry_id ASC
             LIMIT ?6"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    q.member_id,
                    q.kind.as_str(),
                    q.after_id.unwrap_or(0),
                    q.from.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN),
                    q.to.map(|t| t.timestamp_millis()).unwrap_or(i64::MAX),
                    q.limit as i64,
                ],
                Self::map_entry_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All rows posted against a source reference (order or request id).
    pub fn entries_for_source(&self, source_ref: &str) -> EngineResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entry
             WHERE source_ref = ?1 ORDER BY entry_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![source_ref], Self::map_entry_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn ledger_entry_count(&self) -> EngineResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM ledger_entry", [], |row| row.get(0))?;
        Ok(count)
    }

    fn map_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
        let kind: String = row.get(2)?;
        let direction: String = row.get(6)?;
        let nature: String = row.get(7)?;
        Ok(LedgerEntry {
            entry_id: row.get(0)?,
            member_id: row.get(1)?,
            kind: parse_col(2, &kind, LedgerKind::parse)?,
            counterpart_id: row.get(3)?,
            source_ref: row.get(4)?,
            amount: from_cents(row.get(5)?),
            direction: parse_col(6, &direction, Direction::parse)?,
            nature: parse_col(7, &nature, Nature::parse)?,
            idempotency_key: row.get(8)?,
            actor_id: row.get(9)?,
            created_at: millis_to_datetime(row.get(10)?),
        })
    }
}

impl SettlementStore {
    // ── Test helpers ──────────────────────────────────────────────

    /// Overwrite a cached balance without touching the ledger. Exists so
    /// audits and repairs can be exercised against a deliberately stale cache.
    #[doc(hidden)]
    pub fn force_cached_balance(
        &self,
        member_id: &str,
        kind: LedgerKind,
        amount: Decimal,
    ) -> EngineResult<()> {
        let cents = to_cents(amount).ok_or(EngineError::InvalidAmount { amount })?;
        self.conn.execute(
            "INSERT INTO balance (member_id, kind, amount_cents, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (member_id, kind) DO UPDATE SET amount_cents = excluded.amount_cents",
            params![member_id, kind.as_str(), cents, now_millis()],
        )?;
        Ok(())
    }
}

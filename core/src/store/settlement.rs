use super::{millis_to_datetime, now_millis, parse_col, MarkerStatus, SettlementMarker, SettlementStore};
use crate::{commission::CommissionLine, error::EngineResult, event::SettlementLogEntry};
use rusqlite::{params, OptionalExtension};

impl SettlementStore {
    // ── Settlement marker ─────────────────────────────────────────

    pub fn settlement_marker(&self, order_id: &str) -> EngineResult<Option<SettlementMarker>> {
        let marker = self
            .conn
            .query_row(
                "SELECT order_id, status, attempts, last_error, settled_at
                 FROM order_settlement WHERE order_id = ?1",
                params![order_id],
                |row| {
                    let status: String = row.get(1)?;
                    Ok(SettlementMarker {
                        order_id: row.get(0)?,
                        status: parse_col(1, &status, MarkerStatus::parse)?,
                        attempts: row.get::<_, i64>(2)? as u32,
                        last_error: row.get(3)?,
                        settled_at: row.get::<_, Option<i64>>(4)?.map(millis_to_datetime),
                    })
                },
            )
            .optional()?;
        Ok(marker)
    }

    /// Open (or reopen) the marker as pending and bump the attempt counter.
    /// Never touches a settled marker. Returns the attempt number.
    pub fn begin_settlement_attempt(&self, order_id: &str) -> EngineResult<u32> {
        self.conn.execute(
            "INSERT INTO order_settlement (order_id, status, attempts, updated_at)
             VALUES (?1, 'pending', 1, ?2)
             ON CONFLICT (order_id) DO UPDATE SET
                status     = 'pending',
                attempts   = attempts + 1,
                updated_at = excluded.updated_at
             WHERE status != 'settled'",
            params![order_id, now_millis()],
        )?;
        let attempts: i64 = self.conn.query_row(
            "SELECT attempts FROM order_settlement WHERE order_id = ?1",
            params![order_id],
            |row| row.get(0),
        )?;
        Ok(attempts as u32)
    }

    pub fn mark_settled(&self, order_id: &str) -> EngineResult<()> {
        let now = now_millis();
        self.conn.execute(
            "UPDATE order_settlement
             SET status = 'settled', last_error = NULL, settled_at = ?2, updated_at = ?2
             WHERE order_id = ?1",
            params![order_id, now],
        )?;
        Ok(())
    }

    /// Record a failed attempt. The marker stays unsettled so redelivery retries.
    pub fn mark_failed(&self, order_id: &str, reason: &str) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE order_settlement
             SET status = 'failed', last_error = ?2, updated_at = ?3
             WHERE order_id = ?1 AND status != 'settled'",
            params![order_id, reason, now_millis()],
        )?;
        Ok(())
    }

    pub fn settled_order_count(&self) -> EngineResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM order_settlement WHERE status = 'settled'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Pinned commission lines ───────────────────────────────────

    /// Fix `lines` as the commission lines of `order_id`, unless an earlier
    /// attempt already did. Returns the lines that stand and whether they
    /// came from an earlier attempt.
    pub fn pin_commission_lines(
        &self,
        order_id: &str,
        attempt_id: &str,
        lines: &[CommissionLine],
    ) -> EngineResult<(Vec<CommissionLine>, bool)> {
        let payload = serde_json::to_string(lines)?;
        let inserted = self.conn.execute(
            "INSERT INTO settlement_lines (order_id, attempt_id, lines, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (order_id) DO NOTHING",
            params![order_id, attempt_id, payload, now_millis()],
        )?;
        if inserted == 1 {
            return Ok((lines.to_vec(), false));
        }
        let stored = self
            .pinned_commission_lines(order_id)?
            .unwrap_or_default();
        Ok((stored, true))
    }

    pub fn pinned_commission_lines(&self, order_id: &str) -> EngineResult<Option<Vec<CommissionLine>>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT lines FROM settlement_lines WHERE order_id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match payload {
            Some(p) => Some(serde_json::from_str(&p)?),
            None => None,
        })
    }

    // ── Settlement event log ──────────────────────────────────────

    pub fn append_settlement_event(&self, entry: &SettlementLogEntry) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO settlement_event (order_id, attempt_id, state, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.order_id,
                entry.attempt_id,
                entry.state,
                entry.payload,
                now_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn settlement_events(&self, order_id: &str) -> EngineResult<Vec<SettlementLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, order_id, attempt_id, state, payload
             FROM settlement_event WHERE order_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![order_id], |row| {
                Ok(SettlementLogEntry {
                    id: Some(row.get(0)?),
                    order_id: row.get(1)?,
                    attempt_id: row.get(2)?,
                    state: row.get(3)?,
                    payload: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

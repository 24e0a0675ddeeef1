use super::{now_millis, SettlementStore};
use crate::{
    badge::{BadgeStatus, BadgeTier},
    error::EngineResult,
    types::{MemberId, OrderId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

/// Result of one badge-list append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadgeAppend {
    /// False when the referred member was already on the list.
    pub appended: bool,
    /// List length after the append.
    pub count: u32,
}

impl SettlementStore {
    // ── Badge lists ───────────────────────────────────────────────

    /// Append `referred_id` to the member's list for `tier`. Idempotent: a
    /// second append of the same id changes nothing.
    pub fn append_badge_referral(
        &self,
        member_id: &str,
        tier: BadgeTier,
        referred_id: &str,
        order_id: &str,
        at: DateTime<Utc>,
    ) -> EngineResult<BadgeAppend> {
        let tx = self.immediate()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO badge_referral
             (member_id, tier, referred_id, seq, order_id, added_at)
             VALUES (?1, ?2, ?3,
                     (SELECT COALESCE(MAX(seq), 0) + 1 FROM badge_referral
                      WHERE member_id = ?1 AND tier = ?2),
                     ?4, ?5)",
            params![member_id, tier.as_str(), referred_id, order_id, at.timestamp_millis()],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO badge_status (member_id, tier, count_status)
             VALUES (?1, ?2, 0)",
            params![member_id, tier.as_str()],
        )?;
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM badge_referral WHERE member_id = ?1 AND tier = ?2",
            params![member_id, tier.as_str()],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(BadgeAppend {
            appended: inserted == 1,
            count: count as u32,
        })
    }

    /// Flip count_status 0 -> 1. Returns true only for the call that flipped it.
    pub fn mark_badge_unlocked(
        &self,
        member_id: &str,
        tier: BadgeTier,
        order_id: &str,
    ) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "INSERT INTO badge_status (member_id, tier, count_status, unlock_order_id, unlocked_at)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT (member_id, tier) DO UPDATE SET
                count_status    = 1,
                unlock_order_id = excluded.unlock_order_id,
                unlocked_at     = excluded.unlocked_at
             WHERE badge_status.count_status = 0",
            params![member_id, tier.as_str(), order_id, now_millis()],
        )?;
        Ok(changed == 1)
    }

    /// The order whose settlement unlocked this badge, if it is unlocked.
    pub fn badge_unlock_order(
        &self,
        member_id: &str,
        tier: BadgeTier,
    ) -> EngineResult<Option<OrderId>> {
        let order = self
            .conn
            .query_row(
                "SELECT unlock_order_id FROM badge_status
                 WHERE member_id = ?1 AND tier = ?2 AND count_status = 1",
                params![member_id, tier.as_str()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(order)
    }

    pub fn is_badge_unlocked(&self, member_id: &str, tier: BadgeTier) -> EngineResult<bool> {
        Ok(self.badge_unlock_order(member_id, tier)?.is_some())
    }

    /// The qualifying list, in append order.
    pub fn badge_referrals(&self, member_id: &str, tier: BadgeTier) -> EngineResult<Vec<MemberId>> {
        let mut stmt = self.conn.prepare(
            "SELECT referred_id FROM badge_referral
             WHERE member_id = ?1 AND tier = ?2
             ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![member_id, tier.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every tier for the member, including tiers with no activity yet.
    pub fn badge_statuses(&self, member_id: &str) -> EngineResult<Vec<BadgeStatus>> {
        let mut counts: HashMap<String, i64> = HashMap::new();
        let mut stmt = self.conn.prepare(
            "SELECT tier, COUNT(*) FROM badge_referral
             WHERE member_id = ?1 GROUP BY tier",
        )?;
        for row in stmt.query_map(params![member_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (tier, count) = row?;
            counts.insert(tier, count);
        }

        let mut unlocked: HashMap<String, bool> = HashMap::new();
        let mut stmt = self.conn.prepare(
            "SELECT tier, count_status FROM badge_status WHERE member_id = ?1",
        )?;
        for row in stmt.query_map(params![member_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (tier, status) = row?;
            unlocked.insert(tier, status == 1);
        }

        Ok(BadgeTier::ALL
            .iter()
            .map(|tier| BadgeStatus {
                tier: *tier,
                unlocked: unlocked.get(tier.as_str()).copied().unwrap_or(false),
                qualifying_count: counts.get(tier.as_str()).copied().unwrap_or(0) as u32,
            })
            .collect())
    }
}

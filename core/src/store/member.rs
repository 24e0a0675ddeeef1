use super::{now_millis, parse_col, SettlementStore};
use crate::{
    error::EngineResult,
    member::{Member, MemberStatus, MemberType, UplineRank},
    types::{MemberId, OrderId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl SettlementStore {
    // ── Member ────────────────────────────────────────────────────

    /// Insert or refresh a member from the collaborator's referral graph.
    pub fn upsert_member(&self, m: &Member) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO member (member_id, referred_by, member_type, status, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (member_id) DO UPDATE SET
                referred_by = excluded.referred_by,
                member_type = excluded.member_type,
                status      = excluded.status,
                synced_at   = excluded.synced_at",
            params![
                m.member_id,
                m.referred_by,
                m.member_type.as_str(),
                m.status.as_str(),
                now_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn member(&self, member_id: &str) -> EngineResult<Option<Member>> {
        let member = self
            .conn
            .query_row(
                "SELECT member_id, referred_by, member_type, status
                 FROM member WHERE member_id = ?1",
                params![member_id],
                Self::map_member_row,
            )
            .optional()?;
        Ok(member)
    }

    pub fn member_exists(&self, member_id: &str) -> EngineResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM member WHERE member_id = ?1",
            params![member_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn member_count(&self) -> EngineResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM member", [], |row| row.get(0))?;
        Ok(count)
    }

    fn map_member_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
        let member_type: String = row.get(2)?;
        let status: String = row.get(3)?;
        Ok(Member {
            member_id: row.get(0)?,
            referred_by: row.get(1)?,
            member_type: parse_col(2, &member_type, MemberType::parse)?,
            status: parse_col(3, &status, MemberStatus::parse)?,
        })
    }

    // ── Qualification ─────────────────────────────────────────────

    /// Record `order_id` as the member's qualifying order unless one is
    /// already recorded. Returns whichever order holds the slot.
    pub fn qualify_member(
        &self,
        member_id: &str,
        order_id: &str,
        at: DateTime<Utc>,
    ) -> EngineResult<OrderId> {
        self.conn.execute(
            "INSERT OR IGNORE INTO member_qualification (member_id, order_id, qualified_at)
             VALUES (?1, ?2, ?3)",
            params![member_id, order_id, at.timestamp_millis()],
        )?;
        let holder: String = self.conn.query_row(
            "SELECT order_id FROM member_qualification WHERE member_id = ?1",
            params![member_id],
            |row| row.get(0),
        )?;
        Ok(holder)
    }

    pub fn qualifying_order(&self, member_id: &str) -> EngineResult<Option<OrderId>> {
        let order = self
            .conn
            .query_row(
                "SELECT order_id FROM member_qualification WHERE member_id = ?1",
                params![member_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(order)
    }

    // ── Upline rank ───────────────────────────────────────────────

    pub fn save_upline_rank(&self, rank: &UplineRank) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO upline_rank
             (member_id, direct, three_star, five_star, seven_star, mega_star, giga_star, refreshed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                rank.member_id,
                rank.direct,
                rank.three_star,
                rank.five_star,
                rank.seven_star,
                rank.mega_star,
                rank.giga_star,
                now_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn upline_rank(&self, member_id: &str) -> EngineResult<Option<UplineRank>> {
        let rank = self
            .conn
            .query_row(
                "SELECT member_id, direct, three_star, five_star, seven_star, mega_star, giga_star
                 FROM upline_rank WHERE member_id = ?1",
                params![member_id],
                |row| {
                    Ok(UplineRank {
                        member_id: row.get::<_, MemberId>(0)?,
                        direct: row.get(1)?,
                        three_star: row.get(2)?,
                        five_star: row.get(3)?,
                        seven_star: row.get(4)?,
                        mega_star: row.get(5)?,
                        giga_star: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(rank)
    }
}

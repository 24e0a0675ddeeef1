//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! Engine components call store methods; they never execute SQL directly.

use crate::{error::EngineResult, types::OrderId};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod badge;
mod ledger;
mod member;
mod settlement;

pub use badge::BadgeAppend;
pub use ledger::LedgerPageQuery;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SettlementStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
    busy_timeout: Duration,
}

impl SettlementStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: &str, busy_timeout: Duration) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        // Writers queue on the database lock for at most this long, then fail fast.
        conn.busy_timeout(busy_timeout)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
            busy_timeout,
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> EngineResult<Self> {
        match &self.path {
            Some(p) => Self::open_with_timeout(p, self.busy_timeout),
            None => Self::in_memory(),
        }
    }

    /// True when `reopen()` reaches the same data, i.e. the store is file-backed.
    pub fn is_shareable(&self) -> bool {
        self.path.is_some()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_members.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_badges.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_settlement.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_settlement_lines.sql"))?;
        Ok(())
    }

    /// Start a write transaction that takes the database write lock up front,
    /// so read-check-write sequences inside it cannot interleave with another
    /// connection's writes.
    fn immediate(&self) -> EngineResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

// ── Shared row helpers ────────────────────────────────────────────

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Parse a TEXT column into a domain enum, surfacing bad data as a
/// conversion error on that column.
fn parse_col<T>(idx: usize, raw: &str, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unexpected value '{raw}'").into(),
        )
    })
}

// ── Row types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStatus {
    Pending,
    Failed,
    Settled,
}

impl MarkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Settled => "settled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "failed" => Some(Self::Failed),
            "settled" => Some(Self::Settled),
            _ => None,
        }
    }
}

/// An order's settlement marker. Only `Settled` is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementMarker {
    pub order_id: OrderId,
    pub status: MarkerStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl SettlementMarker {
    pub fn is_settled(&self) -> bool {
        self.status == MarkerStatus::Settled
    }
}

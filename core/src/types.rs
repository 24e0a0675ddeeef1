//! Shared primitive types used across the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable, unique identifier for a member of the referral program.
pub type MemberId = String;

/// Identifier of the order that triggered a settlement.
pub type OrderId = String;

/// Identifier of whoever initiated an operation (staff user, system job).
pub type ActorId = String;

/// Ledger row id. Strictly increasing in insertion order.
pub type EntryId = i64;

/// The three balance views every member has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Earning,
    Wallet,
    Cash,
}

impl LedgerKind {
    pub const ALL: [LedgerKind; 3] = [Self::Earning, Self::Wallet, Self::Cash];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earning => "earning",
            Self::Wallet => "wallet",
            Self::Cash => "cash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "earning" => Some(Self::Earning),
            "wallet" => Some(Self::Wallet),
            "cash" => Some(Self::Cash),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(Self::Debit),
            "credit" => Some(Self::Credit),
            _ => None,
        }
    }
}

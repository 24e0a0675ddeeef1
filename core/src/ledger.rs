//! Ledger records.
//!
//! RULE: entries are append-only. Nothing updates or deletes a row;
//! corrections are posted as new offsetting entries.

use crate::{
    badge::BadgeTier,
    types::{ActorId, Direction, EntryId, LedgerKind, MemberId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a ledger row is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nature {
    DirectCommission,
    TierCommission(BadgeTier),
    BadgeReward(BadgeTier),
    Withdrawal,
    WalletMove,
    CashOut,
    Transfer,
}

impl Nature {
    pub fn is_commission(&self) -> bool {
        matches!(
            self,
            Self::DirectCommission | Self::TierCommission(_) | Self::BadgeReward(_)
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        if let Some(tier) = s.strip_prefix("tier_commission:") {
            return BadgeTier::parse(tier).map(Self::TierCommission);
        }
        if let Some(tier) = s.strip_prefix("badge_reward:") {
            return BadgeTier::parse(tier).map(Self::BadgeReward);
        }
        match s {
            "direct_commission" => Some(Self::DirectCommission),
            "withdrawal" => Some(Self::Withdrawal),
            "wallet_move" => Some(Self::WalletMove),
            "cash_out" => Some(Self::CashOut),
            "transfer" => Some(Self::Transfer),
            _ => None,
        }
    }
}

impl fmt::Display for Nature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectCommission => f.write_str("direct_commission"),
            Self::TierCommission(t) => write!(f, "tier_commission:{t}"),
            Self::BadgeReward(t) => write!(f, "badge_reward:{t}"),
            Self::Withdrawal => f.write_str("withdrawal"),
            Self::WalletMove => f.write_str("wallet_move"),
            Self::CashOut => f.write_str("cash_out"),
            Self::Transfer => f.write_str("transfer"),
        }
    }
}

impl Serialize for Nature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Nature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Nature::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown nature '{s}'")))
    }
}

/// Deterministic key that suppresses duplicate postings on redelivery:
/// source reference + recipient + nature, plus the ledger kind for
/// operations that touch more than one balance of the same member.
pub fn idempotency_key(source_ref: &str, recipient: &str, nature: Nature) -> String {
    format!("{source_ref}:{recipient}:{nature}")
}

/// A persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub member_id: MemberId,
    pub kind: LedgerKind,
    pub counterpart_id: Option<MemberId>,
    pub source_ref: String,
    pub amount: Decimal,
    pub direction: Direction,
    pub nature: Nature,
    pub idempotency_key: String,
    pub actor_id: ActorId,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Signed effect on the owning balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

/// One leg of a posting, before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRequest {
    pub recipient: MemberId,
    pub kind: LedgerKind,
    pub amount: Decimal,
    pub direction: Direction,
    pub nature: Nature,
    pub source_ref: String,
    pub counterpart_id: Option<MemberId>,
    pub idempotency_key: String,
    pub actor_id: ActorId,
}

impl PostRequest {
    /// Earning credit for a commission on `order_id`.
    pub fn commission(
        recipient: &str,
        amount: Decimal,
        nature: Nature,
        order_id: &str,
        counterpart_id: Option<&str>,
        actor_id: &str,
    ) -> Self {
        Self {
            recipient: recipient.to_string(),
            kind: LedgerKind::Earning,
            amount,
            direction: Direction::Credit,
            nature,
            source_ref: order_id.to_string(),
            counterpart_id: counterpart_id.map(str::to_string),
            idempotency_key: idempotency_key(order_id, recipient, nature),
            actor_id: actor_id.to_string(),
        }
    }

    /// Suffix the key with the ledger kind, for multi-leg postings that hit
    /// two balances of the same member.
    pub fn with_kind_suffix(mut self) -> Self {
        self.idempotency_key = format!("{}:{}", self.idempotency_key, self.kind);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PostOutcome {
    Posted {
        entry_id: EntryId,
        member_id: MemberId,
        kind: LedgerKind,
        balance_after: Decimal,
    },
    /// Same key, same parameters: already on the ledger.
    Replayed { entry_id: EntryId, member_id: MemberId },
}

impl PostOutcome {
    pub fn entry_id(&self) -> EntryId {
        match self {
            Self::Posted { entry_id, .. } | Self::Replayed { entry_id, .. } => *entry_id,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed { .. })
    }
}

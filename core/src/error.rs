use crate::types::{LedgerKind, MemberId};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Member '{member_id}' not found")]
    MemberNotFound { member_id: MemberId },

    #[error("Unknown member '{member_id}'")]
    UnknownMember { member_id: MemberId },

    #[error("Referral cycle detected while walking upline from '{member_id}' (revisited '{revisited}')")]
    CycleDetected { member_id: MemberId, revisited: MemberId },

    #[error("Idempotency key '{key}' replayed with different parameters")]
    ConflictingReplay { key: String },

    #[error("Insufficient funds: {member_id} {kind} balance {balance}, requested {requested}")]
    InsufficientFunds {
        member_id: MemberId,
        kind: LedgerKind,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("Invalid amount {amount}: postings must be positive")]
    InvalidAmount { amount: Decimal },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Invalid settlement transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse error taxonomy used by the orchestrator and the reporting boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad caller input. Rejected, nothing mutated.
    Input,
    /// The operation would break a ledger or graph invariant.
    Invariant,
    /// Store unavailable or similar. Safe to redeliver.
    Transient,
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MemberNotFound { .. }
            | Self::UnknownMember { .. }
            | Self::InvalidAmount { .. }
            | Self::InvalidRequest { .. } => ErrorClass::Input,
            Self::CycleDetected { .. }
            | Self::ConflictingReplay { .. }
            | Self::InsufficientFunds { .. }
            | Self::InvalidTransition { .. } => ErrorClass::Invariant,
            Self::Database(_) | Self::Serialization(_) | Self::Other(_) => ErrorClass::Transient,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

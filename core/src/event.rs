//! Settlement intake and the settlement event log.
//!
//! RULE: every state-machine transition is appended to the log.
//! Rows are never edited; a retried order simply gets a new attempt id.

use crate::{
    badge::BadgeTier,
    types::{ActorId, MemberId, OrderId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Delivered once per successful payment, possibly more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaid {
    pub order_id: OrderId,
    /// None for walk-in customers.
    pub payer_member_id: Option<MemberId>,
    pub paid_amount: Decimal,
    /// Package price used as the commission base, when the order was a package.
    #[serde(default)]
    pub package_base_amount: Option<Decimal>,
    pub paid_at: DateTime<Utc>,
    pub actor_id: ActorId,
}

impl OrderPaid {
    /// Package price when present and positive, else the selling price.
    pub fn commission_base(&self) -> Decimal {
        match self.package_base_amount {
            Some(base) if base > Decimal::ZERO => base,
            _ => self.paid_amount,
        }
    }
}

/// Payloads written to `settlement_event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettlementEvent {
    AttemptStarted {
        order_id: OrderId,
        attempt: u32,
    },
    AncestryResolved {
        order_id: OrderId,
        upline: Vec<MemberId>,
    },
    BadgesEvaluated {
        order_id: OrderId,
        qualified: bool,
        appended: usize,
        unlocks: Vec<(MemberId, BadgeTier)>,
    },
    CommissionsComputed {
        order_id: OrderId,
        lines: usize,
        total: Decimal,
        /// The lines came from an earlier attempt on this order.
        #[serde(default)]
        pinned_earlier: bool,
    },
    Posted {
        order_id: OrderId,
        posted: usize,
        replayed: usize,
    },
    Settled {
        order_id: OrderId,
    },
    Failed {
        order_id: OrderId,
        reason: String,
    },
}

impl SettlementEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::AttemptStarted { .. } => "attempt_started",
            Self::AncestryResolved { .. } => "ancestry_resolved",
            Self::BadgesEvaluated { .. } => "badges_evaluated",
            Self::CommissionsComputed { .. } => "commissions_computed",
            Self::Posted { .. } => "posted",
            Self::Settled { .. } => "settled",
            Self::Failed { .. } => "failed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementLogEntry {
    pub id: Option<i64>,
    pub order_id: OrderId,
    pub attempt_id: String,
    pub state: String,
    pub payload: String, // JSON-serialized SettlementEvent
}

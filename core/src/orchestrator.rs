//! Settlement orchestrator: turns one paid order into commission postings.
//!
//! STATE MACHINE (strict order, never skipped):
//!   Pending → AncestryResolved → BadgesEvaluated → CommissionsComputed
//!           → Posted → Settled
//!   Failed(reason) is reachable from any non-terminal state.
//!
//! RULES:
//!   - An order whose marker says settled is never run again.
//!   - A failure leaves the marker unsettled; redelivery restarts from
//!     Pending and the idempotent posts make the retry safe.
//!   - The first attempt to compute commission lines pins them to the order.
//!     Every later attempt posts the pinned lines, even if tier holders
//!     have changed since.
//!   - Runs of one order id are serialized on the order's lock.
//!   - Every transition is appended to the settlement event log.

use crate::{
    ancestry::{AncestryResolver, UplineChain},
    badge::{CascadePolicy, Tier},
    badge_evaluator::{BadgeEvaluator, BadgeOutcome},
    commission::{self, CommissionCalculator, CommissionClaim, CommissionLine, CommissionReason},
    config::EngineConfig,
    error::{EngineError, EngineResult, ErrorClass},
    event::{OrderPaid, SettlementEvent, SettlementLogEntry},
    ledger::{PostOutcome, PostRequest},
    ledger_poster::LedgerPoster,
    locks::{KeyedLocks, LockKey},
    member::UplineRank,
    store::SettlementStore,
    types::OrderId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SettlementState {
    Pending,
    AncestryResolved,
    BadgesEvaluated,
    CommissionsComputed,
    Posted,
    Settled,
    Failed(String),
}

impl SettlementState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AncestryResolved => "ancestry_resolved",
            Self::BadgesEvaluated => "badges_evaluated",
            Self::CommissionsComputed => "commissions_computed",
            Self::Posted => "posted",
            Self::Settled => "settled",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Failed(_))
    }

    pub fn can_transition_to(&self, next: &SettlementState) -> bool {
        use SettlementState::*;
        match (self, next) {
            (s, Failed(_)) => !s.is_terminal(),
            (Pending, AncestryResolved)
            | (AncestryResolved, BadgesEvaluated)
            | (BadgesEvaluated, CommissionsComputed)
            | (CommissionsComputed, Posted)
            | (Posted, Settled) => true,
            _ => false,
        }
    }

    pub fn advance(&mut self, next: SettlementState) -> EngineResult<()> {
        if !self.can_transition_to(&next) {
            return Err(EngineError::InvalidTransition {
                from: self.name().to_string(),
                to: next.name().to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub order_id: OrderId,
    pub state: SettlementState,
    /// The order was already settled; nothing ran.
    pub already_settled: bool,
    pub error_class: Option<String>,
    pub lines: Vec<CommissionLine>,
    pub postings: Vec<PostOutcome>,
    pub badges: BadgeOutcome,
}

impl SettlementReport {
    fn new(order_id: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            state: SettlementState::Pending,
            already_settled: false,
            error_class: None,
            lines: Vec::new(),
            postings: Vec::new(),
            badges: BadgeOutcome::default(),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.state == SettlementState::Settled
    }
}

pub struct SettlementOrchestrator {
    store: SettlementStore,
    locks: Arc<KeyedLocks<LockKey>>,
    config: Arc<EngineConfig>,
    policy: Arc<dyn CascadePolicy>,
}

impl SettlementOrchestrator {
    pub fn new(
        store: SettlementStore,
        locks: Arc<KeyedLocks<LockKey>>,
        config: Arc<EngineConfig>,
        policy: Arc<dyn CascadePolicy>,
    ) -> Self {
        Self {
            store,
            locks,
            config,
            policy,
        }
    }

    /// Build an orchestrator with the policy named in config and fresh locks.
    pub fn build(store: SettlementStore, config: EngineConfig) -> Self {
        let policy = config.cascade_policy();
        Self::new(store, Arc::new(KeyedLocks::new()), Arc::new(config), policy)
    }

    /// Same locks, config and policy over a fresh connection to the same
    /// database, for another worker thread.
    pub fn fork(&self) -> EngineResult<Self> {
        Ok(Self::new(
            self.store.reopen()?,
            Arc::clone(&self.locks),
            Arc::clone(&self.config),
            Arc::clone(&self.policy),
        ))
    }

    pub fn store(&self) -> &SettlementStore {
        &self.store
    }

    pub fn locks(&self) -> &KeyedLocks<LockKey> {
        &self.locks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn poster(&self) -> LedgerPoster<'_> {
        LedgerPoster::new(&self.store, &self.locks)
    }

    /// Settle one order. Never returns an error: failures come back as a
    /// report in the Failed state, with the marker left unsettled.
    pub fn settle(&self, event: &OrderPaid) -> SettlementReport {
        let key = LockKey::Order(event.order_id.clone());
        self.locks.with_locked(&[key], || self.settle_locked(event))
    }

    fn settle_locked(&self, event: &OrderPaid) -> SettlementReport {
        let mut report = SettlementReport::new(&event.order_id);
        let attempt_id = Uuid::new_v4().to_string();

        match self.store.settlement_marker(&event.order_id) {
            Ok(Some(marker)) if marker.is_settled() => {
                log::debug!("order {} already settled, skipping", event.order_id);
                report.state = SettlementState::Settled;
                report.already_settled = true;
                return report;
            }
            Ok(_) => {}
            Err(e) => return self.fail(report, &attempt_id, e),
        }

        match self.run(event, &attempt_id, &mut report) {
            Ok(()) => {
                log::info!(
                    "order {} settled: {} postings",
                    event.order_id,
                    report.postings.len()
                );
                report
            }
            Err(e) => self.fail(report, &attempt_id, e),
        }
    }

    fn run(&self, event: &OrderPaid, attempt_id: &str, report: &mut SettlementReport) -> EngineResult<()> {
        let order_id = event.order_id.as_str();
        let attempt = self.store.begin_settlement_attempt(order_id)?;
        self.record(attempt_id, SettlementEvent::AttemptStarted {
            order_id: order_id.to_string(),
            attempt,
        })?;

        // 1. Ancestry
        let chain = match &event.payer_member_id {
            Some(payer_id) => {
                Some(AncestryResolver::new(&self.store, self.config.max_depth).resolve(payer_id)?)
            }
            None => None,
        };
        report.state.advance(SettlementState::AncestryResolved)?;
        self.record(attempt_id, SettlementEvent::AncestryResolved {
            order_id: order_id.to_string(),
            upline: chain.as_ref().map(|c| c.ids()).unwrap_or_default(),
        })?;

        // 2. Badges, then refresh the payer's tier holders
        let evaluator = BadgeEvaluator::new(&self.store, &self.locks, &self.config, self.policy.as_ref());
        let rank = match &chain {
            Some(chain) => {
                report.badges = evaluator.evaluate(order_id, &chain.member, event.paid_at)?;
                let rank = evaluator.rank_upline(chain)?;
                self.store.save_upline_rank(&rank)?;
                Some(rank)
            }
            None => None,
        };
        report.state.advance(SettlementState::BadgesEvaluated)?;
        self.record(attempt_id, SettlementEvent::BadgesEvaluated {
            order_id: order_id.to_string(),
            qualified: report.badges.qualified,
            appended: report.badges.credits.iter().filter(|c| c.appended).count(),
            unlocks: report
                .badges
                .unlocks
                .iter()
                .map(|u| (u.member_id.clone(), u.tier))
                .collect(),
        })?;

        // 3. Commissions
        let claims = match (&chain, &rank) {
            (Some(chain), Some(rank)) => claims_for(chain, rank, &report.badges),
            _ => Vec::new(),
        };
        let calculator = CommissionCalculator::new(&self.config.rates);
        let computed = calculator.calculate(event.commission_base(), &claims)?;
        let (lines, pinned_earlier) = self.store.pin_commission_lines(order_id, attempt_id, &computed)?;
        if pinned_earlier && lines != computed {
            log::info!("order {order_id}: posting lines pinned by an earlier attempt");
        }
        report.lines = lines;
        report.state.advance(SettlementState::CommissionsComputed)?;
        self.record(attempt_id, SettlementEvent::CommissionsComputed {
            order_id: order_id.to_string(),
            lines: report.lines.len(),
            total: commission::total(&report.lines)?,
            pinned_earlier,
        })?;

        // 4. Post, one recipient at a time
        let poster = self.poster();
        let payer = event.payer_member_id.as_deref();
        for line in &report.lines {
            let request = PostRequest::commission(
                &line.claim.recipient,
                line.amount,
                line.claim.nature(),
                order_id,
                payer,
                &event.actor_id,
            );
            report.postings.push(poster.post(&request)?);
        }
        report.state.advance(SettlementState::Posted)?;
        let replayed = report.postings.iter().filter(|p| p.is_replay()).count();
        self.record(attempt_id, SettlementEvent::Posted {
            order_id: order_id.to_string(),
            posted: report.postings.len() - replayed,
            replayed,
        })?;

        // 5. Marker
        self.store.mark_settled(order_id)?;
        report.state.advance(SettlementState::Settled)?;
        self.record(attempt_id, SettlementEvent::Settled {
            order_id: order_id.to_string(),
        })?;
        Ok(())
    }

    fn fail(&self, mut report: SettlementReport, attempt_id: &str, error: EngineError) -> SettlementReport {
        let reason = error.to_string();
        let class = error.class();
        log::warn!("settlement of {} failed ({class:?}): {reason}", report.order_id);

        if report.state.advance(SettlementState::Failed(reason.clone())).is_err() {
            report.state = SettlementState::Failed(reason.clone());
        }
        report.error_class = Some(format!("{class:?}").to_lowercase());

        // Best effort: if the store itself is down these fail too, and the
        // missing marker still reads as unsettled.
        if let Err(e) = self.store.mark_failed(&report.order_id, &reason) {
            log::warn!("could not mark {} failed: {e}", report.order_id);
        }
        let logged = self.record(attempt_id, SettlementEvent::Failed {
            order_id: report.order_id.clone(),
            reason,
        });
        if let Err(e) = logged {
            log::warn!("could not log failure of {}: {e}", report.order_id);
        }
        if class == ErrorClass::Transient {
            log::warn!("order {} left unsettled for redelivery", report.order_id);
        }
        report
    }

    fn record(&self, attempt_id: &str, event: SettlementEvent) -> EngineResult<()> {
        let order_id = match &event {
            SettlementEvent::AttemptStarted { order_id, .. }
            | SettlementEvent::AncestryResolved { order_id, .. }
            | SettlementEvent::BadgesEvaluated { order_id, .. }
            | SettlementEvent::CommissionsComputed { order_id, .. }
            | SettlementEvent::Posted { order_id, .. }
            | SettlementEvent::Settled { order_id }
            | SettlementEvent::Failed { order_id, .. } => order_id.clone(),
        };
        log::debug!("{order_id} [{attempt_id}] {}", event.type_name());
        self.store.append_settlement_event(&SettlementLogEntry {
            id: None,
            order_id,
            attempt_id: attempt_id.to_string(),
            state: event.type_name().to_string(),
            payload: serde_json::to_string(&event)?,
        })
    }
}

/// Who is owed what on this order, before amounts are known.
fn claims_for(chain: &UplineChain, rank: &UplineRank, badges: &BadgeOutcome) -> Vec<CommissionClaim> {
    let mut claims = Vec::new();

    if let Some(direct) = chain.direct().filter(|m| m.can_earn()) {
        claims.push(CommissionClaim {
            recipient: direct.member_id.clone(),
            tier: Tier::Direct,
            reason: CommissionReason::Direct,
        });
    }
    for (tier, holder) in rank.entries() {
        if let (Tier::Badge(_), Some(holder)) = (tier, holder) {
            claims.push(CommissionClaim {
                recipient: holder,
                tier,
                reason: CommissionReason::TierOverride,
            });
        }
    }
    for unlock in &badges.unlocks {
        claims.push(CommissionClaim {
            recipient: unlock.member_id.clone(),
            tier: Tier::Badge(unlock.tier),
            reason: CommissionReason::Unlock,
        });
    }
    claims
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_every_state() {
        let mut state = SettlementState::Pending;
        for next in [
            SettlementState::AncestryResolved,
            SettlementState::BadgesEvaluated,
            SettlementState::CommissionsComputed,
            SettlementState::Posted,
            SettlementState::Settled,
        ] {
            state.advance(next).unwrap();
        }
        assert_eq!(state, SettlementState::Settled);
    }

    #[test]
    fn states_cannot_be_skipped() {
        let mut state = SettlementState::Pending;
        let err = state.advance(SettlementState::Posted).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(state, SettlementState::Pending);
    }

    #[test]
    fn failure_only_from_non_terminal_states() {
        let mut state = SettlementState::BadgesEvaluated;
        state.advance(SettlementState::Failed("boom".into())).unwrap();
        assert!(state.is_terminal());
        assert!(state.advance(SettlementState::Failed("again".into())).is_err());
        assert!(!SettlementState::Settled.can_transition_to(&SettlementState::Failed("x".into())));
        assert_eq!(state.to_string(), "failed(boom)");
    }
}

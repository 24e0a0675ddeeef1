//! Badge evaluator: decides which ancestors gain a countable referral when
//! a member qualifies (or unlocks a badge), and which badges newly unlock.
//!
//! Design:
//!   - A payer qualifies on their first paid order. The qualifying order id
//!     is recorded once; only that order's settlement evaluates badges.
//!   - The CascadePolicy names the tiers a trigger counts toward; the
//!     recipients are the subject's eligible ancestors within
//!     `qualifying_generations` levels.
//!   - An unlock is attributed to the order whose settlement flipped it, so
//!     a retried settlement re-collects the rewards it still owes.
//!   - List appends and unlock flips for one member run under that
//!     member's badge lock.

use crate::{
    ancestry::{AncestryResolver, UplineChain},
    badge::{BadgeTier, CascadePolicy, QualifyingTrigger, Tier},
    config::EngineConfig,
    error::EngineResult,
    locks::{KeyedLocks, LockKey},
    member::{Member, UplineRank},
    store::SettlementStore,
    types::MemberId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeCredit {
    pub member_id: MemberId,
    pub tier: BadgeTier,
    pub referred_id: MemberId,
    /// False when the id was already on the list (replay).
    pub appended: bool,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeUnlock {
    pub member_id: MemberId,
    pub tier: BadgeTier,
    /// The member whose arrival completed the threshold.
    pub triggered_by: MemberId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeOutcome {
    /// This order is the payer's qualifying order.
    pub qualified: bool,
    pub credits: Vec<BadgeCredit>,
    /// Unlocks owed a one-time reward by this order.
    pub unlocks: Vec<BadgeUnlock>,
}

pub struct BadgeEvaluator<'a> {
    store: &'a SettlementStore,
    locks: &'a KeyedLocks<LockKey>,
    config: &'a EngineConfig,
    policy: &'a dyn CascadePolicy,
}

impl<'a> BadgeEvaluator<'a> {
    pub fn new(
        store: &'a SettlementStore,
        locks: &'a KeyedLocks<LockKey>,
        config: &'a EngineConfig,
        policy: &'a dyn CascadePolicy,
    ) -> Self {
        Self {
            store,
            locks,
            config,
            policy,
        }
    }

    /// Evaluate badges for `payer` paying `order_id`.
    pub fn evaluate(
        &self,
        order_id: &str,
        payer: &Member,
        at: DateTime<Utc>,
    ) -> EngineResult<BadgeOutcome> {
        if !payer.is_active() {
            return Ok(BadgeOutcome::default());
        }
        let qualifying = self.store.qualify_member(&payer.member_id, order_id, at)?;
        if qualifying != order_id {
            return Ok(BadgeOutcome::default());
        }

        let resolver = AncestryResolver::new(self.store, self.config.max_depth);
        let mut outcome = BadgeOutcome {
            qualified: true,
            ..BadgeOutcome::default()
        };
        let mut seen_unlocks: HashSet<(MemberId, BadgeTier)> = HashSet::new();
        let mut work: VecDeque<(MemberId, QualifyingTrigger)> =
            VecDeque::from([(payer.member_id.clone(), QualifyingTrigger::Qualified)]);

        while let Some((subject, trigger)) = work.pop_front() {
            let tiers = self.policy.counts_toward(trigger);
            if tiers.is_empty() {
                continue;
            }
            let chain = resolver.resolve(&subject)?;
            for ancestor in chain.within(self.config.qualifying_generations) {
                if !ancestor.member.can_earn() {
                    continue;
                }
                let holder = &ancestor.member.member_id;
                for tier in &tiers {
                    let (credit, unlocked) = self.credit(holder, *tier, &subject, order_id, at)?;
                    outcome.credits.push(credit);
                    if unlocked && seen_unlocks.insert((holder.clone(), *tier)) {
                        log::info!("{holder} unlocked {tier} on order {order_id}");
                        outcome.unlocks.push(BadgeUnlock {
                            member_id: holder.clone(),
                            tier: *tier,
                            triggered_by: subject.clone(),
                        });
                        work.push_back((holder.clone(), QualifyingTrigger::Unlocked(*tier)));
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Append `subject` to `holder`'s `tier` list and flip the unlock if the
    /// threshold is met. Returns whether this order owns the unlock.
    fn credit(
        &self,
        holder: &str,
        tier: BadgeTier,
        subject: &str,
        order_id: &str,
        at: DateTime<Utc>,
    ) -> EngineResult<(BadgeCredit, bool)> {
        let key = LockKey::Badges(holder.to_string());
        self.locks.with_locked(&[key], || {
            let append = self
                .store
                .append_badge_referral(holder, tier, subject, order_id, at)?;
            let threshold = self.config.thresholds.for_tier(tier);
            let owns_unlock = if append.count >= threshold {
                self.store.mark_badge_unlocked(holder, tier, order_id)?
                    || self.store.badge_unlock_order(holder, tier)?.as_deref() == Some(order_id)
            } else {
                false
            };
            Ok((
                BadgeCredit {
                    member_id: holder.to_string(),
                    tier,
                    referred_id: subject.to_string(),
                    appended: append.appended,
                    count: append.count,
                },
                owns_unlock,
            ))
        })
    }

    /// Tier holders for the member at the root of `chain`. The direct slot is
    /// the referrer; each star slot is the nearest eligible ancestor, no
    /// nearer than the previous star holder, who has unlocked that badge.
    pub fn rank_upline(&self, chain: &UplineChain) -> EngineResult<UplineRank> {
        let mut rank = UplineRank::empty(chain.member.member_id.clone());
        rank.set_holder(Tier::Direct, chain.direct().map(|m| m.member_id.clone()));

        let mut floor = 0;
        for tier in BadgeTier::ALL {
            let mut holder = None;
            for (idx, ancestor) in chain.ancestors.iter().enumerate().skip(floor) {
                if ancestor.member.can_earn()
                    && self.store.is_badge_unlocked(&ancestor.member.member_id, tier)?
                {
                    holder = Some(ancestor.member.member_id.clone());
                    floor = idx;
                    break;
                }
            }
            rank.set_holder(Tier::Badge(tier), holder);
        }
        Ok(rank)
    }
}

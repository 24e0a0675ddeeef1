//! Integration tests for badge lists and the badge evaluator.
//!
//! 1. Badge list appends are idempotent and ordered
//! 2. Unlock flips exactly once
//! 3. A qualifying order credits ancestors within the configured generations
//! 4. Only the qualifying order evaluates; replays re-collect their unlocks
//! 5. Previous-tier policy cascades an unlock upward
//! 6. Direct-referral policy counts toward every tier and never cascades
//! 7. Tier holders are ranked nearest first, never below the previous star

use chrono::Utc;
use commission_core::{
    ancestry::AncestryResolver,
    badge::{BadgeTier, CascadePolicy, DirectReferralPolicy, PreviousTierPolicy, Tier},
    badge_evaluator::BadgeEvaluator,
    config::EngineConfig,
    locks::KeyedLocks,
    member::{Member, MemberStatus, MemberType},
    store::SettlementStore,
};

fn store() -> SettlementStore {
    let store = SettlementStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

fn add(store: &SettlementStore, id: &str, parent: Option<&str>) {
    store.upsert_member(&Member::new(id, parent, MemberType::Paid)).unwrap();
}

fn config_with_threshold(n: u32) -> EngineConfig {
    let mut config = EngineConfig::default_test();
    config.thresholds.three_star = n;
    config.thresholds.five_star = n;
    config.thresholds.seven_star = n;
    config.thresholds.mega_star = n;
    config.thresholds.giga_star = n;
    config
}

fn evaluate(
    store: &SettlementStore,
    config: &EngineConfig,
    policy: &dyn CascadePolicy,
    order: &str,
    payer: &str,
) -> commission_core::badge_evaluator::BadgeOutcome {
    let locks = KeyedLocks::new();
    let member = store.member(payer).unwrap().unwrap();
    BadgeEvaluator::new(store, &locks, config, policy)
        .evaluate(order, &member, Utc::now())
        .unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: list appends
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn append_is_idempotent_and_ordered() {
    let store = store();
    add(&store, "a", None);
    let now = Utc::now();

    let first = store.append_badge_referral("a", BadgeTier::ThreeStar, "x", "o1", now).unwrap();
    let second = store.append_badge_referral("a", BadgeTier::ThreeStar, "y", "o2", now).unwrap();
    let again = store.append_badge_referral("a", BadgeTier::ThreeStar, "x", "o3", now).unwrap();

    assert!(first.appended && second.appended);
    assert!(!again.appended, "re-append must be a no-op");
    assert_eq!(again.count, 2);
    assert_eq!(
        store.badge_referrals("a", BadgeTier::ThreeStar).unwrap(),
        vec!["x".to_string(), "y".to_string()]
    );
    // Other tiers untouched
    assert!(store.badge_referrals("a", BadgeTier::FiveStar).unwrap().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: unlock flips once
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unlock_flips_exactly_once() {
    let store = store();
    add(&store, "a", None);

    assert!(store.mark_badge_unlocked("a", BadgeTier::ThreeStar, "o1").unwrap());
    assert!(!store.mark_badge_unlocked("a", BadgeTier::ThreeStar, "o2").unwrap());
    assert!(store.is_badge_unlocked("a", BadgeTier::ThreeStar).unwrap());
    assert_eq!(
        store.badge_unlock_order("a", BadgeTier::ThreeStar).unwrap().as_deref(),
        Some("o1")
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: generations
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn qualifying_order_credits_two_generations() {
    let store = store();
    add(&store, "root", None);
    add(&store, "a", Some("root"));
    add(&store, "b", Some("a"));
    add(&store, "c", Some("b"));
    let config = config_with_threshold(3);

    let outcome = evaluate(&store, &config, &PreviousTierPolicy, "o-c", "c");
    assert!(outcome.qualified);
    let credited: Vec<_> = outcome.credits.iter().map(|c| c.member_id.as_str()).collect();
    assert_eq!(credited, vec!["b", "a"]);
    assert!(store.badge_referrals("root", BadgeTier::ThreeStar).unwrap().is_empty());
    assert!(outcome.unlocks.is_empty());
}

#[test]
fn ineligible_ancestors_are_skipped() {
    let store = store();
    add(&store, "a", None);
    store.upsert_member(&Member::new("free", Some("a"), MemberType::Free)).unwrap();
    add(&store, "c", Some("free"));

    let outcome = evaluate(&store, &config_with_threshold(3), &PreviousTierPolicy, "o-c", "c");
    let credited: Vec<_> = outcome.credits.iter().map(|c| c.member_id.as_str()).collect();
    assert_eq!(credited, vec!["a"]);

    let mut gone = store.member("a").unwrap().unwrap();
    gone.status = MemberStatus::Deleted;
    store.upsert_member(&gone).unwrap();
    add(&store, "d", Some("free"));
    let outcome = evaluate(&store, &config_with_threshold(3), &PreviousTierPolicy, "o-d", "d");
    assert!(outcome.credits.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: qualification happens once
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn only_the_first_order_qualifies() {
    let store = store();
    add(&store, "a", None);
    add(&store, "b", Some("a"));
    let config = config_with_threshold(3);

    let first = evaluate(&store, &config, &PreviousTierPolicy, "o1", "b");
    let later = evaluate(&store, &config, &PreviousTierPolicy, "o2", "b");
    assert!(first.qualified);
    assert!(!later.qualified);
    assert!(later.credits.is_empty());
    assert_eq!(store.qualifying_order("b").unwrap().as_deref(), Some("o1"));
}

#[test]
fn replaying_the_unlocking_order_reports_the_unlock_again() {
    let store = store();
    add(&store, "a", None);
    add(&store, "b", Some("a"));
    add(&store, "c", Some("a"));
    let config = config_with_threshold(2);

    evaluate(&store, &config, &PreviousTierPolicy, "o-b", "b");
    let first = evaluate(&store, &config, &PreviousTierPolicy, "o-c", "c");
    let replay = evaluate(&store, &config, &PreviousTierPolicy, "o-c", "c");

    assert_eq!(first.unlocks.len(), 1);
    assert_eq!(first.unlocks[0].member_id, "a");
    assert_eq!(first.unlocks[0].triggered_by, "c");
    assert_eq!(replay.unlocks, first.unlocks);
    assert!(replay.credits.iter().all(|c| !c.appended));
    assert_eq!(store.badge_referrals("a", BadgeTier::ThreeStar).unwrap().len(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: previous-tier cascade
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn previous_tier_unlock_cascades_upward() {
    // top <- mid <- {x, y}; threshold 2 with one generation of credit.
    let store = store();
    add(&store, "top", None);
    add(&store, "mid", Some("top"));
    add(&store, "other", Some("top"));
    add(&store, "x", Some("mid"));
    add(&store, "y", Some("mid"));
    add(&store, "p", Some("other"));
    add(&store, "q", Some("other"));
    let mut config = config_with_threshold(2);
    config.qualifying_generations = 1;

    evaluate(&store, &config, &PreviousTierPolicy, "o-x", "x");
    let outcome = evaluate(&store, &config, &PreviousTierPolicy, "o-y", "y");
    assert_eq!(outcome.unlocks.len(), 1, "mid unlocks three-star");
    assert_eq!(
        store.badge_referrals("top", BadgeTier::FiveStar).unwrap(),
        vec!["mid".to_string()]
    );

    evaluate(&store, &config, &PreviousTierPolicy, "o-p", "p");
    let outcome = evaluate(&store, &config, &PreviousTierPolicy, "o-q", "q");
    let unlocked: Vec<_> = outcome
        .unlocks
        .iter()
        .map(|u| (u.member_id.as_str(), u.tier))
        .collect();
    assert_eq!(
        unlocked,
        vec![("other", BadgeTier::ThreeStar), ("top", BadgeTier::FiveStar)]
    );
    assert_eq!(outcome.unlocks[1].triggered_by, "other");
    assert!(store.is_badge_unlocked("top", BadgeTier::FiveStar).unwrap());
    assert!(!store.is_badge_unlocked("top", BadgeTier::ThreeStar).unwrap());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: direct-referral policy
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn direct_referral_policy_counts_every_tier() {
    let store = store();
    add(&store, "top", None);
    add(&store, "a", Some("top"));
    add(&store, "x", Some("a"));
    let mut config = config_with_threshold(1);
    config.qualifying_generations = 1;
    config.thresholds.mega_star = 2;
    config.thresholds.giga_star = 2;

    let outcome = evaluate(&store, &config, &DirectReferralPolicy, "o-x", "x");
    let tiers: Vec<_> = outcome.unlocks.iter().map(|u| u.tier).collect();
    assert_eq!(
        tiers,
        vec![BadgeTier::ThreeStar, BadgeTier::FiveStar, BadgeTier::SevenStar]
    );
    assert!(outcome.unlocks.iter().all(|u| u.member_id == "a"));
    // Unlocks do not cascade under this policy.
    assert!(store.badge_referrals("top", BadgeTier::FiveStar).unwrap().is_empty());

    let statuses = store.badge_statuses("a").unwrap();
    let mega = statuses.iter().find(|s| s.tier == BadgeTier::MegaStar).unwrap();
    assert!(!mega.unlocked);
    assert_eq!(mega.qualifying_count, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 7: upline ranking
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn rank_upline_picks_nearest_unlocked_holders() {
    let store = store();
    add(&store, "g", None);
    add(&store, "f", Some("g"));
    add(&store, "e", Some("f"));
    add(&store, "d", Some("e"));
    store.mark_badge_unlocked("f", BadgeTier::ThreeStar, "seed").unwrap();
    store.mark_badge_unlocked("g", BadgeTier::ThreeStar, "seed").unwrap();
    store.mark_badge_unlocked("e", BadgeTier::FiveStar, "seed").unwrap();
    store.mark_badge_unlocked("g", BadgeTier::FiveStar, "seed").unwrap();

    let config = EngineConfig::default_test();
    let locks = KeyedLocks::new();
    let chain = AncestryResolver::new(&store, config.max_depth).resolve("d").unwrap();
    let rank = BadgeEvaluator::new(&store, &locks, &config, &PreviousTierPolicy)
        .rank_upline(&chain)
        .unwrap();

    assert_eq!(rank.holder(Tier::Direct).map(String::as_str), Some("e"));
    assert_eq!(rank.holder(Tier::Badge(BadgeTier::ThreeStar)).map(String::as_str), Some("f"));
    // e is nearer but sits below the three-star holder.
    assert_eq!(rank.holder(Tier::Badge(BadgeTier::FiveStar)).map(String::as_str), Some("g"));
    assert_eq!(rank.holder(Tier::Badge(BadgeTier::SevenStar)), None);
}

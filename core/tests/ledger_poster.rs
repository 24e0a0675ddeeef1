//! Integration tests for the ledger poster and the debit paths.
//!
//! 1. A commission credit appends one row and moves the cached balance
//! 2. Same key + same parameters is a no-op; different parameters conflict
//! 3. Debits need funds; a failed debit writes nothing
//! 4. Unknown members and bad amounts are rejected
//! 5. Multi-leg postings (wallet move, cash out, transfer) are all-or-nothing
//! 6. Ledger rows cannot be edited or removed

use commission_core::{
    error::{EngineError, ErrorClass},
    ledger::{Nature, PostOutcome, PostRequest},
    ledger_poster::{FundsRequest, LedgerPoster},
    locks::KeyedLocks,
    member::{Member, MemberType},
    store::SettlementStore,
    types::{Direction, LedgerKind},
};
use rust_decimal::Decimal;
use std::str::FromStr;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn store_with(members: &[&str]) -> SettlementStore {
    let store = SettlementStore::in_memory().unwrap();
    store.migrate().unwrap();
    for m in members {
        store.upsert_member(&Member::new(*m, None, MemberType::Paid)).unwrap();
    }
    store
}

fn credit(member: &str, amount: &str, order: &str) -> PostRequest {
    PostRequest::commission(member, d(amount), Nature::DirectCommission, order, Some("payer"), "system")
}

fn funds(request_id: &str, member: &str, amount: &str) -> FundsRequest {
    FundsRequest {
        request_id: request_id.to_string(),
        member_id: member.to_string(),
        amount: d(amount),
        actor_id: member.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: credits
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn commission_credit_moves_balance() {
    let store = store_with(&["a"]);
    let locks = KeyedLocks::new();
    let poster = LedgerPoster::new(&store, &locks);

    let outcome = poster.post(&credit("a", "100.005", "o1")).unwrap();
    match outcome {
        PostOutcome::Posted { ref member_id, kind, balance_after, .. } => {
            assert_eq!(member_id, "a");
            assert_eq!(kind, LedgerKind::Earning);
            assert_eq!(balance_after, d("100.01"), "amounts round half-up");
        }
        other => panic!("expected Posted, got {other:?}"),
    }

    let rows = store.entries_for_source("o1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].direction, Direction::Credit);
    assert_eq!(rows[0].counterpart_id.as_deref(), Some("payer"));
    assert_eq!(rows[0].idempotency_key, "o1:a:direct_commission");
    assert_eq!(store.cached_balance("a", LedgerKind::Earning).unwrap(), d("100.01"));
    assert_eq!(store.cached_balance("a", LedgerKind::Wallet).unwrap(), Decimal::ZERO);
}

#[test]
fn commission_cannot_be_a_debit() {
    let store = store_with(&["a"]);
    let locks = KeyedLocks::new();
    let mut req = credit("a", "10", "o1");
    req.direction = Direction::Debit;

    let err = LedgerPoster::new(&store, &locks).post(&req).unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest { .. }), "got {err:?}");
    assert_eq!(store.ledger_entry_count().unwrap(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: idempotency
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn replay_is_a_silent_no_op() {
    let store = store_with(&["a"]);
    let locks = KeyedLocks::new();
    let poster = LedgerPoster::new(&store, &locks);

    let first = poster.post(&credit("a", "50", "o1")).unwrap();
    let second = poster.post(&credit("a", "50", "o1")).unwrap();

    assert!(!first.is_replay());
    assert!(second.is_replay());
    assert_eq!(first.entry_id(), second.entry_id());
    assert_eq!(store.ledger_entry_count().unwrap(), 1);
    assert_eq!(store.cached_balance("a", LedgerKind::Earning).unwrap(), d("50.00"));
}

#[test]
fn replay_with_different_amount_conflicts() {
    let store = store_with(&["a"]);
    let locks = KeyedLocks::new();
    let poster = LedgerPoster::new(&store, &locks);

    poster.post(&credit("a", "50", "o1")).unwrap();
    let err = poster.post(&credit("a", "60", "o1")).unwrap_err();

    assert!(matches!(err, EngineError::ConflictingReplay { ref key } if key == "o1:a:direct_commission"));
    assert_eq!(err.class(), ErrorClass::Invariant);
    assert_eq!(store.cached_balance("a", LedgerKind::Earning).unwrap(), d("50.00"));
}

#[test]
fn different_natures_on_one_order_are_distinct() {
    let store = store_with(&["a"]);
    let locks = KeyedLocks::new();
    let poster = LedgerPoster::new(&store, &locks);
    use commission_core::badge::BadgeTier;

    poster.post(&credit("a", "10", "o1")).unwrap();
    poster
        .post(&PostRequest::commission(
            "a",
            d("5"),
            Nature::BadgeReward(BadgeTier::ThreeStar),
            "o1",
            Some("payer"),
            "system",
        ))
        .unwrap();

    assert_eq!(store.entries_for_source("o1").unwrap().len(), 2);
    assert_eq!(store.cached_balance("a", LedgerKind::Earning).unwrap(), d("15.00"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: insufficient funds
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn withdrawal_beyond_balance_is_rejected() {
    let store = store_with(&["a"]);
    let locks = KeyedLocks::new();
    let poster = LedgerPoster::new(&store, &locks);
    poster.post(&credit("a", "1000", "o1")).unwrap();

    let err = poster.withdraw(&funds("w1", "a", "1200")).unwrap_err();
    match err {
        EngineError::InsufficientFunds { ref member_id, kind, balance, requested } => {
            assert_eq!(member_id, "a");
            assert_eq!(kind, LedgerKind::Earning);
            assert_eq!(balance, d("1000.00"));
            assert_eq!(requested, d("1200.00"));
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }
    assert_eq!(store.cached_balance("a", LedgerKind::Earning).unwrap(), d("1000.00"));
    assert!(store.entries_for_source("w1").unwrap().is_empty());
    assert_eq!(store.ledger_entry_count().unwrap(), 1);
}

#[test]
fn withdrawal_within_balance_debits_earning() {
    let store = store_with(&["a"]);
    let locks = KeyedLocks::new();
    let poster = LedgerPoster::new(&store, &locks);
    poster.post(&credit("a", "1000", "o1")).unwrap();

    poster.withdraw(&funds("w1", "a", "1000")).unwrap();
    // Same request id again is a replay, not a second withdrawal.
    assert!(poster.withdraw(&funds("w1", "a", "1000")).unwrap().is_replay());

    assert_eq!(store.cached_balance("a", LedgerKind::Earning).unwrap(), Decimal::ZERO);
    let rows = store.entries_for_source("w1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].nature, Nature::Withdrawal);
    assert_eq!(rows[0].signed_amount(), d("-1000.00"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: input validation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unknown_member_is_rejected() {
    let store = store_with(&["a"]);
    let locks = KeyedLocks::new();

    let err = LedgerPoster::new(&store, &locks)
        .post(&credit("nobody", "10", "o1"))
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownMember { .. }), "got {err:?}");
    assert_eq!(err.class(), ErrorClass::Input);
    assert_eq!(store.ledger_entry_count().unwrap(), 0);
}

#[test]
fn non_positive_amounts_are_rejected() {
    let store = store_with(&["a"]);
    let locks = KeyedLocks::new();
    let poster = LedgerPoster::new(&store, &locks);

    for amount in ["0", "-5", "0.004"] {
        let err = poster.post(&credit("a", amount, "o1")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidAmount { .. }), "{amount}: got {err:?}");
    }
    assert_eq!(store.ledger_entry_count().unwrap(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: multi-leg postings
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn wallet_move_and_cash_out_shift_funds() {
    let store = store_with(&["a"]);
    let locks = KeyedLocks::new();
    let poster = LedgerPoster::new(&store, &locks);
    poster.post(&credit("a", "300", "o1")).unwrap();

    poster.move_to_wallet(&funds("m1", "a", "200")).unwrap();
    poster.cash_out(&funds("c1", "a", "75.50")).unwrap();

    assert_eq!(store.cached_balance("a", LedgerKind::Earning).unwrap(), d("100.00"));
    assert_eq!(store.cached_balance("a", LedgerKind::Wallet).unwrap(), d("124.50"));
    assert_eq!(store.cached_balance("a", LedgerKind::Cash).unwrap(), d("75.50"));

    let keys: Vec<_> = store
        .entries_for_source("m1")
        .unwrap()
        .into_iter()
        .map(|e| e.idempotency_key)
        .collect();
    assert_eq!(keys, vec!["m1:a:wallet_move:earning", "m1:a:wallet_move:wallet"]);
}

#[test]
fn failed_leg_rolls_back_the_whole_posting() {
    let store = store_with(&["a"]);
    let locks = KeyedLocks::new();
    let poster = LedgerPoster::new(&store, &locks);
    poster.post(&credit("a", "50", "o1")).unwrap();

    let err = poster.cash_out(&funds("c1", "a", "10")).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds { kind: LedgerKind::Wallet, .. }));
    assert_eq!(store.cached_balance("a", LedgerKind::Cash).unwrap(), Decimal::ZERO);
    assert!(store.entries_for_source("c1").unwrap().is_empty());
}

#[test]
fn transfer_moves_wallet_funds_between_members() {
    let store = store_with(&["a", "b"]);
    let locks = KeyedLocks::new();
    let poster = LedgerPoster::new(&store, &locks);
    poster.post(&credit("a", "100", "o1")).unwrap();
    poster.move_to_wallet(&funds("m1", "a", "100")).unwrap();

    let outcomes = poster.transfer(&funds("t1", "a", "40"), "b").unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(store.cached_balance("a", LedgerKind::Wallet).unwrap(), d("60.00"));
    assert_eq!(store.cached_balance("b", LedgerKind::Wallet).unwrap(), d("40.00"));

    let rows = store.entries_for_source("t1").unwrap();
    assert_eq!(rows[0].counterpart_id.as_deref(), Some("b"));
    assert_eq!(rows[1].counterpart_id.as_deref(), Some("a"));

    let err = poster.transfer(&funds("t2", "a", "1"), "a").unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest { .. }));
    let err = poster.transfer(&funds("t3", "a", "1"), "ghost").unwrap_err();
    assert!(matches!(err, EngineError::UnknownMember { .. }));
    assert_eq!(store.cached_balance("a", LedgerKind::Wallet).unwrap(), d("60.00"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: immutability
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn ledger_rows_cannot_be_edited_or_removed() {
    let path = std::env::temp_dir().join(format!("ledger-{}.db", uuid::Uuid::new_v4()));
    let path = path.to_string_lossy().to_string();
    let store = SettlementStore::open(&path).unwrap();
    store.migrate().unwrap();
    store.upsert_member(&Member::new("a", None, MemberType::Paid)).unwrap();
    let locks = KeyedLocks::new();
    LedgerPoster::new(&store, &locks).post(&credit("a", "10", "o1")).unwrap();

    let raw = rusqlite::Connection::open(&path).unwrap();
    assert!(raw
        .execute("UPDATE ledger_entry SET amount_cents = 1", [])
        .is_err());
    assert!(raw.execute("DELETE FROM ledger_entry", []).is_err());
    drop(raw);

    assert_eq!(store.ledger_entry_count().unwrap(), 1);
    assert_eq!(store.ledger_sum("a", LedgerKind::Earning).unwrap(), d("10.00"));
    drop(store);
    let _ = std::fs::remove_file(&path);
}

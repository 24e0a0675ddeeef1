//! Fixed-point money helpers.
//!
//! RULE: every amount that reaches the ledger has exactly 2 fraction digits,
//! rounded half-up. The store keeps integer minor units so SQL sums are exact.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

pub const SCALE: u32 = 2;

/// Round to 2 fraction digits, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(SCALE);
    rounded
}

/// Convert a money amount to integer cents for storage.
/// Returns None if the amount does not fit in an i64.
pub fn to_cents(amount: Decimal) -> Option<i64> {
    round_money(amount).checked_mul(Decimal::ONE_HUNDRED)?.to_i64()
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, SCALE)
}

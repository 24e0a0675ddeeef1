//! Commission calculator: turns (recipient, tier, reason) claims into
//! money amounts using the configured rate table.
//!
//! Pure: no store access, no side effects. Amounts are rounded half-up to
//! 2 fraction digits and are never negative. Arithmetic is checked; an
//! amount too large to represent is rejected as InvalidAmount.

use crate::{
    badge::{BadgeTier, Tier},
    error::{EngineError, EngineResult},
    ledger::Nature,
    money::round_money,
    types::MemberId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rate {
    /// Fixed amount regardless of the base.
    Flat(Decimal),
    /// Percentage of the commission base, e.g. 5 = 5%.
    Percent(Decimal),
}

impl Rate {
    /// None on overflow.
    pub fn apply(&self, base: Decimal) -> Option<Decimal> {
        match self {
            Self::Flat(amount) => Some(*amount),
            Self::Percent(pct) => base.checked_mul(*pct)?.checked_div(Decimal::ONE_HUNDRED),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierRates {
    /// Paid on every settled order to the holder of this tier.
    #[serde(default)]
    pub recurring: Option<Rate>,
    /// Paid once, on the order that unlocks the badge.
    #[serde(default)]
    pub unlock: Option<Rate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateTable {
    pub direct: TierRates,
    pub three_star: TierRates,
    pub five_star: TierRates,
    pub seven_star: TierRates,
    pub mega_star: TierRates,
    pub giga_star: TierRates,
}

impl RateTable {
    pub fn for_tier(&self, tier: Tier) -> &TierRates {
        match tier {
            Tier::Direct => &self.direct,
            Tier::Badge(BadgeTier::ThreeStar) => &self.three_star,
            Tier::Badge(BadgeTier::FiveStar) => &self.five_star,
            Tier::Badge(BadgeTier::SevenStar) => &self.seven_star,
            Tier::Badge(BadgeTier::MegaStar) => &self.mega_star,
            Tier::Badge(BadgeTier::GigaStar) => &self.giga_star,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionReason {
    /// Direct referrer's cut of every order.
    Direct,
    /// Recurring cut for the upline holder of a star tier.
    TierOverride,
    /// One-time reward for the order that unlocked a badge.
    Unlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionClaim {
    pub recipient: MemberId,
    pub tier: Tier,
    pub reason: CommissionReason,
}

impl CommissionClaim {
    /// Ledger nature tag; part of the posting's idempotency key.
    pub fn nature(&self) -> Nature {
        match (self.reason, self.tier) {
            (CommissionReason::Direct, _) | (_, Tier::Direct) => Nature::DirectCommission,
            (CommissionReason::TierOverride, Tier::Badge(b)) => Nature::TierCommission(b),
            (CommissionReason::Unlock, Tier::Badge(b)) => Nature::BadgeReward(b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionLine {
    pub claim: CommissionClaim,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Computed {
    Amount(Decimal),
    /// Nothing to pay. Not an error.
    ZeroAmount,
}

pub struct CommissionCalculator<'a> {
    rates: &'a RateTable,
}

impl<'a> CommissionCalculator<'a> {
    pub fn new(rates: &'a RateTable) -> Self {
        Self { rates }
    }

    fn rate_for(&self, claim: &CommissionClaim) -> Option<Rate> {
        let tier_rates = self.rates.for_tier(claim.tier);
        match (claim.reason, claim.tier) {
            (CommissionReason::Direct, Tier::Direct) => tier_rates.recurring,
            (CommissionReason::TierOverride, Tier::Badge(_)) => tier_rates.recurring,
            (CommissionReason::Unlock, Tier::Badge(_)) => tier_rates.unlock,
            _ => None,
        }
    }

    /// A zero or negative base pays nothing, whatever the rate kind.
    pub fn compute(&self, base: Decimal, claim: &CommissionClaim) -> EngineResult<Computed> {
        if base <= Decimal::ZERO {
            return Ok(Computed::ZeroAmount);
        }
        let Some(rate) = self.rate_for(claim) else {
            return Ok(Computed::ZeroAmount);
        };
        let raw = rate.apply(base).ok_or(EngineError::InvalidAmount { amount: base })?;
        let amount = round_money(raw);
        if amount <= Decimal::ZERO {
            Ok(Computed::ZeroAmount)
        } else {
            Ok(Computed::Amount(amount))
        }
    }

    /// Amount per claim; claims that come to nothing are dropped.
    pub fn calculate(&self, base: Decimal, claims: &[CommissionClaim]) -> EngineResult<Vec<CommissionLine>> {
        let mut lines = Vec::with_capacity(claims.len());
        for claim in claims {
            match self.compute(base, claim)? {
                Computed::Amount(amount) => lines.push(CommissionLine {
                    claim: claim.clone(),
                    amount,
                }),
                Computed::ZeroAmount => log::debug!(
                    "zero commission for {} ({} {:?})",
                    claim.recipient,
                    claim.tier,
                    claim.reason
                ),
            }
        }
        Ok(lines)
    }
}

/// Sum of line amounts. InvalidAmount if it does not fit in a Decimal.
pub fn total(lines: &[CommissionLine]) -> EngineResult<Decimal> {
    lines.iter().try_fold(Decimal::ZERO, |acc, line| {
        acc.checked_add(line.amount)
            .ok_or(EngineError::InvalidAmount { amount: line.amount })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn claim(tier: Tier, reason: CommissionReason) -> CommissionClaim {
        CommissionClaim { recipient: "m1".into(), tier, reason }
    }

    fn table() -> RateTable {
        RateTable {
            direct: TierRates { recurring: Some(Rate::Percent(d("10"))), unlock: None },
            three_star: TierRates {
                recurring: Some(Rate::Percent(d("0"))),
                unlock: Some(Rate::Percent(d("5"))),
            },
            five_star: TierRates { recurring: None, unlock: Some(Rate::Flat(d("250"))) },
            ..RateTable::default()
        }
    }

    #[test]
    fn percent_of_base_rounds_half_up() {
        let rates = table();
        let calc = CommissionCalculator::new(&rates);
        let c = claim(Tier::Badge(BadgeTier::ThreeStar), CommissionReason::Unlock);
        assert_eq!(calc.compute(d("1000"), &c).unwrap(), Computed::Amount(d("50.00")));
        assert_eq!(calc.compute(d("0.10"), &c).unwrap(), Computed::Amount(d("0.01")));
        assert_eq!(calc.compute(d("0.09"), &c).unwrap(), Computed::ZeroAmount);
    }

    #[test]
    fn zero_rate_or_zero_base_is_zero_amount() {
        let rates = table();
        let calc = CommissionCalculator::new(&rates);
        let recurring = claim(Tier::Badge(BadgeTier::ThreeStar), CommissionReason::TierOverride);
        assert_eq!(calc.compute(d("1000"), &recurring).unwrap(), Computed::ZeroAmount);
        let direct = claim(Tier::Direct, CommissionReason::Direct);
        assert_eq!(calc.compute(Decimal::ZERO, &direct).unwrap(), Computed::ZeroAmount);
        assert_eq!(calc.compute(d("-50"), &direct).unwrap(), Computed::ZeroAmount);
    }

    #[test]
    fn flat_rate_pays_nothing_without_a_base() {
        let rates = table();
        let calc = CommissionCalculator::new(&rates);
        let unlock = claim(Tier::Badge(BadgeTier::FiveStar), CommissionReason::Unlock);
        assert_eq!(calc.compute(Decimal::ZERO, &unlock).unwrap(), Computed::ZeroAmount);
        assert_eq!(calc.compute(d("-10"), &unlock).unwrap(), Computed::ZeroAmount);
        assert!(calc.calculate(Decimal::ZERO, &[unlock]).unwrap().is_empty());
    }

    #[test]
    fn oversized_base_is_rejected_not_panicking() {
        let rates = table();
        let calc = CommissionCalculator::new(&rates);
        let direct = claim(Tier::Direct, CommissionReason::Direct);
        let err = calc.compute(Decimal::MAX, &direct).unwrap_err();
        assert!(matches!(err, EngineError::InvalidAmount { .. }));
        assert!(calc.calculate(Decimal::MAX, &[direct]).is_err());
    }

    #[test]
    fn total_overflow_is_rejected() {
        let line = |amount| CommissionLine {
            claim: claim(Tier::Direct, CommissionReason::Direct),
            amount,
        };
        assert_eq!(total(&[line(d("1.50")), line(d("2.25"))]).unwrap(), d("3.75"));
        assert!(total(&[line(Decimal::MAX), line(Decimal::MAX)]).is_err());
    }

    #[test]
    fn flat_rate_ignores_base_size_and_missing_rates_drop() {
        let rates = table();
        let calc = CommissionCalculator::new(&rates);
        let claims = vec![
            claim(Tier::Badge(BadgeTier::FiveStar), CommissionReason::Unlock),
            claim(Tier::Badge(BadgeTier::GigaStar), CommissionReason::Unlock),
            claim(Tier::Direct, CommissionReason::Direct),
        ];
        let lines = calc.calculate(d("80"), &claims).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].amount, d("250.00"));
        assert_eq!(lines[1].amount, d("8.00"));
    }
}

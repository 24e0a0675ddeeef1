//! Badge tiers and the cascade policy seam.
//!
//! The five star badges share one record shape, parameterised by
//! `BadgeTier`. Which tier a qualifying member counts toward is decided by a
//! `CascadePolicy`, selected in config, so the counting rule can change
//! without touching the evaluator.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeTier {
    ThreeStar,
    FiveStar,
    SevenStar,
    MegaStar,
    GigaStar,
}

impl BadgeTier {
    pub const ALL: [BadgeTier; 5] = [
        Self::ThreeStar,
        Self::FiveStar,
        Self::SevenStar,
        Self::MegaStar,
        Self::GigaStar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThreeStar => "three_star",
            Self::FiveStar => "five_star",
            Self::SevenStar => "seven_star",
            Self::MegaStar => "mega_star",
            Self::GigaStar => "giga_star",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// The tier a holder of this badge works toward next.
    pub fn next(&self) -> Option<BadgeTier> {
        match self {
            Self::ThreeStar => Some(Self::FiveStar),
            Self::FiveStar => Some(Self::SevenStar),
            Self::SevenStar => Some(Self::MegaStar),
            Self::MegaStar => Some(Self::GigaStar),
            Self::GigaStar => None,
        }
    }
}

impl fmt::Display for BadgeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the six upline tiers: the direct referrer plus the five badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Direct,
    Badge(BadgeTier),
}

impl Tier {
    pub const ALL: [Tier; 6] = [
        Self::Direct,
        Self::Badge(BadgeTier::ThreeStar),
        Self::Badge(BadgeTier::FiveStar),
        Self::Badge(BadgeTier::SevenStar),
        Self::Badge(BadgeTier::MegaStar),
        Self::Badge(BadgeTier::GigaStar),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Badge(b) => b.as_str(),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tier view returned to the reporting boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeStatus {
    pub tier: BadgeTier,
    pub unlocked: bool,
    pub qualifying_count: u32,
}

/// What just happened to a member that may count toward an ancestor's badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualifyingTrigger {
    /// The member completed their first paid order.
    Qualified,
    /// The member just unlocked this badge.
    Unlocked(BadgeTier),
}

/// Decides which badge lists a triggering member is appended to.
pub trait CascadePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Tiers the subject of `trigger` counts toward on each eligible ancestor.
    fn counts_toward(&self, trigger: QualifyingTrigger) -> Vec<BadgeTier>;
}

/// Tree-of-trees counting: a qualified member counts toward 3-star, and a
/// member who unlocks tier k counts toward tier k+1.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreviousTierPolicy;

impl CascadePolicy for PreviousTierPolicy {
    fn name(&self) -> &'static str {
        "previous_tier"
    }

    fn counts_toward(&self, trigger: QualifyingTrigger) -> Vec<BadgeTier> {
        match trigger {
            QualifyingTrigger::Qualified => vec![BadgeTier::ThreeStar],
            QualifyingTrigger::Unlocked(tier) => tier.next().into_iter().collect(),
        }
    }
}

/// Flat counting: every qualified member counts toward every tier, and
/// thresholds alone separate the badges. Unlocks never cascade.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectReferralPolicy;

impl CascadePolicy for DirectReferralPolicy {
    fn name(&self) -> &'static str {
        "direct_referrals"
    }

    fn counts_toward(&self, trigger: QualifyingTrigger) -> Vec<BadgeTier> {
        match trigger {
            QualifyingTrigger::Qualified => BadgeTier::ALL.to_vec(),
            QualifyingTrigger::Unlocked(_) => Vec::new(),
        }
    }
}

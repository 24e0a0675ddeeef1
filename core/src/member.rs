//! Member records and the cached upline-rank row.
//!
//! RULE: members reference each other by id only. `referred_by` is a graph
//! edge, never ownership, and the engine never writes it.

use crate::{
    badge::{BadgeTier, Tier},
    types::MemberId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberType {
    Free,
    Paid,
}

impl MemberType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Self::Free),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Deleted,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: MemberId,
    pub referred_by: Option<MemberId>,
    pub member_type: MemberType,
    #[serde(default = "default_status")]
    pub status: MemberStatus,
}

fn default_status() -> MemberStatus {
    MemberStatus::Active
}

impl Member {
    pub fn new(member_id: impl Into<MemberId>, referred_by: Option<&str>, member_type: MemberType) -> Self {
        Self {
            member_id: member_id.into(),
            referred_by: referred_by.map(str::to_string),
            member_type,
            status: MemberStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    /// Paid and not deleted. Only these members earn or accumulate badge counts.
    pub fn can_earn(&self) -> bool {
        self.is_active() && self.member_type == MemberType::Paid
    }
}

/// For one member, the ancestor occupying each of the six tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplineRank {
    pub member_id: MemberId,
    pub direct: Option<MemberId>,
    pub three_star: Option<MemberId>,
    pub five_star: Option<MemberId>,
    pub seven_star: Option<MemberId>,
    pub mega_star: Option<MemberId>,
    pub giga_star: Option<MemberId>,
}

impl UplineRank {
    pub fn empty(member_id: impl Into<MemberId>) -> Self {
        Self {
            member_id: member_id.into(),
            ..Self::default()
        }
    }

    pub fn holder(&self, tier: Tier) -> Option<&MemberId> {
        match tier {
            Tier::Direct => self.direct.as_ref(),
            Tier::Badge(BadgeTier::ThreeStar) => self.three_star.as_ref(),
            Tier::Badge(BadgeTier::FiveStar) => self.five_star.as_ref(),
            Tier::Badge(BadgeTier::SevenStar) => self.seven_star.as_ref(),
            Tier::Badge(BadgeTier::MegaStar) => self.mega_star.as_ref(),
            Tier::Badge(BadgeTier::GigaStar) => self.giga_star.as_ref(),
        }
    }

    pub fn set_holder(&mut self, tier: Tier, holder: Option<MemberId>) {
        let slot = match tier {
            Tier::Direct => &mut self.direct,
            Tier::Badge(BadgeTier::ThreeStar) => &mut self.three_star,
            Tier::Badge(BadgeTier::FiveStar) => &mut self.five_star,
            Tier::Badge(BadgeTier::SevenStar) => &mut self.seven_star,
            Tier::Badge(BadgeTier::MegaStar) => &mut self.mega_star,
            Tier::Badge(BadgeTier::GigaStar) => &mut self.giga_star,
        };
        *slot = holder;
    }

    /// Tier → holder pairs in tier order, empty tiers included.
    pub fn entries(&self) -> Vec<(Tier, Option<MemberId>)> {
        Tier::ALL
            .iter()
            .map(|t| (*t, self.holder(*t).cloned()))
            .collect()
    }
}

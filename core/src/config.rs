use crate::{
    badge::{BadgeTier, CascadePolicy, DirectReferralPolicy, PreviousTierPolicy},
    commission::{Rate, RateTable, TierRates},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ── Badge rules ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgePolicyKind {
    PreviousTier,
    DirectReferrals,
}

/// Qualifying-list length at which each badge unlocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeThresholds {
    pub three_star: u32,
    pub five_star: u32,
    pub seven_star: u32,
    pub mega_star: u32,
    pub giga_star: u32,
}

impl BadgeThresholds {
    pub fn for_tier(&self, tier: BadgeTier) -> u32 {
        match tier {
            BadgeTier::ThreeStar => self.three_star,
            BadgeTier::FiveStar => self.five_star,
            BadgeTier::SevenStar => self.seven_star,
            BadgeTier::MegaStar => self.mega_star,
            BadgeTier::GigaStar => self.giga_star,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct BadgeRulesFile {
    max_depth: usize,
    qualifying_generations: usize,
    policy: BadgePolicyKind,
    thresholds: BadgeThresholds,
}

// ── Commission rates ───────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct RateTableFile {
    rates: RateTable,
}

// ── Runtime limits ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct RuntimeFile {
    intake_timeout_ms: u64,
    busy_timeout_ms: u64,
    ledger_page_size: usize,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upline levels the resolver walks.
    pub max_depth: usize,
    /// Upline levels that count a qualifying member toward their badges.
    pub qualifying_generations: usize,
    pub badge_policy: BadgePolicyKind,
    pub thresholds: BadgeThresholds,
    pub rates: RateTable,
    /// How long an idle settlement worker waits on intake before exiting.
    pub intake_timeout_ms: u64,
    /// How long a connection waits for the SQLite write lock.
    pub busy_timeout_ms: u64,
    pub ledger_page_size: usize,
}

impl EngineConfig {
    /// Load from the data/ directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let badge_path = format!("{data_dir}/badges/badge_rules.json");
        let badge_content = std::fs::read_to_string(&badge_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {badge_path}: {e}"))?;
        let badges: BadgeRulesFile = serde_json::from_str(&badge_content)?;

        let rate_path = format!("{data_dir}/commission/rate_table.json");
        let rate_content = std::fs::read_to_string(&rate_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {rate_path}: {e}"))?;
        let rate_file: RateTableFile = serde_json::from_str(&rate_content)?;

        let runtime_path = format!("{data_dir}/engine/runtime.json");
        let runtime_content = std::fs::read_to_string(&runtime_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {runtime_path}: {e}"))?;
        let runtime: RuntimeFile = serde_json::from_str(&runtime_content)?;

        if badges.max_depth == 0 {
            anyhow::bail!("{badge_path}: max_depth must be at least 1");
        }

        Ok(Self {
            max_depth: badges.max_depth,
            qualifying_generations: badges.qualifying_generations,
            badge_policy: badges.policy,
            thresholds: badges.thresholds,
            rates: rate_file.rates,
            intake_timeout_ms: runtime.intake_timeout_ms,
            busy_timeout_ms: runtime.busy_timeout_ms,
            ledger_page_size: runtime.ledger_page_size.max(1),
        })
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        let pct = |n: i64| Some(Rate::Percent(Decimal::from(n)));
        Self {
            max_depth: 6,
            qualifying_generations: 2,
            badge_policy: BadgePolicyKind::PreviousTier,
            thresholds: BadgeThresholds {
                three_star: 3,
                five_star: 3,
                seven_star: 3,
                mega_star: 3,
                giga_star: 3,
            },
            rates: RateTable {
                direct: TierRates { recurring: pct(10), unlock: None },
                three_star: TierRates { recurring: pct(1), unlock: pct(5) },
                five_star: TierRates { recurring: pct(1), unlock: pct(7) },
                seven_star: TierRates { recurring: pct(1), unlock: pct(10) },
                mega_star: TierRates { recurring: pct(1), unlock: pct(12) },
                giga_star: TierRates { recurring: pct(1), unlock: pct(15) },
            },
            intake_timeout_ms: 2_000,
            busy_timeout_ms: 5_000,
            ledger_page_size: 50,
        }
    }

    pub fn cascade_policy(&self) -> Arc<dyn CascadePolicy> {
        match self.badge_policy {
            BadgePolicyKind::PreviousTier => Arc::new(PreviousTierPolicy),
            BadgePolicyKind::DirectReferrals => Arc::new(DirectReferralPolicy),
        }
    }

    pub fn intake_timeout(&self) -> Duration {
        Duration::from_millis(self.intake_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

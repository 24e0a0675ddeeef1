//! commission-core: settlement of paid orders into referral commissions,
//! badge progress and an append-only member ledger.

pub mod ancestry;
pub mod badge;
pub mod badge_evaluator;
pub mod balance;
pub mod commission;
pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod ledger_poster;
pub mod locks;
pub mod member;
pub mod money;
pub mod orchestrator;
pub mod pool;
pub mod query;
pub mod store;
pub mod types;

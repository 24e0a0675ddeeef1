//! Referral ancestry resolver.
//!
//! Walks `referred_by` edges upward from a member and returns the upline in
//! order, nearest first, bounded by the configured depth. Read-only.

use crate::{
    error::{EngineError, EngineResult},
    member::Member,
    store::SettlementStore,
    types::MemberId,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Read access to the referral graph.
pub trait ReferralGraph {
    fn member(&self, member_id: &str) -> EngineResult<Option<Member>>;
}

impl ReferralGraph for SettlementStore {
    fn member(&self, member_id: &str) -> EngineResult<Option<Member>> {
        SettlementStore::member(self, member_id)
    }
}

impl ReferralGraph for HashMap<MemberId, Member> {
    fn member(&self, member_id: &str) -> EngineResult<Option<Member>> {
        Ok(self.get(member_id).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ancestor {
    /// 1 for the direct referrer, 2 for their referrer, and so on.
    pub depth: usize,
    pub member: Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplineChain {
    pub member: Member,
    pub ancestors: Vec<Ancestor>,
}

impl UplineChain {
    pub fn direct(&self) -> Option<&Member> {
        self.ancestors.first().map(|a| &a.member)
    }

    /// Ancestors no more than `generations` levels up.
    pub fn within(&self, generations: usize) -> &[Ancestor] {
        &self.ancestors[..generations.min(self.ancestors.len())]
    }

    pub fn ids(&self) -> Vec<MemberId> {
        self.ancestors
            .iter()
            .map(|a| a.member.member_id.clone())
            .collect()
    }
}

pub struct AncestryResolver<'g, G: ReferralGraph + ?Sized> {
    graph: &'g G,
    max_depth: usize,
}

impl<'g, G: ReferralGraph + ?Sized> AncestryResolver<'g, G> {
    pub fn new(graph: &'g G, max_depth: usize) -> Self {
        Self { graph, max_depth }
    }

    /// The ordered upline of `member_id`.
    ///
    /// Fails with MemberNotFound if the start member does not exist, and with
    /// CycleDetected if the walk revisits a member. A `referred_by` pointing
    /// at a missing member ends the chain there.
    pub fn resolve(&self, member_id: &str) -> EngineResult<UplineChain> {
        let start = self
            .graph
            .member(member_id)?
            .ok_or_else(|| EngineError::MemberNotFound {
                member_id: member_id.to_string(),
            })?;

        let mut seen: HashSet<MemberId> = HashSet::from([start.member_id.clone()]);
        let mut ancestors: Vec<Ancestor> = Vec::new();
        let mut next = start.referred_by.clone();

        while let Some(parent_id) = next.take() {
            if ancestors.len() >= self.max_depth {
                break;
            }
            if !seen.insert(parent_id.clone()) {
                return Err(EngineError::CycleDetected {
                    member_id: member_id.to_string(),
                    revisited: parent_id,
                });
            }
            let Some(parent) = self.graph.member(&parent_id)? else {
                log::warn!("dangling referral edge: {parent_id} does not exist");
                break;
            };
            next = parent.referred_by.clone();
            ancestors.push(Ancestor {
                depth: ancestors.len() + 1,
                member: parent,
            });
        }

        Ok(UplineChain {
            member: start,
            ancestors,
        })
    }
}

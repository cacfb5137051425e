//! Leader Tracker: one leader per cluster, biased toward last cycle's incumbent.

use crate::EntityId;
use crate::cluster::HerdCluster;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Leader assignments for one (world, species) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaderState {
    pub member_to_leader: HashMap<EntityId, EntityId>,
    pub leader_follower_count: HashMap<EntityId, usize>,
}

impl LeaderState {
    #[must_use]
    pub fn leader_of(&self, member: EntityId) -> Option<EntityId> {
        self.member_to_leader.get(&member).copied()
    }

    #[must_use]
    pub fn is_leader(&self, id: EntityId) -> bool {
        self.leader_of(id) == Some(id)
    }

    #[must_use]
    pub fn follower_count(&self, leader: EntityId) -> usize {
        self.leader_follower_count.get(&leader).copied().unwrap_or(0)
    }

    /// Number of leaders currently recorded.
    #[must_use]
    pub fn leader_count(&self) -> usize {
        self.leader_follower_count.len()
    }

    /// Record `leader` for every member of `cluster`.
    pub fn assign(&mut self, cluster: &HerdCluster, leader: EntityId) {
        for member in &cluster.members {
            self.member_to_leader.insert(*member, leader);
        }
        self.leader_follower_count
            .insert(leader, cluster.len().saturating_sub(1));
    }

    /// Forget a creature; when it led a herd the herd becomes leaderless.
    pub fn forget(&mut self, id: EntityId) {
        self.member_to_leader.remove(&id);
        if self.leader_follower_count.remove(&id).is_some() {
            self.member_to_leader.retain(|_, leader| *leader != id);
        }
    }
}

/// Pick the leader of `cluster` given the previous cycle's assignments.
///
/// Incumbents (members that led themselves last cycle) with the highest
/// recorded follower count are preferred, ties broken uniformly at random.
/// Without an incumbent a uniformly random member is chosen.
pub fn elect_leader<R: Rng + ?Sized>(
    cluster: &HerdCluster,
    previous: &LeaderState,
    rng: &mut R,
) -> Option<EntityId> {
    if cluster.is_empty() {
        return None;
    }

    let mut best = Vec::new();
    let mut best_count = 0;
    for member in &cluster.members {
        if !previous.is_leader(*member) {
            continue;
        }
        let count = previous.follower_count(*member);
        if best.is_empty() || count > best_count {
            best.clear();
            best.push(*member);
            best_count = count;
        } else if count == best_count {
            best.push(*member);
        }
    }

    let pool = if best.is_empty() {
        &cluster.members
    } else {
        &best
    };
    Some(pool[rng.random_range(0..pool.len())])
}

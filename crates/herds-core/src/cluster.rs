//! Cluster Builder: partitions one species' creatures into connected herds.

use crate::world::EntitySnapshot;
use crate::{EntityId, Position};
use herds_index::{IndexError, NeighborhoodIndex, UniformGridIndex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One connected group of same-species creatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HerdCluster {
    /// Members in traversal order.
    pub members: Vec<EntityId>,
    /// Mean member position at build time.
    pub center: Position,
}

impl HerdCluster {
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.members.contains(&id)
    }
}

/// Connected components of `creatures` under `distance <= radius`.
///
/// Invalid snapshots (dead, zero health, non-finite position) are skipped and
/// never bridge two groups. Each creature is visited once, and neighbour
/// enumeration goes through a bucket grid so only nearby pairs are measured.
pub fn build_clusters(
    creatures: &[EntitySnapshot],
    radius: f64,
) -> Result<Vec<HerdCluster>, IndexError> {
    let valid: Vec<&EntitySnapshot> = creatures
        .iter()
        .filter(|snapshot| snapshot.is_valid() && snapshot.position.is_finite())
        .collect();
    if valid.is_empty() {
        return Ok(Vec::new());
    }

    let positions: Vec<[f64; 3]> = valid.iter().map(|s| s.position.to_array()).collect();
    let mut index = UniformGridIndex::new(radius.max(1.0));
    index.rebuild(&positions)?;
    let radius_sq = radius.max(0.0).powi(2);

    let mut visited = vec![false; valid.len()];
    let mut queue = VecDeque::new();
    let mut clusters = Vec::new();

    for start in 0..valid.len() {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);
        let mut members = Vec::new();
        let (mut sx, mut sy, mut sz) = (0.0, 0.0, 0.0);

        while let Some(idx) = queue.pop_front() {
            let snapshot = valid[idx];
            members.push(snapshot.id);
            sx += snapshot.position.x;
            sy += snapshot.position.y;
            sz += snapshot.position.z;
            index.neighbors_within(idx, radius_sq, &mut |other, _| {
                if !visited[other] {
                    visited[other] = true;
                    queue.push_back(other);
                }
            });
        }

        let n = members.len() as f64;
        clusters.push(HerdCluster {
            members,
            center: Position::new(sx / n, sy / n, sz / n),
        });
    }

    Ok(clusters)
}

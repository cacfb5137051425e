//! Reporting surface: herd snapshots for operator queries and per-tick counters.

use crate::{Biome, EntityId, EntityKind, Position, Tick, WorldId};
use serde::{Deserialize, Serialize};

/// One cached herd as seen at the end of its latest pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HerdSnapshot {
    pub world: WorldId,
    pub species: EntityKind,
    pub leader: EntityId,
    pub leader_position: Position,
    pub population: usize,
    pub biome: Biome,
}

/// Filter applied by [`crate::HerdEngine::snapshots`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotFilter {
    pub world: Option<WorldId>,
    pub species: Option<EntityKind>,
    pub biome: Option<Biome>,
    /// Centre and horizontal radius the leader must lie within.
    pub near: Option<(Position, f64)>,
    pub min_population: usize,
}

impl SnapshotFilter {
    #[must_use]
    pub fn matches(&self, snapshot: &HerdSnapshot) -> bool {
        if self.world.is_some_and(|world| world != snapshot.world) {
            return false;
        }
        if self
            .species
            .as_ref()
            .is_some_and(|species| *species != snapshot.species)
        {
            return false;
        }
        if self
            .biome
            .as_ref()
            .is_some_and(|biome| *biome != snapshot.biome)
        {
            return false;
        }
        if let Some((center, radius)) = self.near {
            if snapshot.leader_position.horizontal_distance_squared(center) > radius * radius {
                return false;
            }
        }
        snapshot.population >= self.min_population
    }
}

/// Counters aggregated over every (world, species) pair in one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: Tick,
    pub pairs_processed: usize,
    pub failed_pairs: usize,
    pub clusters_rebuilt: usize,
    pub herds: usize,
    pub threats: usize,
    pub ignored_predators: usize,
    pub flee_moves: usize,
    pub cohesion_moves: usize,
    pub wander_moves: usize,
    pub graze_moves: usize,
    pub grazed: usize,
    pub culled_soft_cap: usize,
    pub culled_density: usize,
    pub culled_night_cap: usize,
    pub culled_overcrowding: usize,
    pub drowned: usize,
    pub removed_invalid: usize,
    pub births: usize,
    pub spawn_failures: usize,
    pub cancelled: bool,
}

impl TickReport {
    #[must_use]
    pub fn new(tick: Tick) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    /// All soft kills and removals issued this tick.
    #[must_use]
    pub fn culls(&self) -> usize {
        self.culled_soft_cap
            + self.culled_density
            + self.culled_night_cap
            + self.culled_overcrowding
            + self.drowned
            + self.removed_invalid
    }

    #[must_use]
    pub fn moves(&self) -> usize {
        self.flee_moves + self.cohesion_moves + self.wander_moves + self.graze_moves
    }

    /// Fold another tick's counters into this one.
    pub fn absorb(&mut self, other: &TickReport) {
        self.tick = self.tick.max(other.tick);
        self.pairs_processed += other.pairs_processed;
        self.failed_pairs += other.failed_pairs;
        self.clusters_rebuilt += other.clusters_rebuilt;
        self.herds += other.herds;
        self.threats += other.threats;
        self.ignored_predators += other.ignored_predators;
        self.flee_moves += other.flee_moves;
        self.cohesion_moves += other.cohesion_moves;
        self.wander_moves += other.wander_moves;
        self.graze_moves += other.graze_moves;
        self.grazed += other.grazed;
        self.culled_soft_cap += other.culled_soft_cap;
        self.culled_density += other.culled_density;
        self.culled_night_cap += other.culled_night_cap;
        self.culled_overcrowding += other.culled_overcrowding;
        self.drowned += other.drowned;
        self.removed_invalid += other.removed_invalid;
        self.births += other.births;
        self.spawn_failures += other.spawn_failures;
        self.cancelled |= other.cancelled;
    }
}

//! Per (world, species) herd state kept between ticks.

use crate::cluster::HerdCluster;
use crate::leader::LeaderState;
use crate::movement::FleeTier;
use crate::report::HerdSnapshot;
use crate::threat::ThreatCache;
use crate::{EntityId, EntityKind, Tick, WorldId};
use std::collections::{HashMap, HashSet};

/// A cluster together with the leader elected for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Herd {
    pub cluster: HerdCluster,
    pub leader: EntityId,
}

/// A block picked for grazing, waiting for an eater to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrazeTarget {
    pub block: (i32, i32, i32),
    /// Standable position next to the block.
    pub stand: (i32, i32, i32),
}

/// Everything the engine remembers about one species in one world.
#[derive(Debug, Clone)]
pub struct HerdCache {
    pub world: WorldId,
    pub species: EntityKind,
    pub leaders: LeaderState,
    pub threats: ThreatCache,
    /// Herds from the latest rebuild; reused until the next one.
    pub herds: Vec<Herd>,
    /// Report rows as of the latest pass.
    pub snapshots: Vec<HerdSnapshot>,
    pub last_rebuild: Option<Tick>,
    pub last_population_pass: Option<Tick>,
    pub last_reproduction_pass: Option<Tick>,
    pub last_overcrowding_pass: Option<Tick>,
    /// Day index of the last night-time total-cap cull.
    pub night_cull_day: Option<u64>,

    pub last_graze: HashMap<EntityId, Tick>,
    pub next_graze: HashMap<EntityId, Tick>,
    pub graze_targets: HashMap<EntityId, GrazeTarget>,
    pub last_cull: HashMap<EntityId, Tick>,
    pub last_reproduce: HashMap<EntityId, Tick>,
    pub last_wander: HashMap<EntityId, Tick>,
    pub panic_until: HashMap<EntityId, Tick>,
    pub next_path: HashMap<EntityId, Tick>,
    pub flee_tier: HashMap<EntityId, FleeTier>,
    pub drowning_since: HashMap<EntityId, Tick>,
}

impl HerdCache {
    #[must_use]
    pub fn new(world: WorldId, species: EntityKind) -> Self {
        Self {
            world,
            species,
            leaders: LeaderState::default(),
            threats: ThreatCache::default(),
            herds: Vec::new(),
            snapshots: Vec::new(),
            last_rebuild: None,
            last_population_pass: None,
            last_reproduction_pass: None,
            last_overcrowding_pass: None,
            night_cull_day: None,
            last_graze: HashMap::new(),
            next_graze: HashMap::new(),
            graze_targets: HashMap::new(),
            last_cull: HashMap::new(),
            last_reproduce: HashMap::new(),
            last_wander: HashMap::new(),
            panic_until: HashMap::new(),
            next_path: HashMap::new(),
            flee_tier: HashMap::new(),
            drowning_since: HashMap::new(),
        }
    }

    /// Whether a cluster rebuild is due at `now` for the given interval.
    #[must_use]
    pub fn rebuild_due(&self, now: Tick, interval: u64) -> bool {
        interval > 0
            && self
                .last_rebuild
                .is_none_or(|last| now.since(last) >= interval)
    }

    /// Herd led by `leader`, if any.
    #[must_use]
    pub fn herd_of_leader(&self, leader: EntityId) -> Option<&Herd> {
        self.herds.iter().find(|herd| herd.leader == leader)
    }

    /// Drop per-creature entries for creatures absent from `live`, and threat
    /// entries for ids that no longer lead a herd.
    pub fn prune(&mut self, live: &HashSet<EntityId>) {
        self.last_graze.retain(|id, _| live.contains(id));
        self.next_graze.retain(|id, _| live.contains(id));
        self.graze_targets.retain(|id, _| live.contains(id));
        self.last_cull.retain(|id, _| live.contains(id));
        self.last_reproduce.retain(|id, _| live.contains(id));
        self.last_wander.retain(|id, _| live.contains(id));
        self.panic_until.retain(|id, _| live.contains(id));
        self.next_path.retain(|id, _| live.contains(id));
        self.flee_tier.retain(|id, _| live.contains(id));
        self.drowning_since.retain(|id, _| live.contains(id));
        let leaders = &self.leaders;
        self.threats.retain(|id| leaders.is_leader(id));
    }

    /// Forget a creature that was culled or removed this tick.
    pub fn forget(&mut self, id: EntityId) {
        self.last_graze.remove(&id);
        self.next_graze.remove(&id);
        self.graze_targets.remove(&id);
        self.last_cull.remove(&id);
        self.last_reproduce.remove(&id);
        self.last_wander.remove(&id);
        self.panic_until.remove(&id);
        self.next_path.remove(&id);
        self.flee_tier.remove(&id);
        self.drowning_since.remove(&id);
        self.threats.clear(id);
    }

    /// Total tracked per-creature entries, for diagnostics.
    #[must_use]
    pub fn tracked_entries(&self) -> usize {
        self.last_graze.len()
            + self.next_graze.len()
            + self.graze_targets.len()
            + self.last_cull.len()
            + self.last_reproduce.len()
            + self.last_wander.len()
            + self.panic_until.len()
            + self.next_path.len()
            + self.flee_tier.len()
            + self.drowning_since.len()
    }
}

/// Herd caches keyed by (world, species); created on first use and kept for
/// the engine's lifetime.
#[derive(Debug, Clone, Default)]
pub struct HerdCacheStore {
    caches: HashMap<(WorldId, EntityKind), HerdCache>,
}

impl HerdCacheStore {
    pub fn entry(&mut self, world: WorldId, species: &EntityKind) -> &mut HerdCache {
        self.caches
            .entry((world, species.clone()))
            .or_insert_with(|| HerdCache::new(world, species.clone()))
    }

    #[must_use]
    pub fn get(&self, world: WorldId, species: &EntityKind) -> Option<&HerdCache> {
        self.caches.get(&(world, species.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &HerdCache> {
        self.caches.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Position;
    use crate::threat::Threat;

    #[test]
    fn rebuild_due_honours_interval() {
        let mut cache = HerdCache::new(WorldId(0), EntityKind::from_static("cow"));
        assert!(cache.rebuild_due(Tick(0), 100));
        assert!(!cache.rebuild_due(Tick(0), 0));
        cache.last_rebuild = Some(Tick(10));
        assert!(!cache.rebuild_due(Tick(109), 100));
        assert!(cache.rebuild_due(Tick(110), 100));
    }

    #[test]
    fn prune_drops_departed_creatures_and_former_leaders() {
        let mut cache = HerdCache::new(WorldId(0), EntityKind::from_static("cow"));
        let herd = HerdCluster {
            members: vec![EntityId(1), EntityId(2)],
            center: Position::default(),
        };
        cache.leaders.assign(&herd, EntityId(1));
        for id in [1, 2, 3] {
            cache.last_graze.insert(EntityId(id), Tick(5));
            cache.drowning_since.insert(EntityId(id), Tick(5));
            cache.threats.record(
                EntityId(id),
                Threat {
                    source: EntityId(99),
                    position: Position::default(),
                    observed: Tick(5),
                },
            );
        }
        let live: HashSet<EntityId> = [EntityId(1), EntityId(2)].into_iter().collect();
        cache.prune(&live);
        assert_eq!(cache.last_graze.len(), 2);
        assert!(!cache.drowning_since.contains_key(&EntityId(3)));
        assert_eq!(cache.threats.len(), 1);
        assert!(cache.threats.get(EntityId(1), Tick(5), 5).is_some());
        assert_eq!(cache.tracked_entries(), 4);
    }

    #[test]
    fn store_creates_one_cache_per_pair() {
        let mut store = HerdCacheStore::default();
        let cow = EntityKind::from_static("cow");
        let sheep = EntityKind::from_static("sheep");
        store.entry(WorldId(0), &cow).last_rebuild = Some(Tick(3));
        store.entry(WorldId(0), &sheep);
        store.entry(WorldId(1), &cow);
        assert_eq!(store.len(), 3);
        assert_eq!(
            store.get(WorldId(0), &cow).and_then(|c| c.last_rebuild),
            Some(Tick(3))
        );
        assert!(store.get(WorldId(2), &cow).is_none());
    }
}

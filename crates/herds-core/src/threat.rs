//! Predator Threat Resolver with its chunk-level predator cache and the
//! per-leader threat cache.

use crate::config::SpeciesConfig;
use crate::world::{EntitySnapshot, GameMode, WorldQuery};
use crate::{CHUNK_SIZE, ChunkPos, EntityId, EntityKind, Position, Tick, WorldId, stagger_due};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use tracing::{info, trace};

/// The configured predator kinds plus a stable signature for cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredatorSet {
    kinds: Vec<EntityKind>,
    signature: u64,
}

impl PredatorSet {
    #[must_use]
    pub fn new(kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        let mut kinds: Vec<EntityKind> = kinds.into_iter().collect();
        kinds.sort();
        kinds.dedup();
        let mut hasher = DefaultHasher::new();
        kinds.hash(&mut hasher);
        Self {
            signature: hasher.finish(),
            kinds,
        }
    }

    #[must_use]
    pub fn contains(&self, kind: &EntityKind) -> bool {
        self.kinds.binary_search(kind).is_ok()
    }

    #[must_use]
    pub fn signature(&self) -> u64 {
        self.signature
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Why a predator-kind entity was not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Threat,
    NotPredator,
    Dead,
    Tamed,
    NotSurvival,
}

fn classify(entity: &EntitySnapshot, predators: &PredatorSet) -> Verdict {
    if !predators.contains(&entity.kind) {
        return Verdict::NotPredator;
    }
    if !entity.is_valid() {
        return Verdict::Dead;
    }
    if entity.kind.is_player() {
        return match entity.game_mode {
            Some(GameMode::Survival) => Verdict::Threat,
            Some(_) | None => Verdict::NotSurvival,
        };
    }
    if entity.tamed {
        return Verdict::Tamed;
    }
    Verdict::Threat
}

/// A detected predator location relevant to one leader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threat {
    pub source: EntityId,
    pub position: Position,
    pub observed: Tick,
}

#[derive(Debug, Clone)]
struct ChunkEntry {
    predators: SmallVec<[EntityId; 4]>,
    built: Tick,
}

/// Short-lived list of predator ids per (world, chunk, predator signature).
#[derive(Debug, Clone, Default)]
pub struct PredatorChunkCache {
    ttl_ticks: u64,
    entries: HashMap<(WorldId, ChunkPos, u64), ChunkEntry>,
    rebuilds: u64,
}

impl PredatorChunkCache {
    #[must_use]
    pub fn new(ttl_ticks: u64) -> Self {
        Self {
            ttl_ticks: ttl_ticks.max(1),
            entries: HashMap::new(),
            rebuilds: 0,
        }
    }

    /// Predator ids in `chunk`, rebuilt from the world when absent or expired.
    pub fn predators_in(
        &mut self,
        world: &dyn WorldQuery,
        chunk: ChunkPos,
        predators: &PredatorSet,
        now: Tick,
    ) -> &[EntityId] {
        let key = (world.id(), chunk, predators.signature());
        let ttl = self.ttl_ticks;
        let fresh = self
            .entries
            .get(&key)
            .is_some_and(|entry| now.since(entry.built) < ttl);
        if !fresh {
            let ids = world
                .entities_in_chunk(chunk)
                .into_iter()
                .filter(|entity| predators.contains(&entity.kind) && entity.is_valid())
                .map(|entity| entity.id)
                .collect();
            self.rebuilds += 1;
            self.entries.insert(
                key,
                ChunkEntry {
                    predators: ids,
                    built: now,
                },
            );
        }
        self.entries
            .get(&key)
            .map_or(&[][..], |entry| entry.predators.as_slice())
    }

    /// Drop entries older than the TTL.
    pub fn purge_expired(&mut self, now: Tick) {
        let ttl = self.ttl_ticks;
        self.entries.retain(|_, entry| now.since(entry.built) < ttl);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total chunk scans performed so far.
    #[must_use]
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

/// Last known threat per leader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatCache {
    entries: HashMap<EntityId, Threat>,
}

impl ThreatCache {
    /// The cached threat for `leader` if it is at most `ttl` ticks old.
    #[must_use]
    pub fn get(&self, leader: EntityId, now: Tick, ttl: u64) -> Option<Threat> {
        self.entries
            .get(&leader)
            .filter(|threat| now.since(threat.observed) <= ttl)
            .copied()
    }

    pub fn record(&mut self, leader: EntityId, threat: Threat) {
        self.entries.insert(leader, threat);
    }

    pub fn clear(&mut self, leader: EntityId) {
        self.entries.remove(&leader);
    }

    pub fn retain(&mut self, mut keep: impl FnMut(EntityId) -> bool) {
        self.entries.retain(|leader, _| keep(*leader));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything a threat lookup needs besides the leader itself.
pub struct ThreatResolver<'a> {
    pub world: &'a dyn WorldQuery,
    pub predators: &'a PredatorSet,
    pub chunk_cache: &'a mut PredatorChunkCache,
    pub threat_ttl_ticks: u64,
    pub notices: bool,
    /// Predators skipped because they were tamed or not in survival mode.
    pub ignored: usize,
}

impl ThreatResolver<'_> {
    /// Resolve the threat facing `leader` on tick `now`.
    ///
    /// The panic-range scan always runs. The wide scan runs on the leader's
    /// staggered ticks; otherwise the cached threat is reused within its TTL.
    pub fn resolve(
        &mut self,
        leader: &EntitySnapshot,
        species: &SpeciesConfig,
        now: Tick,
        cache: &mut ThreatCache,
    ) -> Option<Threat> {
        if self.predators.is_empty() {
            cache.clear(leader.id);
            return None;
        }

        let near = self.world.entities_near(leader.position, species.panic_range);
        if let Some(threat) = self.nearest(leader, near.iter(), species.panic_range, now) {
            trace!(leader = %leader.id, source = %threat.source, "panic-range threat");
            cache.record(leader.id, threat);
            return Some(threat);
        }

        if !stagger_due(now, leader.id, species.threat_check_interval_ticks) {
            return cache.get(leader.id, now, self.threat_ttl_ticks);
        }

        match self.wide_scan(leader, species, now) {
            Some(threat) => {
                cache.record(leader.id, threat);
                Some(threat)
            }
            None => {
                cache.clear(leader.id);
                None
            }
        }
    }

    fn wide_scan(
        &mut self,
        leader: &EntitySnapshot,
        species: &SpeciesConfig,
        now: Tick,
    ) -> Option<Threat> {
        let radius_chunks = (species.awareness_distance / f64::from(CHUNK_SIZE)).ceil() as i32;
        let awareness_sq = species.awareness_distance.powi(2);
        let panic_sq = species.panic_range.powi(2);
        let mut best: Option<(f64, Threat)> = None;

        for chunk in leader.position.chunk().square(radius_chunks) {
            if !self.world.is_chunk_loaded(chunk) {
                continue;
            }
            let ids: SmallVec<[EntityId; 8]> = self
                .chunk_cache
                .predators_in(self.world, chunk, self.predators, now)
                .iter()
                .copied()
                .collect();
            for id in ids {
                let Some(entity) = self.world.entity(id) else {
                    continue;
                };
                if !self.qualifies(leader, &entity) {
                    continue;
                }
                let dist_sq = entity.position.distance_squared(leader.position);
                if dist_sq > awareness_sq {
                    continue;
                }
                let threat = Threat {
                    source: entity.id,
                    position: entity.position,
                    observed: now,
                };
                if dist_sq <= panic_sq {
                    return Some(threat);
                }
                if best.is_none_or(|(d, _)| dist_sq < d) {
                    best = Some((dist_sq, threat));
                }
            }
        }
        best.map(|(_, threat)| threat)
    }

    fn nearest<'e>(
        &mut self,
        leader: &EntitySnapshot,
        entities: impl Iterator<Item = &'e EntitySnapshot>,
        range: f64,
        now: Tick,
    ) -> Option<Threat> {
        let range_sq = range * range;
        let mut best: Option<(f64, &EntitySnapshot)> = None;
        for entity in entities {
            if entity.id == leader.id || !self.qualifies(leader, entity) {
                continue;
            }
            let dist_sq = entity.position.distance_squared(leader.position);
            if dist_sq <= range_sq && best.is_none_or(|(d, _)| dist_sq < d) {
                best = Some((dist_sq, entity));
            }
        }
        best.map(|(_, entity)| Threat {
            source: entity.id,
            position: entity.position,
            observed: now,
        })
    }

    fn qualifies(&mut self, leader: &EntitySnapshot, entity: &EntitySnapshot) -> bool {
        match classify(entity, self.predators) {
            Verdict::Threat => true,
            Verdict::NotPredator | Verdict::Dead => false,
            verdict @ (Verdict::Tamed | Verdict::NotSurvival) => {
                self.ignored += 1;
                if self.notices {
                    let reason = if verdict == Verdict::Tamed {
                        "tamed"
                    } else {
                        "not in survival mode"
                    };
                    info!(
                        target: "herds::notice",
                        leader = %leader.id,
                        predator = %entity.id,
                        kind = %entity.kind,
                        reason,
                        "ignored predator"
                    );
                }
                false
            }
        }
    }
}

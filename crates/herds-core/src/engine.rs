//! Engine facade invoked by the tick driver: one pass per (world, species)
//! pair, plus the cancelable hazard maintenance task and the herd report.

use crate::cache::{Herd, HerdCacheStore};
use crate::cluster::build_clusters;
use crate::config::{EngineConfig, SpeciesConfig};
use crate::hazard::HazardMap;
use crate::leader::{LeaderState, elect_leader};
use crate::movement::{MoveTally, MovementPlanner};
use crate::population::{PopulationController, PopulationCounts};
use crate::report::{HerdSnapshot, SnapshotFilter, TickReport};
use crate::reproduction::{BirthOutcome, ReproductionScheduler};
use crate::threat::{PredatorChunkCache, PredatorSet, ThreatResolver};
use crate::world::{EntitySnapshot, WorldError, WorldQuery};
use crate::{EntityId, EntityKind, Position, TICKS_PER_DAY, Tick, is_night};
use herds_index::IndexError;
use rand::rngs::SmallRng;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of one (world, species) pass. Never escapes [`HerdEngine::tick`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    World(#[from] WorldError),
    #[error("cluster index: {0}")]
    Index(#[from] IndexError),
}

/// Cooperative cancellation flag shared between a driver and the engine.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Herd behaviour engine. Owns every cache and the single random source.
pub struct HerdEngine {
    config: Arc<EngineConfig>,
    rng: SmallRng,
    caches: HerdCacheStore,
    hazard: HazardMap,
    chunk_cache: PredatorChunkCache,
    predators: PredatorSet,
    debug_notices: bool,
}

impl HerdEngine {
    /// Create an engine; the configuration is clamped first.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let config = config.clamped();
        let rng = config.seeded_rng();
        let hazard = HazardMap::new(config.hazard.clone());
        let chunk_cache = PredatorChunkCache::new(config.chunk_cache_ttl_ticks);
        let predators = PredatorSet::new(config.predators.iter().cloned());
        let debug_notices = config.debug_notices;
        Self {
            config: Arc::new(config),
            rng,
            caches: HerdCacheStore::default(),
            hazard,
            chunk_cache,
            predators,
            debug_notices,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Toggle the cull and ignored-predator notice sink.
    pub fn set_debug_notices(&mut self, enabled: bool) {
        self.debug_notices = enabled;
    }

    #[must_use]
    pub fn debug_notices(&self) -> bool {
        self.debug_notices
    }

    #[must_use]
    pub fn caches(&self) -> &HerdCacheStore {
        &self.caches
    }

    #[must_use]
    pub fn hazard(&self) -> &HazardMap {
        &self.hazard
    }

    #[must_use]
    pub fn chunk_cache(&self) -> &PredatorChunkCache {
        &self.chunk_cache
    }

    /// Run one tick over every (world, species) pair.
    pub fn tick(&mut self, now: Tick, worlds: &mut [&mut dyn WorldQuery]) -> TickReport {
        self.tick_until_cancelled(now, worlds, &CancelToken::new())
    }

    /// Run one tick, checking `cancel` between pairs. A failing pair is
    /// logged and counted; the remaining pairs still run.
    pub fn tick_until_cancelled(
        &mut self,
        now: Tick,
        worlds: &mut [&mut dyn WorldQuery],
        cancel: &CancelToken,
    ) -> TickReport {
        let config = Arc::clone(&self.config);
        let mut report = TickReport::new(now);
        for world in worlds.iter_mut() {
            for (kind, species) in &config.species {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    return report;
                }
                match self.process_pair(now, &mut **world, kind, species) {
                    Ok(pair) => report.absorb(&pair),
                    Err(error) => {
                        warn!(world = world.id().0, species = %kind, %error, "herd pass failed");
                        report.failed_pairs += 1;
                    }
                }
            }
        }
        report
    }

    /// Whether the periodic maintenance task should run on `now`.
    #[must_use]
    pub fn maintenance_due(&self, now: Tick) -> bool {
        now.0
            .is_multiple_of(self.config.hazard.maintenance_interval_ticks.max(1))
    }

    /// Refresh hazard regions around loaded chunks in a bounded batch per
    /// world and purge expired predator chunk entries. Returns the number of
    /// regions built; stops early once `cancel` is set.
    pub fn maintain(
        &mut self,
        now: Tick,
        worlds: &[&dyn WorldQuery],
        cancel: &CancelToken,
    ) -> usize {
        let mut built = 0;
        for world in worlds {
            if cancel.is_cancelled() {
                break;
            }
            built += self
                .hazard
                .maintain(*world, now, || cancel.is_cancelled());
        }
        self.chunk_cache.purge_expired(now);
        built
    }

    /// Cached herds matching `filter`, largest first.
    #[must_use]
    pub fn snapshots(&self, filter: &SnapshotFilter) -> Vec<HerdSnapshot> {
        let mut rows: Vec<HerdSnapshot> = self
            .caches
            .iter()
            .flat_map(|cache| cache.snapshots.iter())
            .filter(|snapshot| filter.matches(snapshot))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.population
                .cmp(&a.population)
                .then_with(|| a.world.cmp(&b.world))
                .then_with(|| a.leader.cmp(&b.leader))
        });
        rows
    }

    fn process_pair(
        &mut self,
        now: Tick,
        world: &mut dyn WorldQuery,
        kind: &EntityKind,
        species: &SpeciesConfig,
    ) -> Result<TickReport, EngineError> {
        let mut report = TickReport::new(now);
        report.pairs_processed = 1;

        let mut creatures = world.creatures(kind)?;
        let world_id = world.id();
        let notices = self.debug_notices;
        let cache = self.caches.entry(world_id, kind);
        let mut counts = PopulationCounts::tally(&*world, &creatures);

        report.drowned = PopulationController {
            world: &mut *world,
            species,
            rng: &mut self.rng,
            now,
            notices,
        }
        .drowning(cache, &mut counts, &creatures);
        if report.drowned > 0 {
            creatures.retain(|c| counts.placement(c.id).is_some());
        }

        if cache.rebuild_due(now, species.herd_update_interval_ticks) {
            let clusters = build_clusters(&creatures, species.connectivity_radius)?;
            let mut leaders = LeaderState::default();
            let mut herds = Vec::with_capacity(clusters.len());
            for cluster in clusters {
                let Some(leader) = elect_leader(&cluster, &cache.leaders, &mut self.rng) else {
                    continue;
                };
                leaders.assign(&cluster, leader);
                herds.push(Herd { cluster, leader });
            }
            cache.leaders = leaders;
            cache.herds = herds;

            let live: HashSet<EntityId> = creatures
                .iter()
                .filter(|c| c.is_valid())
                .map(|c| c.id)
                .collect();
            cache.prune(&live);
            cache.last_rebuild = Some(now);
            report.clusters_rebuilt = cache.herds.len();
            debug!(
                world = world_id.0,
                species = %kind,
                herds = cache.herds.len(),
                creatures = live.len(),
                "herds rebuilt"
            );
        }

        let time_of_day = world.time_of_day();
        let night = is_night(time_of_day);
        let population_due = interval_due(
            cache.last_population_pass,
            now,
            species.population_interval_ticks,
        );
        let reproduction_due = interval_due(
            cache.last_reproduction_pass,
            now,
            species.reproduction_interval_ticks,
        );
        let overcrowding_due = interval_due(
            cache.last_overcrowding_pass,
            now,
            species.overcrowding_interval_ticks,
        );

        let mut herds = std::mem::take(&mut cache.herds);
        report.herds = herds.len();
        for herd in &mut herds {
            let (members, invalid) = live_members(&*world, herd);
            let leader = members.iter().find(|m| m.id == herd.leader).cloned();

            if let Some(leader) = &leader {
                let mut resolver = ThreatResolver {
                    world: &*world,
                    predators: &self.predators,
                    chunk_cache: &mut self.chunk_cache,
                    threat_ttl_ticks: self.config.threat_ttl_ticks,
                    notices,
                    ignored: 0,
                };
                let threat = resolver.resolve(leader, species, now, &mut cache.threats);
                report.ignored_predators += resolver.ignored;

                let mut planner = MovementPlanner {
                    world: &mut *world,
                    hazard: &mut self.hazard,
                    species,
                    rng: &mut self.rng,
                    now,
                    night,
                };
                let tally = match threat {
                    Some(threat) => {
                        report.threats += 1;
                        planner.flee(cache, centroid(&members), &members, leader, &threat)
                    }
                    None => {
                        let mut tally = MoveTally::default();
                        if !night {
                            let grazing = planner.graze(cache, &members, leader);
                            tally.graze_moves = grazing.graze_moves;
                            tally.grazed = grazing.grazed;
                            tally.wander = usize::from(planner.wander(cache, leader));
                        }
                        tally.cohesion = planner.cohere(cache, &members, leader);
                        tally
                    }
                };
                report.flee_moves += tally.flee;
                report.cohesion_moves += tally.cohesion;
                report.wander_moves += tally.wander;
                report.graze_moves += tally.graze_moves;
                report.grazed += tally.grazed;
            }

            if population_due {
                let culls = PopulationController {
                    world: &mut *world,
                    species,
                    rng: &mut self.rng,
                    now,
                    notices,
                }
                .control_herd(cache, &mut counts, herd, &members, &invalid);
                report.culled_soft_cap += culls.soft_cap;
                report.culled_density += culls.density;
                report.removed_invalid += culls.removed_invalid;
            }

            if overcrowding_due {
                let (crowd, _) = live_members(&*world, herd);
                report.culled_overcrowding += PopulationController {
                    world: &mut *world,
                    species,
                    rng: &mut self.rng,
                    now,
                    notices,
                }
                .cull_over_capacity(cache, &mut counts, herd, &crowd);
            }

            if reproduction_due && leader.is_some() {
                let (parents, _) = live_members(&*world, herd);
                let outcome = ReproductionScheduler {
                    world: &mut *world,
                    kind,
                    species,
                    rng: &mut self.rng,
                    now,
                }
                .reproduce(cache, &counts, herd, &parents);
                match outcome {
                    BirthOutcome::Born { offspring, .. } => {
                        herd.cluster.members.push(offspring);
                        report.births += 1;
                    }
                    BirthOutcome::SpawnFailed => report.spawn_failures += 1,
                    BirthOutcome::Gated | BirthOutcome::NoPair => {}
                }
            }
        }

        let day = world.full_time() / TICKS_PER_DAY;
        if night && cache.night_cull_day != Some(day) {
            cache.night_cull_day = Some(day);
            let rosters: Vec<(Herd, Vec<EntitySnapshot>)> = herds
                .iter()
                .map(|herd| (herd.clone(), live_members(&*world, herd).0))
                .collect();
            report.culled_night_cap = PopulationController {
                world: &mut *world,
                species,
                rng: &mut self.rng,
                now,
                notices,
            }
            .night_cap(cache, &mut counts, &rosters);
        }

        cache.snapshots = herd_rows(&*world, kind, &herds);
        cache.herds = herds;
        if population_due {
            cache.last_population_pass = Some(now);
        }
        if reproduction_due {
            cache.last_reproduction_pass = Some(now);
        }
        if overcrowding_due {
            cache.last_overcrowding_pass = Some(now);
        }
        Ok(report)
    }
}

fn interval_due(last: Option<Tick>, now: Tick, interval: u64) -> bool {
    interval > 0 && last.is_none_or(|last| now.since(last) >= interval)
}

/// Report rows for herds whose leader is still alive, counted from live members.
fn herd_rows(world: &dyn WorldQuery, kind: &EntityKind, herds: &[Herd]) -> Vec<HerdSnapshot> {
    herds
        .iter()
        .filter_map(|herd| {
            let (members, _) = live_members(world, herd);
            let leader = members.iter().find(|member| member.id == herd.leader)?;
            Some(HerdSnapshot {
                world: world.id(),
                species: kind.clone(),
                leader: herd.leader,
                leader_position: leader.position,
                population: members.len(),
                biome: world.biome(leader.position),
            })
        })
        .collect()
}

/// Re-resolve a herd's members: valid snapshots, and ids that no longer
/// resolve to a live creature.
fn live_members(world: &dyn WorldQuery, herd: &Herd) -> (Vec<EntitySnapshot>, Vec<EntityId>) {
    let mut members = Vec::with_capacity(herd.cluster.len());
    let mut invalid = Vec::new();
    for id in &herd.cluster.members {
        match world.entity(*id) {
            Some(snapshot) if snapshot.is_valid() => members.push(snapshot),
            _ => invalid.push(*id),
        }
    }
    (members, invalid)
}

fn centroid(members: &[EntitySnapshot]) -> Position {
    if members.is_empty() {
        return Position::default();
    }
    let n = members.len() as f64;
    let (x, y, z) = members.iter().fold((0.0, 0.0, 0.0), |(x, y, z), m| {
        (x + m.position.x, y + m.position.y, z + m.position.z)
    });
    Position::new(x / n, y / n, z / n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxWorld;
    use crate::{Biome, ChunkPos, WorldId};

    fn cow() -> EntityKind {
        EntityKind::from_static("cow")
    }

    fn engine() -> HerdEngine {
        let mut config = EngineConfig::single_species(cow(), SpeciesConfig::default());
        config.rng_seed = Some(11);
        HerdEngine::new(config)
    }

    fn populate(world: &mut SandboxWorld) {
        for i in 0..5 {
            world.add_creature(&cow(), Position::new(0.5 + 2.0 * f64::from(i), 65.0, 0.5));
        }
        world.add_creature(&cow(), Position::new(100.5, 65.0, 100.5));
    }

    #[test]
    fn first_tick_builds_herds_and_snapshots() {
        let mut world = SandboxWorld::new(WorldId(0));
        populate(&mut world);
        let mut engine = engine();
        let report = engine.tick(Tick(0), &mut [&mut world]);
        assert_eq!(report.pairs_processed, 1);
        assert_eq!(report.clusters_rebuilt, 2);
        assert_eq!(report.herds, 2);

        let rows = engine.snapshots(&SnapshotFilter::default());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].population, 5);
        assert_eq!(rows[1].population, 1);
        assert_eq!(rows[0].biome, Biome::from_static("plains"));

        let filtered = engine.snapshots(&SnapshotFilter {
            min_population: 2,
            ..SnapshotFilter::default()
        });
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn clusters_are_reused_between_rebuilds() {
        let mut world = SandboxWorld::new(WorldId(0));
        populate(&mut world);
        let mut engine = engine();
        engine.tick(Tick(0), &mut [&mut world]);
        let report = engine.tick(Tick(1), &mut [&mut world]);
        assert_eq!(report.clusters_rebuilt, 0);
        assert_eq!(report.herds, 2);
    }

    #[test]
    fn unloaded_world_fails_alone() {
        let mut broken = SandboxWorld::new(WorldId(0));
        broken.set_loaded(false);
        let mut healthy = SandboxWorld::new(WorldId(1));
        populate(&mut healthy);
        let mut engine = engine();
        let report = engine.tick(Tick(0), &mut [&mut broken, &mut healthy]);
        assert_eq!(report.failed_pairs, 1);
        assert_eq!(report.pairs_processed, 1);
        assert_eq!(report.herds, 2);
    }

    #[test]
    fn cancelled_tick_does_no_work() {
        let mut world = SandboxWorld::new(WorldId(0));
        populate(&mut world);
        let mut engine = engine();
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = engine.tick_until_cancelled(Tick(0), &mut [&mut world], &cancel);
        assert!(report.cancelled);
        assert_eq!(report.pairs_processed, 0);
        assert!(engine.caches().is_empty());
    }

    #[test]
    fn predator_next_to_the_herd_triggers_flight() {
        let mut world = SandboxWorld::new(WorldId(0));
        for i in 0..5 {
            world.add_creature(&cow(), Position::new(0.5 + 2.0 * f64::from(i), 65.0, 0.5));
        }
        world.add_creature(
            &EntityKind::from_static("wolf"),
            Position::new(4.5, 65.0, 3.5),
        );
        let mut engine = engine();
        let report = engine.tick(Tick(0), &mut [&mut world]);
        assert_eq!(report.threats, 1);
        assert!(report.flee_moves >= 1);
        assert_eq!(report.wander_moves, 0);
        assert_eq!(report.graze_moves, 0);
    }

    #[test]
    fn maintenance_builds_regions_and_honours_cancel() {
        let world =
            SandboxWorld::new(WorldId(0)).with_bounds(ChunkPos::new(0, 0), ChunkPos::new(15, 15));
        let mut engine = engine();
        let cancel = CancelToken::new();
        let built = engine.maintain(Tick(0), &[&world], &cancel);
        assert_eq!(built, engine.config().hazard.refresh_batch);
        cancel.cancel();
        assert_eq!(engine.maintain(Tick(1), &[&world], &cancel), 0);
        assert!(engine.maintenance_due(Tick(0)));
    }

    #[test]
    fn notices_toggle_follows_config() {
        let mut engine = engine();
        assert!(!engine.debug_notices());
        engine.set_debug_notices(true);
        assert!(engine.debug_notices());
    }

    #[test]
    fn overcrowded_patch_is_trimmed_on_its_own_interval() {
        let mut world = SandboxWorld::new(WorldId(0));
        world.set_ground_area((0, 0), (1, 1), 70, crate::Material::Stone);
        world.flood((-20, -20), (20, 20), 65);
        for i in 0..8_i32 {
            let at = Position::new(f64::from(i % 2) + 0.5, 71.0, f64::from((i / 2) % 2) + 0.5);
            world.add_creature(&cow(), at);
        }
        let species = SpeciesConfig {
            overcrowding_interval_ticks: 50,
            min_biome_population: 0,
            wander_chance: 0.0,
            graze_interval_ticks: 0,
            reproduction_enabled: false,
            ..SpeciesConfig::default()
        };
        let mut engine = HerdEngine::new(EngineConfig {
            rng_seed: Some(5),
            ..EngineConfig::single_species(cow(), species)
        });

        let report = engine.tick(Tick(0), &mut [&mut world]);
        assert_eq!(report.culled_overcrowding, 4);
        assert_eq!(world.population(&cow()), 4);
        assert_eq!(engine.snapshots(&SnapshotFilter::default())[0].population, 4);

        world.add_creature(&cow(), Position::new(0.5, 71.0, 0.5));
        assert_eq!(engine.tick(Tick(1), &mut [&mut world]).culled_overcrowding, 0);
    }

    #[test]
    fn drowning_creatures_are_removed_on_the_tick_they_expire() {
        let mut world = SandboxWorld::new(WorldId(0));
        world.set_ground_area((-4, -4), (4, 4), 58, crate::Material::Sand);
        world.flood((-4, -4), (4, 4), 63);
        let swimmer = world.add_creature(&cow(), Position::new(0.5, 60.0, 0.5));
        let species = SpeciesConfig {
            drowning_ticks: 10,
            ..SpeciesConfig::default()
        };
        let mut engine = HerdEngine::new(EngineConfig {
            rng_seed: Some(3),
            ..EngineConfig::single_species(cow(), species)
        });
        let mut drowned = 0;
        for tick in 0..=10 {
            drowned += engine.tick(Tick(tick), &mut [&mut world]).drowned;
        }
        assert_eq!(drowned, 1);
        assert!(world.entity(swimmer).is_none());
    }
}

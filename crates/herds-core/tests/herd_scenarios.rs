use herds_core::threat::ThreatResolver;
use herds_core::{
    EngineConfig, EntityId, EntityKind, EntitySnapshot, HazardConfig, HazardMap, HerdCluster,
    HerdEngine, LeaderState, Material, Position, PredatorChunkCache, PredatorSet, SandboxWorld,
    SnapshotFilter, SpeciesConfig, Threat, ThreatCache, Tick, WorldId, WorldQuery, build_clusters,
    elect_leader, stagger_due,
};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use std::collections::HashMap;

fn cow() -> EntityKind {
    EntityKind::from_static("cow")
}

fn wolf() -> EntityKind {
    EntityKind::from_static("wolf")
}

fn engine_for(species: SpeciesConfig) -> HerdEngine {
    HerdEngine::new(EngineConfig {
        rng_seed: Some(0xC0FFEE),
        ..EngineConfig::single_species(cow(), species)
    })
}

fn quiet_species() -> SpeciesConfig {
    SpeciesConfig {
        wander_chance: 0.0,
        graze_interval_ticks: 0,
        reproduction_enabled: false,
        ..SpeciesConfig::default()
    }
}

#[test]
fn clustering_is_a_partition_of_valid_creatures() {
    let mut rng = SmallRng::seed_from_u64(0xDEAD_BEEF);
    let radius = 8.0;
    let creatures: Vec<EntitySnapshot> = (0..200)
        .map(|i| {
            let mut snapshot = EntitySnapshot::creature(
                EntityId(i),
                cow(),
                Position::new(
                    rng.random_range(0.0..100.0),
                    64.0,
                    rng.random_range(0.0..100.0),
                ),
            );
            if i % 17 == 0 {
                snapshot.alive = false;
            }
            snapshot
        })
        .collect();

    let clusters = build_clusters(&creatures, radius).expect("clusters");
    let mut owner: HashMap<EntityId, usize> = HashMap::new();
    for (idx, cluster) in clusters.iter().enumerate() {
        assert!(!cluster.is_empty());
        for id in &cluster.members {
            assert!(owner.insert(*id, idx).is_none(), "{id} appears twice");
        }
    }
    for creature in &creatures {
        assert_eq!(owner.contains_key(&creature.id), creature.is_valid());
    }
    for a in creatures.iter().filter(|c| c.is_valid()) {
        for b in creatures.iter().filter(|c| c.is_valid()) {
            if a.position.distance_squared(b.position) <= radius * radius {
                assert_eq!(owner[&a.id], owner[&b.id]);
            }
        }
    }
}

#[test]
fn five_near_and_one_far_make_two_herds() {
    let mut world = SandboxWorld::new(WorldId(0));
    for (x, z) in [(0.5, 0.5), (3.5, 2.5), (6.5, 0.5), (2.5, 7.5), (8.5, 6.5)] {
        world.add_creature(&cow(), Position::new(x, 65.0, z));
    }
    world.add_creature(&cow(), Position::new(200.5, 65.0, 0.5));
    world.set_time_of_day(6_000);

    let mut engine = engine_for(SpeciesConfig {
        connectivity_radius: 14.0,
        ..quiet_species()
    });
    let report = engine.tick(Tick(0), &mut [&mut world]);
    assert_eq!(report.herds, 2);

    let mut sizes: Vec<usize> = engine
        .snapshots(&SnapshotFilter::default())
        .iter()
        .map(|row| row.population)
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 5]);
}

#[test]
fn incumbent_leader_is_reelected() {
    let cluster = HerdCluster {
        members: (1..=6).map(EntityId).collect(),
        center: Position::default(),
    };
    let mut state = LeaderState::default();
    state.assign(&cluster, EntityId(4));
    for seed in 0..32 {
        let mut rng = SmallRng::seed_from_u64(seed);
        assert_eq!(elect_leader(&cluster, &state, &mut rng), Some(EntityId(4)));
    }
}

struct ThreatFixture {
    world: SandboxWorld,
    leader: EntityId,
    predators: PredatorSet,
    chunk_cache: PredatorChunkCache,
    cache: ThreatCache,
    species: SpeciesConfig,
}

impl ThreatFixture {
    fn new(predator_at: Position) -> Self {
        let mut world = SandboxWorld::new(WorldId(0));
        let leader = world.add_creature(&cow(), Position::new(0.5, 65.0, 0.5));
        world.add_creature(&wolf(), predator_at);
        Self {
            world,
            leader,
            predators: PredatorSet::new([wolf()]),
            chunk_cache: PredatorChunkCache::new(3),
            cache: ThreatCache::default(),
            species: SpeciesConfig::default(),
        }
    }

    fn resolve(&mut self, now: Tick) -> Option<Threat> {
        let leader = self.world.entity(self.leader).expect("leader");
        let mut resolver = ThreatResolver {
            world: &self.world,
            predators: &self.predators,
            chunk_cache: &mut self.chunk_cache,
            threat_ttl_ticks: 5,
            notices: false,
            ignored: 0,
        };
        resolver.resolve(&leader, &self.species, now, &mut self.cache)
    }
}

#[test]
fn predator_just_inside_awareness_is_found_on_its_staggered_tick() {
    let species = SpeciesConfig::default();
    let edge = species.awareness_distance - 0.01;
    let mut fixture = ThreatFixture::new(Position::new(0.5 + edge, 65.0, 0.5));

    let interval = species.threat_check_interval_ticks;
    let detected = (0..interval).map(Tick).find(|now| fixture.resolve(*now).is_some());
    let tick = detected.expect("detected within one check interval");
    assert!(stagger_due(tick, fixture.leader, interval));
}

#[test]
fn panic_range_predator_is_found_regardless_of_stagger() {
    let mut fixture = ThreatFixture::new(Position::new(3.5, 65.0, 0.5));
    let interval = fixture.species.threat_check_interval_ticks;
    let off_cycle = (0..interval)
        .map(Tick)
        .find(|now| !stagger_due(*now, fixture.leader, interval))
        .expect("an off-cycle tick");
    let threat = fixture.resolve(off_cycle).expect("panic threat");
    assert_eq!(threat.observed, off_cycle);
}

#[test]
fn no_predator_in_range_means_no_threat() {
    let mut fixture = ThreatFixture::new(Position::new(100.5, 65.0, 0.5));
    for now in 0..20 {
        assert!(fixture.resolve(Tick(now)).is_none());
    }
}

#[test]
fn cached_threat_expires_after_its_ttl() {
    let mut cache = ThreatCache::default();
    let leader = EntityId(1);
    cache.record(
        leader,
        Threat {
            source: EntityId(2),
            position: Position::default(),
            observed: Tick(10),
        },
    );
    assert!(cache.get(leader, Tick(15), 5).is_some());
    assert!(cache.get(leader, Tick(16), 5).is_none());
}

#[test]
fn hazard_scores_are_stable_for_unchanged_terrain() {
    let mut world = SandboxWorld::new(WorldId(0));
    world.set_ground_area((0, 0), (15, 15), 58, Material::Sand);
    world.flood((0, 0), (15, 15), 63);
    let mut hazard = HazardMap::new(HazardConfig::default());
    let wet = Position::new(4.5, 64.0, 4.5);
    let dry = Position::new(60.5, 65.0, 60.5);
    let first = (hazard.score(&world, wet, Tick(0)), hazard.score(&world, dry, Tick(0)));
    let second = (hazard.score(&world, wet, Tick(1)), hazard.score(&world, dry, Tick(1)));
    assert_eq!(first, second);
    assert!(first.0 > first.1);
    assert_eq!(hazard.builds(), 1);
}

fn packed_herd(world: &mut SandboxWorld, size: usize) {
    for i in 0..size {
        let x = 0.5 + (i % 8) as f64 * 1.5;
        let z = 0.5 + (i / 8) as f64 * 1.5;
        world.add_creature(&cow(), Position::new(x, 65.0, z));
    }
}

#[test]
fn overcrowded_chunk_loses_exactly_the_configured_members() {
    let mut world = SandboxWorld::new(WorldId(0));
    packed_herd(&mut world, 30);
    let mut engine = engine_for(SpeciesConfig {
        soft_cap_per_chunk: 20,
        soft_cap_per_biome: 0,
        overcap_removals_per_interval: 3,
        density_threshold: 0,
        herd_total_cap: 0,
        ..quiet_species()
    });

    let report = engine.tick(Tick(0), &mut [&mut world]);
    assert_eq!(report.culled_soft_cap, 3);
    assert_eq!(report.culled_density, 0);
    assert_eq!(world.population(&cow()), 27);

    let rows = engine.snapshots(&SnapshotFilter::default());
    assert_eq!(rows[0].population, 27);
    let leader = rows[0].leader;
    assert!(world.entity(leader).is_some_and(|e| e.is_valid()));
    assert!(!world.soft_killed().contains(&leader));
}

#[test]
fn repeated_culls_respect_the_herd_floor() {
    let mut world = SandboxWorld::new(WorldId(0));
    packed_herd(&mut world, 30);
    let mut engine = engine_for(SpeciesConfig {
        herd_update_interval_ticks: 1,
        population_interval_ticks: 1,
        cull_cooldown_ticks: 0,
        soft_cap_per_chunk: 1,
        soft_cap_per_biome: 0,
        overcap_removals_per_interval: 5,
        min_herd_size: 10,
        density_threshold: 0,
        herd_total_cap: 0,
        ..quiet_species()
    });
    for now in 0..40 {
        engine.tick(Tick(now), &mut [&mut world]);
        assert!(world.population(&cow()) >= 10, "tick {now}");
    }
    assert_eq!(world.population(&cow()), 10);
}

#[test]
fn adjacent_adults_produce_one_offspring() {
    let mut world = SandboxWorld::new(WorldId(0));
    let a = world.add_creature(&cow(), Position::new(0.5, 65.0, 0.5));
    let b = world.add_creature(&cow(), Position::new(2.5, 65.0, 0.5));
    let mut engine = engine_for(SpeciesConfig {
        reproduction_enabled: true,
        reproduce_rate: 1.0,
        reproduce_spacing: 3.0,
        ..quiet_species()
    });

    let report = engine.tick(Tick(0), &mut [&mut world]);
    assert_eq!(report.births, 1);
    assert_eq!(world.spawned().len(), 1);
    let child = world.entity(world.spawned()[0]).expect("offspring");
    assert!(!child.adult);
    assert_eq!(child.position, Position::new(1.5, 65.0, 0.5));

    let cache = engine.caches().get(WorldId(0), &cow()).expect("cache");
    assert_eq!(cache.last_reproduce.get(&a), Some(&Tick(0)));
    assert_eq!(cache.last_reproduce.get(&b), Some(&Tick(0)));
    assert_eq!(engine.snapshots(&SnapshotFilter::default())[0].population, 3);
}

#[test]
fn herds_at_their_target_size_do_not_breed() {
    let breeding = |target: usize| SpeciesConfig {
        reproduction_enabled: true,
        reproduce_rate: 1.0,
        reproduce_spacing: 3.0,
        herd_target_size: target,
        soft_cap_per_chunk: 0,
        soft_cap_per_biome: 0,
        density_threshold: 0,
        herd_total_cap: 0,
        ..quiet_species()
    };

    let mut world = SandboxWorld::new(WorldId(0));
    packed_herd(&mut world, 8);
    let report = engine_for(breeding(4)).tick(Tick(0), &mut [&mut world]);
    assert_eq!(report.births, 0);
    assert_eq!(world.population(&cow()), 8);

    let mut world = SandboxWorld::new(WorldId(0));
    packed_herd(&mut world, 8);
    let report = engine_for(breeding(9)).tick(Tick(0), &mut [&mut world]);
    assert_eq!(report.births, 1);
    assert_eq!(world.population(&cow()), 9);
}

#[test]
fn threatened_herd_flees_even_at_night() {
    let mut world = SandboxWorld::new(WorldId(0));
    packed_herd(&mut world, 4);
    world.add_creature(&wolf(), Position::new(3.5, 65.0, 4.5));
    world.set_time_of_day(18_000);
    let mut engine = engine_for(quiet_species());
    let report = engine.tick(Tick(0), &mut [&mut world]);
    assert_eq!(report.threats, 1);
    assert!(report.flee_moves > 0);
}

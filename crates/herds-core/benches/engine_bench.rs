use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use herds_core::{
    CancelToken, EngineConfig, EntityKind, HerdEngine, Position, SandboxWorld, SpeciesConfig, Tick,
    WorldId,
};
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(fallback)
}

fn populated_world(creatures: usize) -> SandboxWorld {
    let mut world = SandboxWorld::new(WorldId(0));
    let cow = EntityKind::from_static("cow");
    let wolf = EntityKind::from_static("wolf");
    for seed in 0..creatures as u32 {
        // Herds of roughly eight spread over the loaded area.
        let herd = seed / 8;
        let x = f64::from((herd * 37) % 240) - 120.0 + f64::from(seed % 4) * 1.5;
        let z = f64::from((herd * 53) % 240) - 120.0 + f64::from(seed % 8 / 4) * 1.5;
        world.add_creature(&cow, Position::new(x + 0.5, 65.0, z + 0.5));
    }
    for i in 0..(creatures / 64).max(1) as u32 {
        let x = f64::from((i * 71) % 240) - 120.0;
        world.add_creature(&wolf, Position::new(x + 0.5, 65.0, 0.5));
    }
    world
}

fn bench_engine_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_tick");
    group.sample_size(env_or("HERDS_BENCH_SAMPLES", 20_usize).max(10));
    group.warm_up_time(Duration::from_secs(env_or("HERDS_BENCH_WARMUP_SECS", 2)));
    group.measurement_time(Duration::from_secs(env_or("HERDS_BENCH_MEASURE_SECS", 8)));
    let ticks: u64 = env_or("HERDS_BENCH_TICKS", 40);

    for creatures in [256_usize, 1024, 4096] {
        group.bench_function(format!("ticks{ticks}_creatures{creatures}"), |b| {
            b.iter_batched(
                || {
                    let config = EngineConfig {
                        rng_seed: Some(0xBEEF),
                        ..EngineConfig::single_species(
                            EntityKind::from_static("cow"),
                            SpeciesConfig {
                                herd_update_interval_ticks: 20,
                                ..SpeciesConfig::default()
                            },
                        )
                    };
                    (HerdEngine::new(config), populated_world(creatures))
                },
                |(mut engine, mut world)| {
                    let cancel = CancelToken::new();
                    for now in 0..ticks {
                        let tick = Tick(now);
                        if engine.maintenance_due(tick) {
                            engine.maintain(tick, &[&world], &cancel);
                        }
                        engine.tick(tick, &mut [&mut world]);
                        world.advance(1);
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_engine_ticks);
criterion_main!(benches);

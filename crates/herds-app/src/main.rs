use anyhow::{Context, Result, bail};
use clap::Parser;
use herds_app::{Scenario, render_report, render_totals, run_scenario};
use herds_core::{Biome, CancelToken, EngineConfig, EntityKind, Position, SnapshotFilter, WorldId};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "herds-sim",
    version,
    about = "Drive the herd engine over a sandbox world and print the herd report"
)]
struct Cli {
    /// Engine configuration as JSON; missing fields take their defaults.
    #[arg(short, long, env = "HERDS_CONFIG")]
    config: Option<PathBuf>,
    /// Ticks to simulate.
    #[arg(long, default_value_t = 1_200)]
    ticks: u64,
    /// Seed for both the sandbox layout and the engine.
    #[arg(long)]
    seed: Option<u64>,
    /// Species to seed and report on.
    #[arg(long, default_value = "cow")]
    species: String,
    #[arg(long, default_value_t = 6)]
    herds: usize,
    #[arg(long, default_value_t = 8)]
    herd_size: usize,
    #[arg(long, default_value_t = 2)]
    predators: usize,
    /// Add one survival-mode player next to the first herd.
    #[arg(long)]
    player: bool,
    /// In-world time of day at the first tick (0..24000).
    #[arg(long, default_value_t = 1_000)]
    time_of_day: u64,
    /// Only report herds whose leader stands in this biome.
    #[arg(long)]
    biome: Option<String>,
    /// Only report herds with at least this many members.
    #[arg(long, default_value_t = 0)]
    min_population: usize,
    /// Only report herds within RADIUS blocks of X,Z.
    #[arg(long, num_args = 3, value_names = ["X", "Z", "RADIUS"], allow_negative_numbers = true)]
    near: Option<Vec<f64>>,
    /// Emit cull and ignored-predator notices.
    #[arg(long)]
    notices: bool,
    /// Print the outcome as JSON instead of a table.
    #[arg(long)]
    json: bool,
    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    let seed = cli.seed.or(config.rng_seed).unwrap_or_else(rand::random);
    config.rng_seed = Some(seed);
    config.debug_notices |= cli.notices;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let species = EntityKind::new(cli.species.clone());
    if config.species(&species).is_none() {
        bail!("species `{species}` is not configured");
    }

    let scenario = Scenario {
        species: species.clone(),
        herds: cli.herds,
        herd_size: cli.herd_size,
        predators: cli.predators,
        player: cli.player,
        ticks: cli.ticks,
        seed,
        start_time_of_day: cli.time_of_day,
        ..Scenario::default()
    };
    let filter = SnapshotFilter {
        world: Some(WorldId(0)),
        species: Some(species),
        biome: cli.biome.clone().map(Biome::new),
        near: near_filter(cli.near.as_deref())?,
        min_population: cli.min_population,
    };

    info!(seed, ticks = cli.ticks, "starting herd simulation");
    let outcome = run_scenario(config, &scenario, &filter, &CancelToken::new());

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", render_report(&outcome.snapshots));
        println!("{}", render_totals(&outcome));
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    EngineConfig::from_json_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))
}

fn near_filter(values: Option<&[f64]>) -> Result<Option<(Position, f64)>> {
    match values {
        None => Ok(None),
        Some([x, z, radius]) if radius.is_finite() && *radius >= 0.0 => {
            Ok(Some((Position::new(*x, 0.0, *z), *radius)))
        }
        Some(other) => bail!("--near expects X Z RADIUS with a non-negative radius, got {other:?}"),
    }
}

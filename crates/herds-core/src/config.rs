//! Engine and per-species configuration. Values are clamped to safe ranges
//! when loaded; nothing is re-validated at use time.

use crate::{EntityKind, Material, REGION_SIZE};
use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How fleeing members pick their away-vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleeMode {
    /// Each member runs away from the threat on its own bearing.
    #[default]
    Scatter,
    /// Members share the herd-centre bearing and move as a block.
    Grouped,
}

/// Cohesion style: loose herds gather on the leader, tight herds trail it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HerdType {
    #[default]
    Loose,
    Tight,
}

/// Settings for one tracked species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeciesConfig {
    /// Ticks between cluster rebuilds; 0 disables herd tracking.
    pub herd_update_interval_ticks: u64,
    /// Connectivity radius for cluster construction.
    pub connectivity_radius: f64,
    /// Distance from the leader a member may drift before cohesion pulls it back.
    pub follow_radius: f64,
    pub herd_type: HerdType,
    pub cohesion_speed: f64,
    pub night_herd_radius_multiplier: f64,
    pub night_herd_speed_multiplier: f64,
    pub tight_herd_radius_multiplier: f64,
    pub threat_herd_radius_multiplier: f64,
    pub threat_herd_speed_multiplier: f64,
    /// Distance behind the leader a tight herd trails toward.
    pub trail_distance: f64,

    /// Per-tick probability that an unthreatened herd wanders during the day.
    pub wander_chance: f64,
    pub wander_radius_multiplier: f64,
    pub wander_speed: f64,
    pub wander_min_interval_ticks: u64,
    pub wander_search_attempts: u32,

    /// Radius of the always-on panic scan around the leader.
    pub panic_range: f64,
    pub flee_distance: f64,
    pub awareness_distance: f64,
    /// Stagger interval for the wide chunk scan.
    pub threat_check_interval_ticks: u64,
    pub panic_duration_ticks: u64,
    pub panic_speed: f64,
    pub flee_speed: f64,
    pub panic_target_distance: f64,
    pub flee_target_distance: f64,
    pub search_angle_degrees: f64,
    pub search_attempts: u32,
    pub path_update_ticks: u64,
    pub max_slope: i32,
    pub avoid_water: bool,
    pub flee_mode: FleeMode,
    /// Hazard score at or above which a flee destination is avoided.
    pub must_avoid_score: u8,

    /// Ticks between graze attempts per creature; 0 disables grazing.
    pub graze_interval_ticks: u64,
    pub graze_radius: f64,
    pub graze_speed: f64,
    pub graze_search_attempts: u32,
    pub graze_reach: f64,
    pub graze_materials: Vec<Material>,
    pub graze_window_start: u64,
    pub graze_window_end: u64,

    /// Ticks between population-control passes; 0 disables culling.
    pub population_interval_ticks: u64,
    /// Per-biome soft cap; 0 disables.
    pub soft_cap_per_biome: usize,
    /// Per-chunk soft cap; 0 disables.
    pub soft_cap_per_chunk: usize,
    pub overcap_removals_per_interval: usize,
    pub cull_cooldown_ticks: u64,
    pub min_herd_size: usize,
    pub min_biome_population: usize,
    /// Cluster size above which the density throttle applies; 0 disables.
    pub density_threshold: usize,
    pub density_chance_per_member: f64,
    pub density_max_chance: f64,
    /// Night-time total population cap per world; 0 disables.
    pub herd_total_cap: usize,
    pub herd_target_size: usize,
    /// Ticks between capacity-based overcrowding culls; 0 disables.
    pub overcrowding_interval_ticks: u64,
    /// Ticks in deep water before a creature is removed; 0 disables.
    pub drowning_ticks: u64,

    pub reproduction_enabled: bool,
    pub reproduction_interval_ticks: u64,
    pub reproduce_rate: f64,
    pub reproduce_spacing: f64,
    pub reproduce_cooldown_ticks: u64,
    pub reproduce_attempts: u32,
    pub natural_ground: Vec<Material>,
    /// Maximum distance between a parent's feet and the surface.
    pub surface_tolerance: f64,
    pub require_water_or_exit: bool,
    pub water_search_radius: i32,
    pub reproduction_capacity_check: bool,
}

impl Default for SpeciesConfig {
    fn default() -> Self {
        Self {
            herd_update_interval_ticks: 100,
            connectivity_radius: 14.0,
            follow_radius: 8.0,
            herd_type: HerdType::Loose,
            cohesion_speed: 1.0,
            night_herd_radius_multiplier: 0.6,
            night_herd_speed_multiplier: 1.2,
            tight_herd_radius_multiplier: 0.7,
            threat_herd_radius_multiplier: 0.7,
            threat_herd_speed_multiplier: 1.1,
            trail_distance: 3.0,
            wander_chance: 0.02,
            wander_radius_multiplier: 2.5,
            wander_speed: 0.9,
            wander_min_interval_ticks: 200,
            wander_search_attempts: 6,
            panic_range: 6.0,
            flee_distance: 12.0,
            awareness_distance: 24.0,
            threat_check_interval_ticks: 10,
            panic_duration_ticks: 200,
            panic_speed: 1.5,
            flee_speed: 1.1,
            panic_target_distance: 24.0,
            flee_target_distance: 14.0,
            search_angle_degrees: 65.0,
            search_attempts: 12,
            path_update_ticks: 20,
            max_slope: 2,
            avoid_water: true,
            flee_mode: FleeMode::Scatter,
            must_avoid_score: 100,
            graze_interval_ticks: 200,
            graze_radius: 12.0,
            graze_speed: 1.0,
            graze_search_attempts: 12,
            graze_reach: 2.0,
            graze_materials: vec![
                Material::ShortGrass,
                Material::TallGrass,
                Material::Fern,
                Material::GrassBlock,
            ],
            graze_window_start: 0,
            graze_window_end: 12_000,
            population_interval_ticks: 200,
            soft_cap_per_biome: 64,
            soft_cap_per_chunk: 12,
            overcap_removals_per_interval: 2,
            cull_cooldown_ticks: 600,
            min_herd_size: 2,
            min_biome_population: 4,
            density_threshold: 16,
            density_chance_per_member: 0.02,
            density_max_chance: 0.25,
            herd_total_cap: 24,
            herd_target_size: 4,
            overcrowding_interval_ticks: 200,
            drowning_ticks: 6_000,
            reproduction_enabled: true,
            reproduction_interval_ticks: 2_400,
            reproduce_rate: 0.25,
            reproduce_spacing: 3.0,
            reproduce_cooldown_ticks: 6_000,
            reproduce_attempts: 8,
            natural_ground: vec![
                Material::GrassBlock,
                Material::Dirt,
                Material::CoarseDirt,
                Material::Podzol,
                Material::SnowBlock,
            ],
            surface_tolerance: 1.5,
            require_water_or_exit: true,
            water_search_radius: 8,
            reproduction_capacity_check: false,
        }
    }
}

impl SpeciesConfig {
    /// Clamp every value into its safe range.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        let non_negative = |v: f64| if v.is_finite() { v.max(0.0) } else { 0.0 };
        let probability = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };

        self.connectivity_radius = non_negative(self.connectivity_radius);
        self.follow_radius = non_negative(self.follow_radius);
        self.cohesion_speed = non_negative(self.cohesion_speed);
        self.night_herd_radius_multiplier = non_negative(self.night_herd_radius_multiplier);
        self.night_herd_speed_multiplier = non_negative(self.night_herd_speed_multiplier);
        self.tight_herd_radius_multiplier = non_negative(self.tight_herd_radius_multiplier);
        self.threat_herd_radius_multiplier = non_negative(self.threat_herd_radius_multiplier);
        self.threat_herd_speed_multiplier = non_negative(self.threat_herd_speed_multiplier);
        self.trail_distance = non_negative(self.trail_distance);

        self.wander_chance = probability(self.wander_chance);
        self.wander_radius_multiplier = non_negative(self.wander_radius_multiplier);
        self.wander_speed = non_negative(self.wander_speed);
        self.wander_search_attempts = self.wander_search_attempts.max(1);

        self.panic_range = non_negative(self.panic_range);
        self.flee_distance = non_negative(self.flee_distance).max(self.panic_range);
        self.awareness_distance = non_negative(self.awareness_distance).max(self.flee_distance);
        self.threat_check_interval_ticks = self.threat_check_interval_ticks.max(1);
        self.panic_duration_ticks = self.panic_duration_ticks.max(1);
        self.panic_speed = non_negative(self.panic_speed);
        self.flee_speed = non_negative(self.flee_speed);
        self.panic_target_distance = non_negative(self.panic_target_distance);
        self.flee_target_distance = non_negative(self.flee_target_distance);
        self.search_angle_degrees = if self.search_angle_degrees.is_finite() {
            self.search_angle_degrees.clamp(0.0, 180.0)
        } else {
            0.0
        };
        self.search_attempts = self.search_attempts.max(1);
        self.path_update_ticks = self.path_update_ticks.max(5);
        self.max_slope = self.max_slope.max(0);

        self.graze_radius = non_negative(self.graze_radius);
        self.graze_speed = non_negative(self.graze_speed);
        self.graze_search_attempts = self.graze_search_attempts.max(1);
        self.graze_reach = non_negative(self.graze_reach);
        self.graze_window_start = self.graze_window_start.min(24_000);
        self.graze_window_end = self.graze_window_end.clamp(self.graze_window_start, 24_000);

        self.overcap_removals_per_interval = self.overcap_removals_per_interval.max(1);
        self.min_herd_size = self.min_herd_size.max(1);
        self.density_chance_per_member = probability(self.density_chance_per_member);
        self.density_max_chance = probability(self.density_max_chance);
        self.herd_target_size = self.herd_target_size.max(1);

        self.reproduce_rate = probability(self.reproduce_rate);
        self.reproduce_spacing = non_negative(self.reproduce_spacing);
        self.reproduce_attempts = self.reproduce_attempts.max(1);
        self.surface_tolerance = non_negative(self.surface_tolerance);
        self.water_search_radius = self.water_search_radius.clamp(0, 32);
        self
    }

    /// Flee search cone half-angle in radians.
    #[must_use]
    pub fn search_angle_radians(&self) -> f64 {
        self.search_angle_degrees.to_radians()
    }

    #[must_use]
    pub fn grazing_enabled(&self) -> bool {
        self.graze_interval_ticks > 0 && self.graze_radius > 0.0 && self.graze_speed > 0.0
    }

    #[must_use]
    pub fn in_graze_window(&self, time_of_day: u64) -> bool {
        (self.graze_window_start..=self.graze_window_end).contains(&(time_of_day % 24_000))
    }
}

/// Hazard-map tuning shared by every world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HazardConfig {
    /// Distance in blocks between hazard samples.
    pub sample_spacing: i32,
    /// Height difference between adjacent samples treated as a cliff.
    pub cliff_threshold: i32,
    pub water_penalty: u8,
    pub cliff_penalty: u8,
    pub cave_penalty: u8,
    /// Depths below the surface probed for air pockets.
    pub cave_probe_depths: Vec<i32>,
    /// Age after which a fully sampled region is rebuilt.
    pub rebuild_interval_ticks: u64,
    /// Age after which a region with unloaded samples is rebuilt.
    pub incomplete_rebuild_interval_ticks: u64,
    pub max_regions: usize,
    /// Regions not accessed for this long are always evicted.
    pub idle_eviction_ticks: u64,
    /// Regions built per maintenance cycle.
    pub refresh_batch: usize,
    pub maintenance_interval_ticks: u64,
}

impl Default for HazardConfig {
    fn default() -> Self {
        Self {
            sample_spacing: 8,
            cliff_threshold: 3,
            water_penalty: 120,
            cliff_penalty: 100,
            cave_penalty: 40,
            cave_probe_depths: vec![3, 5, 8],
            rebuild_interval_ticks: 6_000,
            incomplete_rebuild_interval_ticks: 400,
            max_regions: 256,
            idle_eviction_ticks: 12_000,
            refresh_batch: 2,
            maintenance_interval_ticks: 40,
        }
    }
}

impl HazardConfig {
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.sample_spacing = self.sample_spacing.clamp(1, REGION_SIZE);
        self.cliff_threshold = self.cliff_threshold.max(1);
        self.cave_probe_depths.retain(|depth| *depth > 0);
        self.cave_probe_depths.sort_unstable();
        self.cave_probe_depths.dedup();
        self.rebuild_interval_ticks = self.rebuild_interval_ticks.max(1);
        self.incomplete_rebuild_interval_ticks = self
            .incomplete_rebuild_interval_ticks
            .clamp(1, self.rebuild_interval_ticks);
        self.max_regions = self.max_regions.max(1);
        self.idle_eviction_ticks = self.idle_eviction_ticks.max(1);
        self.refresh_batch = self.refresh_batch.max(1);
        self.maintenance_interval_ticks = self.maintenance_interval_ticks.max(1);
        self
    }
}

/// Static configuration for a herd engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Emit cull and ignored-predator notices.
    pub debug_notices: bool,
    /// Entity kinds treated as predators.
    pub predators: Vec<EntityKind>,
    /// Lifetime of a chunk's cached predator list.
    pub chunk_cache_ttl_ticks: u64,
    /// Lifetime of a leader's last-known threat.
    pub threat_ttl_ticks: u64,
    pub hazard: HazardConfig,
    pub species: BTreeMap<EntityKind, SpeciesConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let species = ["cow", "sheep", "horse", "goat", "chicken"]
            .into_iter()
            .map(|name| (EntityKind::from_static(name), SpeciesConfig::default()))
            .collect();
        Self {
            rng_seed: None,
            debug_notices: false,
            predators: vec![
                EntityKind::from_static("wolf"),
                EntityKind::from_static("polar_bear"),
                EntityKind::from_static("zombie"),
                EntityKind::from_static("skeleton"),
                EntityKind::PLAYER,
            ],
            chunk_cache_ttl_ticks: 3,
            threat_ttl_ticks: 5,
            hazard: HazardConfig::default(),
            species,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document and clamp it.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let parsed: EngineConfig = serde_json::from_str(raw)?;
        Ok(parsed.clamped())
    }

    /// Clamp every nested value into its safe range.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.chunk_cache_ttl_ticks = self.chunk_cache_ttl_ticks.max(1);
        self.threat_ttl_ticks = self.threat_ttl_ticks.max(1);
        self.hazard = self.hazard.clamped();
        self.predators.sort();
        self.predators.dedup();
        self.species = std::mem::take(&mut self.species)
            .into_iter()
            .map(|(kind, species)| (kind, species.clamped()))
            .collect();
        self
    }

    /// Configuration with exactly one tracked species.
    #[must_use]
    pub fn single_species(kind: EntityKind, species: SpeciesConfig) -> Self {
        Self {
            species: BTreeMap::from([(kind, species)]),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn species(&self, kind: &EntityKind) -> Option<&SpeciesConfig> {
        self.species.get(kind)
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

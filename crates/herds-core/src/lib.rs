//! Core herd engine: clustering, leadership, predator response, hazard-aware
//! movement planning, population control and reproduction for herding
//! creatures living in a live, externally-owned world.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

pub use herds_index::{CHUNK_SIZE, ChunkPos, REGION_SIZE, RegionPos};

pub mod cache;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod hazard;
pub mod leader;
pub mod movement;
pub mod population;
pub mod report;
pub mod reproduction;
pub mod sandbox;
pub mod threat;
pub mod world;

pub use cache::{HerdCache, HerdCacheStore};
pub use cluster::{HerdCluster, build_clusters};
pub use config::{ConfigError, EngineConfig, FleeMode, HazardConfig, HerdType, SpeciesConfig};
pub use engine::{CancelToken, EngineError, HerdEngine};
pub use hazard::{HazardMap, RegionHazardMap};
pub use leader::{LeaderState, elect_leader};
pub use report::{HerdSnapshot, SnapshotFilter, TickReport};
pub use sandbox::SandboxWorld;
pub use threat::{PredatorChunkCache, PredatorSet, Threat, ThreatCache};
pub use world::{
    EntitySnapshot, GameMode, HeightMode, Material, Surface, WorldError, WorldQuery,
};

/// Ticks in one in-world day.
pub const TICKS_PER_DAY: u64 = 24_000;

/// High level simulation clock, as supplied by the tick driver.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Ticks elapsed since `earlier`; zero when `earlier` lies in the future.
    #[must_use]
    pub const fn since(self, earlier: Tick) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    #[must_use]
    pub const fn plus(self, ticks: u64) -> Self {
        Self(self.0.saturating_add(ticks))
    }
}

/// Stable identifier for a world entity. Never a strong handle: always
/// re-resolve through [`WorldQuery::entity`] before acting on it.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// Identifier of a loaded world.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct WorldId(pub u32);

/// Entity type tag (`"cow"`, `"wolf"`, `"player"`). Tracked species and
/// predator sets are both expressed in kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKind(Cow<'static, str>);

impl EntityKind {
    pub const PLAYER: EntityKind = EntityKind(Cow::Borrowed("player"));

    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_player(&self) -> bool {
        self.0 == "player"
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Biome name reported by the world adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Biome(Cow<'static, str>);

impl Biome {
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Biome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Continuous world position; `y` is up.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    #[must_use]
    pub fn distance_squared(self, other: Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    #[must_use]
    pub fn distance(self, other: Position) -> f64 {
        self.distance_squared(other).sqrt()
    }

    #[must_use]
    pub fn horizontal_distance_squared(self, other: Position) -> f64 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        dx * dx + dz * dz
    }

    #[must_use]
    pub fn offset(self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    #[must_use]
    pub fn midpoint(self, other: Position) -> Self {
        Self::new(
            (self.x + other.x) * 0.5,
            (self.y + other.y) * 0.5,
            (self.z + other.z) * 0.5,
        )
    }

    /// Integer block coordinate containing this position.
    #[must_use]
    pub fn block(self) -> (i32, i32, i32) {
        (
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }

    #[must_use]
    pub fn chunk(self) -> ChunkPos {
        ChunkPos::containing(self.x, self.z)
    }

    #[must_use]
    pub fn region(self) -> RegionPos {
        RegionPos::containing(self.x, self.z)
    }

    #[must_use]
    pub const fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Whether the in-world clock is in the night window (13000..=23000).
#[must_use]
pub fn is_night(time_of_day: u64) -> bool {
    (13_000..=23_000).contains(&(time_of_day % TICKS_PER_DAY))
}

/// Identifier hash used for tick staggering (splitmix64 finaliser).
#[must_use]
pub fn stagger_hash(id: EntityId) -> u64 {
    let mut z = id.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// `(tick + hash(id)) mod interval == 0`; intervals of 0 or 1 are always due.
#[must_use]
pub fn stagger_due(tick: Tick, id: EntityId, interval: u64) -> bool {
    if interval <= 1 {
        return true;
    }
    tick.0.wrapping_add(stagger_hash(id)).is_multiple_of(interval)
}

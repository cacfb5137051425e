//! World Query Interface: the live world the engine reads from and sends
//! requests to. Implemented once per loaded world by an adapter.

use crate::{Biome, ChunkPos, EntityId, EntityKind, Position, WorldId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by a world adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// The world is no longer loaded; nothing can be queried this tick.
    #[error("world {0:?} is not loaded")]
    Unloaded(WorldId),
    /// A spawn request was refused (blocked location, unloaded chunk, ...).
    #[error("spawn of {kind} rejected: {reason}")]
    SpawnRejected { kind: String, reason: &'static str },
}

/// Block materials the engine distinguishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Material {
    #[default]
    Air,
    CaveAir,
    Water,
    Lava,
    BubbleColumn,
    GrassBlock,
    Dirt,
    CoarseDirt,
    Podzol,
    Sand,
    Gravel,
    SnowBlock,
    Stone,
    ShortGrass,
    TallGrass,
    Fern,
    Wheat,
    Leaves,
    Log,
    Other,
}

impl Material {
    #[must_use]
    pub const fn is_air(self) -> bool {
        matches!(self, Self::Air | Self::CaveAir)
    }

    #[must_use]
    pub const fn is_liquid(self) -> bool {
        matches!(self, Self::Water | Self::Lava | Self::BubbleColumn)
    }

    #[must_use]
    pub const fn is_water(self) -> bool {
        matches!(self, Self::Water | Self::BubbleColumn)
    }

    /// Non-solid plants that grow on top of ground blocks.
    #[must_use]
    pub const fn is_foliage(self) -> bool {
        matches!(
            self,
            Self::ShortGrass | Self::TallGrass | Self::Fern | Self::Wheat
        )
    }

    #[must_use]
    pub const fn is_solid(self) -> bool {
        !(self.is_air() || self.is_liquid() || self.is_foliage())
    }

    /// A creature can stand inside this block.
    #[must_use]
    pub const fn is_passable(self) -> bool {
        self.is_air() || self.is_foliage()
    }

    /// What a block turns into once grazed.
    #[must_use]
    pub const fn grazed(self) -> Material {
        match self {
            Self::GrassBlock => Self::Dirt,
            _ => Self::Air,
        }
    }
}

/// Height-map flavours for surface lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeightMode {
    /// Topmost block that blocks motion or holds a liquid.
    MotionBlocking,
    /// Same as `MotionBlocking`, but leaves are ignored.
    MotionBlockingNoLeaves,
    /// Topmost solid block, looking through liquids.
    OceanFloor,
}

/// Top block of a column for a given [`HeightMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub y: i32,
    pub material: Material,
}

/// Player game modes; only survival players count as threats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Survival,
    Creative,
    Adventure,
    Spectator,
}

/// One read of an entity. Valid only for the instant it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Position,
    /// Yaw in radians; 0 faces +z.
    pub facing: f64,
    pub alive: bool,
    pub health: f64,
    pub adult: bool,
    pub in_liquid: bool,
    /// Named, owned or otherwise protected from despawning.
    pub persistent: bool,
    pub tamed: bool,
    pub game_mode: Option<GameMode>,
}

impl EntitySnapshot {
    /// A healthy adult creature at `position`.
    #[must_use]
    pub fn creature(id: EntityId, kind: EntityKind, position: Position) -> Self {
        Self {
            id,
            kind,
            position,
            facing: 0.0,
            alive: true,
            health: 10.0,
            adult: true,
            in_liquid: false,
            persistent: false,
            tamed: false,
            game_mode: None,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.alive && self.health > 0.0
    }

    /// Horizontal unit vector the entity is facing.
    #[must_use]
    pub fn facing_vector(&self) -> (f64, f64) {
        (-self.facing.sin(), self.facing.cos())
    }
}

/// Live world operations consumed by the engine. Queries never block; move,
/// kill and spawn requests are fire-and-forget.
pub trait WorldQuery {
    fn id(&self) -> WorldId;

    /// Time of day in ticks, 0..24000.
    fn time_of_day(&self) -> u64;

    /// Total in-world time; `full_time / 24000` is the day index.
    fn full_time(&self) -> u64;

    /// Live creatures of a kind. Snapshots may already be invalid.
    fn creatures(&self, kind: &EntityKind) -> Result<Vec<EntitySnapshot>, WorldError>;

    /// Re-resolve an identifier; `None` once the entity is gone.
    fn entity(&self, id: EntityId) -> Option<EntitySnapshot>;

    /// All entities within `radius` of `center`.
    fn entities_near(&self, center: Position, radius: f64) -> Vec<EntitySnapshot>;

    /// All entities whose position lies in `chunk`.
    fn entities_in_chunk(&self, chunk: ChunkPos) -> Vec<EntitySnapshot>;

    fn is_chunk_loaded(&self, chunk: ChunkPos) -> bool;

    /// Chunks currently loaded; drives opportunistic hazard refresh.
    fn loaded_chunks(&self) -> Vec<ChunkPos>;

    /// Top block of a column; `None` when the column is not loaded.
    fn surface(&self, x: i32, z: i32, mode: HeightMode) -> Option<Surface>;

    fn block(&self, x: i32, y: i32, z: i32) -> Material;

    fn biome(&self, position: Position) -> Biome;

    /// Ask an entity to path toward `target` at a relative speed.
    fn move_to(&mut self, id: EntityId, target: Position, speed: f64) -> bool;

    /// Set health to zero so death handlers run.
    fn soft_kill(&mut self, id: EntityId) -> bool;

    /// Remove without a death event.
    fn remove(&mut self, id: EntityId) -> bool;

    fn spawn(&mut self, kind: &EntityKind, at: Position) -> Result<EntityId, WorldError>;

    fn set_juvenile(&mut self, id: EntityId);

    fn set_block(&mut self, x: i32, y: i32, z: i32, material: Material) -> bool;
}

/// Standable location on the surface at `candidate`'s column: solid ground,
/// two passable blocks of headroom, and no liquid when `avoid_water` is set.
pub fn safe_ground(
    world: &dyn WorldQuery,
    candidate: Position,
    avoid_water: bool,
) -> Option<Position> {
    let (x, _, z) = candidate.block();
    let ground = world.surface(x, z, HeightMode::MotionBlockingNoLeaves)?;
    if avoid_water && ground.material.is_liquid() {
        return None;
    }
    if !ground.material.is_solid() {
        return None;
    }
    let head = world.block(x, ground.y + 1, z);
    let above_head = world.block(x, ground.y + 2, z);
    if !head.is_passable() || !above_head.is_passable() {
        return None;
    }
    Some(Position::new(
        f64::from(x) + 0.5,
        f64::from(ground.y) + 1.0,
        f64::from(z) + 0.5,
    ))
}

/// Largest height difference between a ground column and its four neighbours.
pub fn max_slope(world: &dyn WorldQuery, ground: Position) -> Option<i32> {
    const NEIGHBORS: [(i32, i32); 4] = [(0, -1), (0, 1), (1, 0), (-1, 0)];
    let (x, y, z) = ground.block();
    let center_y = y - 1;
    let mut max_diff = 0;
    for (dx, dz) in NEIGHBORS {
        let neighbor = world.surface(x + dx, z + dz, HeightMode::MotionBlockingNoLeaves)?;
        max_diff = max_diff.max((center_y - neighbor.y).abs());
    }
    Some(max_diff)
}

/// Feet and head both in water.
pub fn in_deep_water(world: &dyn WorldQuery, entity: &EntitySnapshot) -> bool {
    let (x, y, z) = entity.position.block();
    world.block(x, y, z).is_water() && world.block(x, y + 1, z).is_water()
}

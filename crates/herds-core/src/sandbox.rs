//! In-memory [`WorldQuery`] implementation: a column-based block world with
//! entities held in a generational slot map. Drives tests, benches and the
//! demo shell.

use crate::world::{EntitySnapshot, GameMode, HeightMode, Material, Surface, WorldError, WorldQuery};
use crate::{Biome, ChunkPos, EntityId, EntityKind, Position, TICKS_PER_DAY, WorldId};
use slotmap::{Key, KeyData, SlotMap, new_key_type};
use std::collections::{HashMap, HashSet};

new_key_type! {
    /// Slot handle for sandbox entities; exposed as [`EntityId`] through its ffi value.
    pub struct SandboxKey;
}

/// Depth below the highest block that surface scans give up at.
const SURFACE_SCAN_DEPTH: i32 = 96;

/// A recorded path request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveRequest {
    pub id: EntityId,
    pub target: Position,
    pub speed: f64,
}

#[derive(Debug, Clone)]
struct SandboxEntity {
    snapshot: EntitySnapshot,
    target: Option<(Position, f64)>,
}

#[derive(Debug, Clone, Copy)]
struct Column {
    ground: i32,
    top: Material,
}

/// Flat-by-default sandbox world. Terrain is a height per column with an
/// optional top material, plus sparse block overrides.
#[derive(Debug, Clone)]
pub struct SandboxWorld {
    id: WorldId,
    full_time: u64,
    base: Column,
    columns: HashMap<(i32, i32), Column>,
    overrides: HashMap<(i32, i32, i32), Material>,
    column_tops: HashMap<(i32, i32), i32>,
    chunk_min: ChunkPos,
    chunk_max: ChunkPos,
    unloaded: HashSet<ChunkPos>,
    biomes: HashMap<ChunkPos, Biome>,
    default_biome: Biome,
    entities: SlotMap<SandboxKey, SandboxEntity>,
    moves: Vec<MoveRequest>,
    soft_killed: Vec<EntityId>,
    removed: Vec<EntityId>,
    spawned: Vec<EntityId>,
    loaded: bool,
}

impl SandboxWorld {
    /// Grass plain at y = 64 spanning chunks -8..=7 on both axes, at noon.
    #[must_use]
    pub fn new(id: WorldId) -> Self {
        Self {
            id,
            full_time: 6_000,
            base: Column {
                ground: 64,
                top: Material::GrassBlock,
            },
            columns: HashMap::new(),
            overrides: HashMap::new(),
            column_tops: HashMap::new(),
            chunk_min: ChunkPos::new(-8, -8),
            chunk_max: ChunkPos::new(7, 7),
            unloaded: HashSet::new(),
            biomes: HashMap::new(),
            default_biome: Biome::from_static("plains"),
            entities: SlotMap::with_key(),
            moves: Vec::new(),
            soft_killed: Vec::new(),
            removed: Vec::new(),
            spawned: Vec::new(),
            loaded: true,
        }
    }

    /// Restrict the loaded area to an inclusive chunk rectangle.
    #[must_use]
    pub fn with_bounds(mut self, min: ChunkPos, max: ChunkPos) -> Self {
        self.chunk_min = ChunkPos::new(min.x.min(max.x), min.z.min(max.z));
        self.chunk_max = ChunkPos::new(min.x.max(max.x), min.z.max(max.z));
        self
    }

    // ---- clock -------------------------------------------------------------

    pub fn set_time_of_day(&mut self, time_of_day: u64) {
        let day = self.full_time / TICKS_PER_DAY;
        self.full_time = day * TICKS_PER_DAY + time_of_day % TICKS_PER_DAY;
    }

    /// Advance the clock, execute pending moves and reap dead entities.
    pub fn advance(&mut self, ticks: u64) {
        self.full_time = self.full_time.saturating_add(ticks);
        self.step_entities(0.25 * ticks as f64);
        self.reap();
    }

    // ---- terrain -----------------------------------------------------------

    /// Set the top solid block of a column.
    pub fn set_ground(&mut self, x: i32, z: i32, y: i32, top: Material) {
        self.columns.insert((x, z), Column { ground: y, top });
    }

    /// Set the ground of every column in an inclusive block rectangle.
    pub fn set_ground_area(&mut self, min: (i32, i32), max: (i32, i32), y: i32, top: Material) {
        for x in min.0..=max.0 {
            for z in min.1..=max.1 {
                self.set_ground(x, z, y, top);
            }
        }
    }

    /// Fill every column in the rectangle with water from its ground up to `level`.
    pub fn flood(&mut self, min: (i32, i32), max: (i32, i32), level: i32) {
        for x in min.0..=max.0 {
            for z in min.1..=max.1 {
                let ground = self.column(x, z).ground;
                for y in (ground + 1)..=level {
                    self.put_block(x, y, z, Material::Water);
                }
            }
        }
    }

    /// Hollow out an air pocket in a column between two heights, inclusive.
    pub fn carve(&mut self, x: i32, z: i32, from_y: i32, to_y: i32) {
        for y in from_y.min(to_y)..=from_y.max(to_y) {
            self.put_block(x, y, z, Material::CaveAir);
        }
    }

    pub fn unload_chunk(&mut self, chunk: ChunkPos) {
        self.unloaded.insert(chunk);
    }

    pub fn load_chunk(&mut self, chunk: ChunkPos) {
        self.unloaded.remove(&chunk);
    }

    /// Mark the whole world unloaded; further queries fail.
    pub fn set_loaded(&mut self, loaded: bool) {
        self.loaded = loaded;
    }

    pub fn set_biome(&mut self, chunk: ChunkPos, biome: Biome) {
        self.biomes.insert(chunk, biome);
    }

    fn column(&self, x: i32, z: i32) -> Column {
        self.columns.get(&(x, z)).copied().unwrap_or(self.base)
    }

    fn natural_block(&self, x: i32, y: i32, z: i32) -> Material {
        let column = self.column(x, z);
        if y > column.ground {
            Material::Air
        } else if y == column.ground {
            column.top
        } else if y >= column.ground - 3 {
            Material::Dirt
        } else {
            Material::Stone
        }
    }

    fn put_block(&mut self, x: i32, y: i32, z: i32, material: Material) {
        self.overrides.insert((x, y, z), material);
        let top = self.column_tops.entry((x, z)).or_insert(y);
        *top = (*top).max(y);
    }

    // ---- entities ----------------------------------------------------------

    /// Insert an arbitrary entity; the snapshot's id is replaced.
    pub fn insert(&mut self, mut snapshot: EntitySnapshot) -> EntityId {
        let key = self.entities.insert_with_key(|key| {
            snapshot.id = EntityId(key.data().as_ffi());
            SandboxEntity {
                snapshot,
                target: None,
            }
        });
        EntityId(key.data().as_ffi())
    }

    /// Insert a healthy adult creature of `kind`.
    pub fn add_creature(&mut self, kind: &EntityKind, position: Position) -> EntityId {
        self.insert(EntitySnapshot::creature(
            EntityId::default(),
            kind.clone(),
            position,
        ))
    }

    pub fn add_player(&mut self, position: Position, mode: GameMode) -> EntityId {
        let mut snapshot =
            EntitySnapshot::creature(EntityId::default(), EntityKind::PLAYER, position);
        snapshot.game_mode = Some(mode);
        snapshot.health = 20.0;
        self.insert(snapshot)
    }

    /// Mutable access to a stored entity, for test setup.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut EntitySnapshot> {
        self.entities
            .get_mut(Self::key(id))
            .map(|entity| &mut entity.snapshot)
    }

    pub fn set_position(&mut self, id: EntityId, position: Position) -> bool {
        match self.entity_mut(id) {
            Some(snapshot) => {
                snapshot.position = position;
                true
            }
            None => false,
        }
    }

    /// Number of valid entities of a kind.
    #[must_use]
    pub fn population(&self, kind: &EntityKind) -> usize {
        self.entities
            .values()
            .filter(|entity| entity.snapshot.kind == *kind && entity.snapshot.is_valid())
            .count()
    }

    #[must_use]
    pub fn move_requests(&self) -> &[MoveRequest] {
        &self.moves
    }

    pub fn clear_move_requests(&mut self) {
        self.moves.clear();
    }

    #[must_use]
    pub fn soft_killed(&self) -> &[EntityId] {
        &self.soft_killed
    }

    #[must_use]
    pub fn removed(&self) -> &[EntityId] {
        &self.removed
    }

    #[must_use]
    pub fn spawned(&self) -> &[EntityId] {
        &self.spawned
    }

    /// Drop dead entities, as a death handler would.
    pub fn reap(&mut self) {
        self.entities.retain(|_, entity| entity.snapshot.is_valid());
    }

    /// Move every entity with a pending target up to `step * speed` blocks.
    pub fn step_entities(&mut self, step: f64) {
        let mut updates = Vec::new();
        for (key, entity) in &self.entities {
            let Some((target, speed)) = entity.target else {
                continue;
            };
            let from = entity.snapshot.position;
            let dx = target.x - from.x;
            let dz = target.z - from.z;
            let distance = (dx * dx + dz * dz).sqrt();
            let reach = (step * speed).max(0.0);
            let (nx, nz, arrived) = if distance <= reach || distance == 0.0 {
                (target.x, target.z, true)
            } else {
                (from.x + dx / distance * reach, from.z + dz / distance * reach, false)
            };
            let facing = if distance > 0.0 {
                (-dx).atan2(dz)
            } else {
                entity.snapshot.facing
            };
            updates.push((key, nx, nz, facing, arrived));
        }
        for (key, x, z, facing, arrived) in updates {
            let ground = self.surface_y(x.floor() as i32, z.floor() as i32);
            if let Some(entity) = self.entities.get_mut(key) {
                let y = ground.map_or(entity.snapshot.position.y, |g| f64::from(g) + 1.0);
                entity.snapshot.position = Position::new(x, y, z);
                entity.snapshot.facing = facing;
                if arrived {
                    entity.target = None;
                }
            }
        }
    }

    fn surface_y(&self, x: i32, z: i32) -> Option<i32> {
        self.surface(x, z, HeightMode::MotionBlockingNoLeaves)
            .map(|surface| surface.y)
    }

    fn key(id: EntityId) -> SandboxKey {
        SandboxKey::from(KeyData::from_ffi(id.0))
    }

    fn snapshot(&self, entity: &SandboxEntity) -> EntitySnapshot {
        let mut snapshot = entity.snapshot.clone();
        let (x, y, z) = snapshot.position.block();
        snapshot.in_liquid = self.block(x, y, z).is_liquid();
        snapshot
    }

    fn chunk_in_bounds(&self, chunk: ChunkPos) -> bool {
        chunk.x >= self.chunk_min.x
            && chunk.x <= self.chunk_max.x
            && chunk.z >= self.chunk_min.z
            && chunk.z <= self.chunk_max.z
    }
}

impl WorldQuery for SandboxWorld {
    fn id(&self) -> WorldId {
        self.id
    }

    fn time_of_day(&self) -> u64 {
        self.full_time % TICKS_PER_DAY
    }

    fn full_time(&self) -> u64 {
        self.full_time
    }

    fn creatures(&self, kind: &EntityKind) -> Result<Vec<EntitySnapshot>, WorldError> {
        if !self.loaded {
            return Err(WorldError::Unloaded(self.id));
        }
        Ok(self
            .entities
            .values()
            .filter(|entity| entity.snapshot.kind == *kind)
            .map(|entity| self.snapshot(entity))
            .collect())
    }

    fn entity(&self, id: EntityId) -> Option<EntitySnapshot> {
        self.entities
            .get(Self::key(id))
            .map(|entity| self.snapshot(entity))
    }

    fn entities_near(&self, center: Position, radius: f64) -> Vec<EntitySnapshot> {
        let radius_sq = radius * radius;
        self.entities
            .values()
            .filter(|entity| entity.snapshot.position.distance_squared(center) <= radius_sq)
            .map(|entity| self.snapshot(entity))
            .collect()
    }

    fn entities_in_chunk(&self, chunk: ChunkPos) -> Vec<EntitySnapshot> {
        if !self.is_chunk_loaded(chunk) {
            return Vec::new();
        }
        self.entities
            .values()
            .filter(|entity| entity.snapshot.position.chunk() == chunk)
            .map(|entity| self.snapshot(entity))
            .collect()
    }

    fn is_chunk_loaded(&self, chunk: ChunkPos) -> bool {
        self.loaded && self.chunk_in_bounds(chunk) && !self.unloaded.contains(&chunk)
    }

    fn loaded_chunks(&self) -> Vec<ChunkPos> {
        if !self.loaded {
            return Vec::new();
        }
        (self.chunk_min.x..=self.chunk_max.x)
            .flat_map(|x| (self.chunk_min.z..=self.chunk_max.z).map(move |z| ChunkPos::new(x, z)))
            .filter(|chunk| !self.unloaded.contains(chunk))
            .collect()
    }

    fn surface(&self, x: i32, z: i32, mode: HeightMode) -> Option<Surface> {
        if !self.is_chunk_loaded(ChunkPos::of_block(x, z)) {
            return None;
        }
        let ground = self.column(x, z).ground;
        let start = self
            .column_tops
            .get(&(x, z))
            .map_or(ground, |top| (*top).max(ground));
        for y in ((start - SURFACE_SCAN_DEPTH)..=start).rev() {
            let material = self.block(x, y, z);
            let hit = match mode {
                HeightMode::MotionBlocking => material.is_solid() || material.is_liquid(),
                HeightMode::MotionBlockingNoLeaves => {
                    (material.is_solid() && material != Material::Leaves) || material.is_liquid()
                }
                HeightMode::OceanFloor => material.is_solid(),
            };
            if hit {
                return Some(Surface { y, material });
            }
        }
        None
    }

    fn block(&self, x: i32, y: i32, z: i32) -> Material {
        self.overrides
            .get(&(x, y, z))
            .copied()
            .unwrap_or_else(|| self.natural_block(x, y, z))
    }

    fn biome(&self, position: Position) -> Biome {
        self.biomes
            .get(&position.chunk())
            .cloned()
            .unwrap_or_else(|| self.default_biome.clone())
    }

    fn move_to(&mut self, id: EntityId, target: Position, speed: f64) -> bool {
        let Some(entity) = self.entities.get_mut(Self::key(id)) else {
            return false;
        };
        if !entity.snapshot.is_valid() || !target.is_finite() {
            return false;
        }
        entity.target = Some((target, speed));
        self.moves.push(MoveRequest { id, target, speed });
        true
    }

    fn soft_kill(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.entities.get_mut(Self::key(id)) else {
            return false;
        };
        if !entity.snapshot.is_valid() {
            return false;
        }
        entity.snapshot.health = 0.0;
        entity.snapshot.alive = false;
        self.soft_killed.push(id);
        true
    }

    fn remove(&mut self, id: EntityId) -> bool {
        if self.entities.remove(Self::key(id)).is_some() {
            self.removed.push(id);
            true
        } else {
            false
        }
    }

    fn spawn(&mut self, kind: &EntityKind, at: Position) -> Result<EntityId, WorldError> {
        if !at.is_finite() || !self.is_chunk_loaded(at.chunk()) {
            return Err(WorldError::SpawnRejected {
                kind: kind.to_string(),
                reason: "location not loaded",
            });
        }
        let (x, y, z) = at.block();
        if !self.block(x, y, z).is_passable() || !self.block(x, y + 1, z).is_passable() {
            return Err(WorldError::SpawnRejected {
                kind: kind.to_string(),
                reason: "location blocked",
            });
        }
        let id = self.add_creature(kind, at);
        self.spawned.push(id);
        Ok(id)
    }

    fn set_juvenile(&mut self, id: EntityId) {
        if let Some(snapshot) = self.entity_mut(id) {
            snapshot.adult = false;
        }
    }

    fn set_block(&mut self, x: i32, y: i32, z: i32, material: Material) -> bool {
        if !self.is_chunk_loaded(ChunkPos::of_block(x, z)) {
            return false;
        }
        let column = self.column(x, z);
        if y == column.ground && material.is_solid() {
            self.columns.insert((x, z), Column { ground: y, top: material });
            self.overrides.remove(&(x, y, z));
            return true;
        }
        self.put_block(x, y, z, material);
        true
    }
}

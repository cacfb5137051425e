//! Hazard Map: per-region grids of terrain-danger scores used to rank flee
//! and wander destinations.

use crate::config::HazardConfig;
use crate::world::{HeightMode, WorldQuery};
use crate::{ChunkPos, Position, REGION_SIZE, RegionPos, Tick, WorldId};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Raw terrain signals for one sample point.
#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    height: Option<i32>,
    liquid: bool,
    cave: bool,
}

/// Score grid for one region. Cells are read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionHazardMap {
    region: RegionPos,
    spacing: i32,
    side: usize,
    scores: Vec<u8>,
    complete: bool,
    built: Tick,
    accessed: Tick,
}

impl RegionHazardMap {
    /// Sample `region` from the live world.
    pub fn build(
        world: &dyn WorldQuery,
        region: RegionPos,
        config: &HazardConfig,
        now: Tick,
    ) -> Self {
        let spacing = config.sample_spacing.clamp(1, REGION_SIZE);
        let side = (REGION_SIZE as usize).div_ceil(spacing as usize);
        let (min_x, min_z) = region.min_block();
        let offset = spacing / 2;

        let mut samples = vec![Sample::default(); side * side];
        let mut complete = true;
        for i in 0..side {
            for j in 0..side {
                let x = min_x + i as i32 * spacing + offset;
                let z = min_z + j as i32 * spacing + offset;
                let sample = sample_column(world, x, z, &config.cave_probe_depths);
                complete &= sample.height.is_some();
                samples[i * side + j] = sample;
            }
        }

        let mut scores = vec![0u8; side * side];
        for i in 0..side {
            for j in 0..side {
                let sample = samples[i * side + j];
                let mut score = 0u8;
                if sample.liquid {
                    score = score.saturating_add(config.water_penalty);
                }
                if let Some(height) = sample.height {
                    let steep = neighbours(i, j, side).any(|(ni, nj)| {
                        samples[ni * side + nj]
                            .height
                            .is_some_and(|other| (other - height).abs() > config.cliff_threshold)
                    });
                    if steep {
                        score = score.saturating_add(config.cliff_penalty);
                    }
                }
                if sample.cave {
                    score = score.saturating_add(config.cave_penalty);
                }
                scores[i * side + j] = score;
            }
        }

        Self {
            region,
            spacing,
            side,
            scores,
            complete,
            built: now,
            accessed: now,
        }
    }

    /// Score of the cell covering a block column; zero outside this region.
    #[must_use]
    pub fn score_at(&self, block_x: i32, block_z: i32) -> u8 {
        if !self.region.contains_block(block_x, block_z) {
            return 0;
        }
        let (min_x, min_z) = self.region.min_block();
        let i = ((block_x - min_x) / self.spacing) as usize;
        let j = ((block_z - min_z) / self.spacing) as usize;
        self.scores.get(i * self.side + j).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn region(&self) -> RegionPos {
        self.region
    }

    /// Whether every sample column was loaded at build time.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    #[must_use]
    pub fn built(&self) -> Tick {
        self.built
    }

    #[must_use]
    pub fn accessed(&self) -> Tick {
        self.accessed
    }

    fn is_stale(&self, now: Tick, config: &HazardConfig) -> bool {
        let max_age = if self.complete {
            config.rebuild_interval_ticks
        } else {
            config.incomplete_rebuild_interval_ticks
        };
        now.since(self.built) >= max_age
    }
}

fn neighbours(i: usize, j: usize, side: usize) -> impl Iterator<Item = (usize, usize)> {
    [(0i32, -1i32), (0, 1), (-1, 0), (1, 0)]
        .into_iter()
        .filter_map(move |(di, dj)| {
            let ni = i.checked_add_signed(di as isize)?;
            let nj = j.checked_add_signed(dj as isize)?;
            (ni < side && nj < side).then_some((ni, nj))
        })
}

fn sample_column(world: &dyn WorldQuery, x: i32, z: i32, cave_depths: &[i32]) -> Sample {
    let Some(top) = world.surface(x, z, HeightMode::MotionBlocking) else {
        return Sample::default();
    };
    let floor = world.surface(x, z, HeightMode::OceanFloor);
    let liquid = top.material.is_liquid()
        || floor.is_some_and(|floor| world.block(x, floor.y + 1, z).is_liquid());
    let ground = world
        .surface(x, z, HeightMode::MotionBlockingNoLeaves)
        .map_or(top.y, |surface| surface.y);
    let base = floor.map_or(ground, |floor| floor.y);
    let cave = cave_depths
        .iter()
        .any(|depth| world.block(x, base - depth, z).is_air());
    Sample {
        height: Some(ground),
        liquid,
        cave,
    }
}

/// Lazily built hazard grids for every world, with staleness refresh and
/// LRU eviction.
#[derive(Debug, Clone, Default)]
pub struct HazardMap {
    config: HazardConfig,
    regions: HashMap<(WorldId, RegionPos), RegionHazardMap>,
    builds: u64,
}

impl HazardMap {
    #[must_use]
    pub fn new(config: HazardConfig) -> Self {
        Self {
            config,
            regions: HashMap::new(),
            builds: 0,
        }
    }

    /// Hazard score at `position`, building or refreshing its region first.
    pub fn score(&mut self, world: &dyn WorldQuery, position: Position, now: Tick) -> u8 {
        let (x, _, z) = position.block();
        let key = (world.id(), RegionPos::of_block(x, z));
        let stale = self
            .regions
            .get(&key)
            .is_none_or(|map| map.is_stale(now, &self.config));
        if stale {
            self.rebuild(world, key.1, now);
        }
        let score = match self.regions.get_mut(&key) {
            Some(map) => {
                map.accessed = now;
                map.score_at(x, z)
            }
            None => 0,
        };
        if stale {
            self.evict_over_capacity();
        }
        score
    }

    /// Opportunistic refresh: evict idle regions, then build at most
    /// `refresh_batch` missing or stale regions covering loaded chunks.
    /// `cancelled` is checked before each region. Returns the regions built.
    pub fn maintain(
        &mut self,
        world: &dyn WorldQuery,
        now: Tick,
        mut cancelled: impl FnMut() -> bool,
    ) -> usize {
        let idle = self.config.idle_eviction_ticks;
        let before = self.regions.len();
        self.regions
            .retain(|_, map| now.since(map.accessed) < idle);
        let evicted = before - self.regions.len();

        let wanted: BTreeSet<RegionPos> = world
            .loaded_chunks()
            .into_iter()
            .map(ChunkPos::region)
            .collect();
        let mut built = 0;
        for region in wanted {
            if built >= self.config.refresh_batch || cancelled() {
                break;
            }
            let needs_build = self
                .regions
                .get(&(world.id(), region))
                .is_none_or(|map| map.is_stale(now, &self.config));
            if needs_build {
                self.rebuild(world, region, now);
                built += 1;
            }
        }
        self.evict_over_capacity();
        if built > 0 || evicted > 0 {
            debug!(world = world.id().0, built, evicted, "hazard maintenance");
        }
        built
    }

    /// Drop every grid of one world, e.g. after terrain edits.
    pub fn invalidate_world(&mut self, world: WorldId) {
        self.regions.retain(|(id, _), _| *id != world);
    }

    #[must_use]
    pub fn region(&self, world: WorldId, region: RegionPos) -> Option<&RegionHazardMap> {
        self.regions.get(&(world, region))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Total region builds so far.
    #[must_use]
    pub fn builds(&self) -> u64 {
        self.builds
    }

    #[must_use]
    pub fn config(&self) -> &HazardConfig {
        &self.config
    }

    fn rebuild(&mut self, world: &dyn WorldQuery, region: RegionPos, now: Tick) {
        let map = RegionHazardMap::build(world, region, &self.config, now);
        self.builds += 1;
        self.regions.insert((world.id(), region), map);
    }

    fn evict_over_capacity(&mut self) {
        let excess = self.regions.len().saturating_sub(self.config.max_regions);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<((WorldId, RegionPos), Tick)> = self
            .regions
            .iter()
            .map(|(key, map)| (*key, map.accessed))
            .collect();
        by_age.sort_by_key(|(key, accessed)| (*accessed, *key));
        for (key, _) in by_age.into_iter().take(excess) {
            self.regions.remove(&key);
        }
    }
}

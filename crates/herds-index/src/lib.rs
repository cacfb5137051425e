//! Spatial keys and neighbourhood indexing for herd queries.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Edge length of one world chunk, in blocks.
pub const CHUNK_SIZE: i32 = 16;
/// Edge length of one hazard region, in blocks (8×8 chunks).
pub const REGION_SIZE: i32 = 128;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A position handed to `rebuild` contained NaN or infinity.
    #[error("position {0} is not finite")]
    NonFinitePosition(usize),
}

/// Horizontal chunk coordinate (16×16 block columns).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk holding the given block column.
    #[must_use]
    pub const fn of_block(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x.div_euclid(CHUNK_SIZE),
            z: block_z.div_euclid(CHUNK_SIZE),
        }
    }

    /// Chunk holding a continuous world coordinate.
    #[must_use]
    pub fn containing(x: f64, z: f64) -> Self {
        Self::of_block(x.floor() as i32, z.floor() as i32)
    }

    /// Lowest block column (x, z) inside this chunk.
    #[must_use]
    pub const fn min_block(self) -> (i32, i32) {
        (self.x * CHUNK_SIZE, self.z * CHUNK_SIZE)
    }

    /// Region this chunk belongs to.
    #[must_use]
    pub const fn region(self) -> RegionPos {
        let (bx, bz) = self.min_block();
        RegionPos::of_block(bx, bz)
    }

    /// Every chunk in the square of the given chunk radius, centre included.
    pub fn square(self, radius: i32) -> impl Iterator<Item = ChunkPos> {
        let radius = radius.max(0);
        (-radius..=radius).flat_map(move |dx| {
            (-radius..=radius).map(move |dz| ChunkPos::new(self.x + dx, self.z + dz))
        })
    }
}

/// Horizontal region coordinate; one hazard grid is built per region.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    #[must_use]
    pub const fn of_block(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x.div_euclid(REGION_SIZE),
            z: block_z.div_euclid(REGION_SIZE),
        }
    }

    #[must_use]
    pub fn containing(x: f64, z: f64) -> Self {
        Self::of_block(x.floor() as i32, z.floor() as i32)
    }

    #[must_use]
    pub const fn min_block(self) -> (i32, i32) {
        (self.x * REGION_SIZE, self.z * REGION_SIZE)
    }

    /// Whether a block column lies inside this region.
    #[must_use]
    pub const fn contains_block(self, block_x: i32, block_z: i32) -> bool {
        let (min_x, min_z) = self.min_block();
        block_x >= min_x
            && block_x < min_x + REGION_SIZE
            && block_z >= min_z
            && block_z < min_z + REGION_SIZE
    }
}

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborhoodIndex {
    /// Rebuild internal structures from point positions.
    fn rebuild(&mut self, positions: &[[f64; 3]]) -> Result<(), IndexError>;

    /// Visit points within the provided squared radius of `point_idx`, excluding itself.
    fn neighbors_within(
        &self,
        point_idx: usize,
        radius_sq: f64,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f64>),
    );
}

/// Uniform horizontal bucket grid; distances are measured in full 3-D.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformGridIndex {
    /// Edge length of each grid cell used for bucketing points.
    pub cell_size: f64,
    #[serde(skip)]
    buckets: HashMap<(i64, i64), Vec<usize>>,
    #[serde(skip)]
    positions: Vec<[f64; 3]>,
}

impl UniformGridIndex {
    /// Create a new uniform grid with the provided cell size.
    #[must_use]
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size,
            buckets: HashMap::new(),
            positions: Vec::new(),
        }
    }

    /// Number of indexed points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn bucket_of(&self, position: [f64; 3]) -> (i64, i64) {
        (
            (position[0] / self.cell_size).floor() as i64,
            (position[2] / self.cell_size).floor() as i64,
        )
    }
}

impl Default for UniformGridIndex {
    fn default() -> Self {
        Self::new(16.0)
    }
}

impl NeighborhoodIndex for UniformGridIndex {
    fn rebuild(&mut self, positions: &[[f64; 3]]) -> Result<(), IndexError> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        if let Some(bad) = positions
            .iter()
            .position(|p| p.iter().any(|c| !c.is_finite()))
        {
            return Err(IndexError::NonFinitePosition(bad));
        }
        self.buckets.clear();
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        for (idx, position) in positions.iter().enumerate() {
            let key = self.bucket_of(*position);
            self.buckets.entry(key).or_default().push(idx);
        }
        Ok(())
    }

    fn neighbors_within(
        &self,
        point_idx: usize,
        radius_sq: f64,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f64>),
    ) {
        let Some(&origin) = self.positions.get(point_idx) else {
            return;
        };
        if radius_sq < 0.0 || !radius_sq.is_finite() {
            return;
        }
        let span = (radius_sq.sqrt() / self.cell_size).ceil() as i64;
        let (cx, cz) = self.bucket_of(origin);
        for bx in (cx - span)..=(cx + span) {
            for bz in (cz - span)..=(cz + span) {
                let Some(bucket) = self.buckets.get(&(bx, bz)) else {
                    continue;
                };
                for &other in bucket {
                    if other == point_idx {
                        continue;
                    }
                    let p = self.positions[other];
                    let dx = p[0] - origin[0];
                    let dy = p[1] - origin[1];
                    let dz = p[2] - origin[2];
                    let dist_sq = dx * dx + dy * dy + dz * dz;
                    if dist_sq <= radius_sq {
                        visitor(other, OrderedFloat(dist_sq));
                    }
                }
            }
        }
    }
}

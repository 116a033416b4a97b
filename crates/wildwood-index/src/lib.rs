//! Chunk-grid spatial index for streamed world entities.
//!
//! The world is partitioned into fixed-size square chunks addressed by an
//! integer [`ChunkCoord`]. Entities are bucketed by the chunk containing
//! their planar position, which keeps neighborhood queries proportional to
//! the handful of chunks covering the query radius instead of the whole
//! entity population. The index is generic over the entity key type so it
//! carries no knowledge of the simulation's entity model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors surfaced by spatial index operations.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum IndexError {
    /// The index was configured with an unusable parameter.
    #[error("invalid index configuration: {0}")]
    InvalidConfig(&'static str),
    /// A bucket operation was attempted with a NaN or infinite coordinate.
    /// Accepting it would corrupt the bucket map silently, so it is
    /// rejected up front.
    #[error("non-finite world position ({x}, {z})")]
    NonFinitePosition { x: f32, z: f32 },
}

/// Integer chunk coordinate.
///
/// `Display` renders the canonical `"x,z"` key used in logs and debug
/// output.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl ChunkCoord {
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing the given planar world position.
    ///
    /// Uses floor division so positions with negative components map to
    /// negative chunk coordinates rather than clustering around zero.
    #[must_use]
    pub fn from_world(x: f32, z: f32, chunk_size: f32) -> Self {
        Self {
            x: (x / chunk_size).floor() as i32,
            z: (z / chunk_size).floor() as i32,
        }
    }

    /// Chebyshev (chessboard) distance in whole chunks.
    #[must_use]
    pub const fn chebyshev(self, other: Self) -> i32 {
        let dx = (self.x - other.x).abs();
        let dz = (self.z - other.z).abs();
        if dx > dz { dx } else { dz }
    }

    /// All coordinates within `radius` chunks of `self`, row-major.
    ///
    /// The square has side `2 * radius + 1`; a negative radius yields an
    /// empty set.
    #[must_use]
    pub fn chunks_in_radius(self, radius: i32) -> Vec<ChunkCoord> {
        if radius < 0 {
            return Vec::new();
        }
        let side = (2 * radius + 1) as usize;
        let mut coords = Vec::with_capacity(side * side);
        for z in (self.z - radius)..=(self.z + radius) {
            for x in (self.x - radius)..=(self.x + radius) {
                coords.push(ChunkCoord::new(x, z));
            }
        }
        coords
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}

/// Bucketed chunk-grid index mapping chunk coordinates to entity keys.
///
/// The caller owns the authoritative entity-to-position mapping and is
/// responsible for calling [`ChunkGridIndex::relocate`] whenever an
/// entity's recomputed chunk no longer matches its bucketed one.
#[derive(Debug, Clone)]
pub struct ChunkGridIndex<K> {
    chunk_size: f32,
    buckets: HashMap<ChunkCoord, Vec<K>>,
    len: usize,
}

impl<K: Copy + PartialEq> ChunkGridIndex<K> {
    /// Creates an index over square chunks of `chunk_size` world units.
    pub fn new(chunk_size: f32) -> Result<Self, IndexError> {
        if !chunk_size.is_finite() || chunk_size <= 0.0 {
            return Err(IndexError::InvalidConfig(
                "chunk size must be finite and positive",
            ));
        }
        Ok(Self {
            chunk_size,
            buckets: HashMap::new(),
            len: 0,
        })
    }

    #[must_use]
    pub fn chunk_size(&self) -> f32 {
        self.chunk_size
    }

    /// Chunk coordinate owning a planar world position.
    pub fn resolve(&self, x: f32, z: f32) -> Result<ChunkCoord, IndexError> {
        if !x.is_finite() || !z.is_finite() {
            return Err(IndexError::NonFinitePosition { x, z });
        }
        Ok(ChunkCoord::from_world(x, z, self.chunk_size))
    }

    /// Smallest whole-chunk radius whose square covers a world-space radius.
    #[must_use]
    pub fn chunk_radius_for(&self, radius: f32) -> i32 {
        if !radius.is_finite() || radius <= 0.0 {
            return 0;
        }
        (radius / self.chunk_size).ceil() as i32
    }

    /// Buckets `key` under the chunk containing `(x, z)`.
    ///
    /// Returns the bucket coordinate so the caller can cache it. Keys are
    /// not deduplicated; the caller enforces at-most-once registration.
    pub fn insert(&mut self, key: K, x: f32, z: f32) -> Result<ChunkCoord, IndexError> {
        let coord = self.resolve(x, z)?;
        self.buckets.entry(coord).or_default().push(key);
        self.len += 1;
        Ok(coord)
    }

    /// Removes `key` from the bucket at `coord`.
    ///
    /// Idempotent: removing a key that is not present returns `false` and
    /// changes nothing.
    pub fn remove(&mut self, key: K, coord: ChunkCoord) -> bool {
        let Some(bucket) = self.buckets.get_mut(&coord) else {
            return false;
        };
        let Some(at) = bucket.iter().position(|existing| *existing == key) else {
            return false;
        };
        bucket.swap_remove(at);
        if bucket.is_empty() {
            self.buckets.remove(&coord);
        }
        self.len -= 1;
        true
    }

    /// Moves `key` from one bucket to another after a boundary crossing.
    ///
    /// Returns `false` (leaving the index untouched) when the key was not
    /// bucketed at `from`.
    pub fn relocate(&mut self, key: K, from: ChunkCoord, to: ChunkCoord) -> bool {
        if from == to {
            return true;
        }
        if !self.remove(key, from) {
            return false;
        }
        self.buckets.entry(to).or_default().push(key);
        self.len += 1;
        true
    }

    /// Keys currently bucketed under `coord`.
    #[must_use]
    pub fn bucket(&self, coord: ChunkCoord) -> &[K] {
        self.buckets.get(&coord).map_or(&[], Vec::as_slice)
    }

    /// Visits every key bucketed within `chunk_radius` chunks of `center`,
    /// row-major by chunk, insertion order within each bucket.
    pub fn visit_range(&self, center: ChunkCoord, chunk_radius: i32, visit: &mut dyn FnMut(K)) {
        for coord in center.chunks_in_radius(chunk_radius) {
            for &key in self.bucket(coord) {
                visit(key);
            }
        }
    }

    /// Number of bucketed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of non-empty buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }
}

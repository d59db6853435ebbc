use serde::{Deserialize, Serialize};

use crate::Point;

/// Width of a chunk column along X and Z, in world units.
pub const CHUNK_SIZE: f64 = 16.0;

/// Largest radius a [`ChunkRange`] spans. Larger radii are clamped to it.
pub const MAX_CHUNK_RADIUS: i32 = 1 << 20;

/// A 2D chunk coordinate (the Y axis does not partition the world).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl ChunkCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing `point`. Floors, so `-0.5` lands in chunk `-1`.
    pub fn from_point(point: Point) -> Self {
        Self {
            x: (point.x / CHUNK_SIZE).floor() as i32,
            z: (point.z / CHUNK_SIZE).floor() as i32,
        }
    }

    /// Chebyshev (square) distance in chunks, saturating at `i32::MAX`.
    pub fn chebyshev(self, other: ChunkCoord) -> i32 {
        let dx = (i64::from(self.x) - i64::from(other.x)).abs();
        let dz = (i64::from(self.z) - i64::from(other.z)).abs();
        i32::try_from(dx.max(dz)).unwrap_or(i32::MAX)
    }

    /// Every chunk within `radius` of this one, both ends inclusive.
    pub fn range(self, radius: i32) -> ChunkRange {
        ChunkRange::new(self, radius)
    }

    /// Whether the two chunks touch, diagonals included.
    pub fn is_adjacent(self, other: ChunkCoord) -> bool {
        self != other && self.chebyshev(other) <= 1
    }
}

impl std::fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Square range of chunks centered on a chunk. Iterates row by row.
///
/// The radius is clamped to `0..=MAX_CHUNK_RADIUS`. Cells that would fall
/// outside the `i32` coordinate space are skipped.
#[derive(Debug, Clone)]
pub struct ChunkRange {
    center: ChunkCoord,
    radius: i32,
    dx: i32,
    dz: i32,
}

impl ChunkRange {
    pub fn new(center: ChunkCoord, radius: i32) -> Self {
        let radius = radius.clamp(0, MAX_CHUNK_RADIUS);
        Self {
            center,
            radius,
            dx: -radius,
            dz: -radius,
        }
    }

    pub fn center(&self) -> ChunkCoord {
        self.center
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.center.chebyshev(coord) <= self.radius
    }

    /// Number of chunks covered by the full range.
    pub fn area(&self) -> usize {
        let side = 2 * self.radius as usize + 1;
        side.saturating_mul(side)
    }
}

impl Iterator for ChunkRange {
    type Item = ChunkCoord;

    fn next(&mut self) -> Option<ChunkCoord> {
        while self.dx <= self.radius {
            let x = self.center.x.checked_add(self.dx);
            let z = self.center.z.checked_add(self.dz);
            self.dz += 1;
            if self.dz > self.radius {
                self.dz = -self.radius;
                self.dx += 1;
            }
            if let (Some(x), Some(z)) = (x, z) {
                return Some(ChunkCoord::new(x, z));
            }
        }
        None
    }
}

//! Shared identity and coordinate types.
//!
//! # Invariants
//! - A point maps to exactly one chunk coordinate.
//! - Chunk range iteration is inclusive on both ends.

mod chunk;
mod types;

pub use chunk::{CHUNK_SIZE, ChunkCoord, ChunkRange, MAX_CHUNK_RADIUS};
pub use types::{EntityId, Point, WorldId};

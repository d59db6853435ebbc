//! Entity tracking: which entities live in which chunk, and who can see them.
//!
//! # Invariants
//! - A tracked entity sits in exactly one chunk bucket per matching target.
//! - Moving within a chunk never changes bucket membership or fires updates.
//! - The "became visible" and "became invisible" halves of a diff are disjoint.
//!
//! [`ChunkIndex`] is the plain index; wrap it in [`Synchronized`] when more
//! than one thread can reach the same world's buckets in a tick.

mod index;
mod sync;
mod target;
mod tracking;

pub use index::ChunkIndex;
pub use sync::Synchronized;
pub use target::{EntityKind, Target, TrackedEntity, Update, VisibilitySet};
pub use tracking::{EntityTracking, TrackingError, nearby_chunk_radius};

/// View distance used when nothing else is configured, in chunks.
pub const DEFAULT_VIEW_DISTANCE: i32 = 8;

pub fn crate_info() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("tracking"));
    }
}

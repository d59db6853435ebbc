//! World Kernel: worlds, their per-tick work, and the directory that owns them.
//!
//! # Invariants
//! - All entity mutations flow through explicit world operations.
//! - A queued move is applied by exactly one tick, in whichever partition
//!   currently owns the entity's chunk.
//! - Chunk load/unload signals are recorded in the order they happened.

pub mod admission;
pub mod directory;
pub mod world;

pub use admission::{Admission, AdmissionQueue, WaitingAdmissions};
pub use directory::WorldDirectory;
pub use world::{ChunkSignal, ChunkSignalKind, TickSummary, ViewEvent, World, WorldError, WorldEvent};

pub fn crate_info() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("kernel"));
    }
}

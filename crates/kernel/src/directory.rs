use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tickspace_common::WorldId;

use crate::world::{ChunkSignal, World, WorldError};

/// Every active world, keyed by id.
///
/// BTreeMap so enumeration order, and therefore partition order, is the same
/// on every run.
#[derive(Debug, Default)]
pub struct WorldDirectory {
    worlds: RwLock<BTreeMap<WorldId, Arc<World>>>,
}

impl WorldDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register an empty world. Nothing is registered when
    /// `view_distance` is rejected.
    pub fn create(&self, view_distance: i32) -> Result<Arc<World>, WorldError> {
        let world = Arc::new(World::new(view_distance)?);
        self.insert(Arc::clone(&world));
        Ok(world)
    }

    /// Register an existing world, replacing any world with the same id.
    pub fn insert(&self, world: Arc<World>) {
        tracing::info!(world = %world.id(), "world registered");
        self.worlds.write().insert(world.id(), world);
    }

    pub fn remove(&self, id: WorldId) -> Option<Arc<World>> {
        let removed = self.worlds.write().remove(&id);
        if removed.is_some() {
            tracing::info!(world = %id, "world removed");
        }
        removed
    }

    pub fn get(&self, id: WorldId) -> Option<Arc<World>> {
        self.worlds.read().get(&id).cloned()
    }

    pub fn require(&self, id: WorldId) -> Result<Arc<World>, WorldError> {
        self.get(id).ok_or(WorldError::UnknownWorld(id))
    }

    /// Snapshot of the active worlds, in id order.
    pub fn worlds(&self) -> Vec<Arc<World>> {
        self.worlds.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.worlds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.worlds.read().is_empty()
    }

    /// Collect every world's pending chunk signals.
    pub fn drain_chunk_signals(&self) -> Vec<ChunkSignal> {
        self.worlds()
            .iter()
            .flat_map(|world| world.drain_chunk_signals())
            .collect()
    }
}

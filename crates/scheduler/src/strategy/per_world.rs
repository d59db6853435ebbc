use rayon::ThreadPool;
use rayon::prelude::*;
use tickspace_common::{ChunkCoord, WorldId};
use tickspace_kernel::{TickSummary, WorldDirectory};

use super::{Partition, PartitionStrategy, StrategyReport};

/// Each world is its own partition, so no two workers ever touch the same world.
pub struct PerWorldStrategy {
    pool: ThreadPool,
}

impl PerWorldStrategy {
    pub fn new(pool: ThreadPool) -> Self {
        Self { pool }
    }
}

impl std::fmt::Debug for PerWorldStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerWorldStrategy")
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl PartitionStrategy for PerWorldStrategy {
    fn name(&self) -> &'static str {
        "per_world"
    }

    fn partitions(&self, worlds: &WorldDirectory) -> Vec<Partition> {
        worlds
            .worlds()
            .iter()
            .map(|world| Partition::whole_world(world.id()))
            .collect()
    }

    fn update(&mut self, worlds: &WorldDirectory, timestamp: i64) -> StrategyReport {
        let worlds = worlds.worlds();
        let _span = tracing::debug_span!("per_world_update", worlds = worlds.len()).entered();

        let summaries: Vec<TickSummary> = self
            .pool
            .install(|| worlds.par_iter().map(|world| world.tick(timestamp)).collect());

        let mut summary = TickSummary::default();
        for s in summaries {
            summary.merge(s);
        }
        StrategyReport {
            partitions: worlds.len(),
            summary,
        }
    }

    fn on_chunk_load(&mut self, world: WorldId, chunk: ChunkCoord) {
        tracing::trace!(%world, %chunk, "chunk load ignored by per-world partitioning");
    }

    fn on_chunk_unload(&mut self, world: WorldId, chunk: ChunkCoord) {
        tracing::trace!(%world, %chunk, "chunk unload ignored by per-world partitioning");
    }
}

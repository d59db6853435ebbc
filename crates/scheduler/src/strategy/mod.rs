//! Partition strategies: how one tick's world work is split across workers.

mod chunk_group;
mod per_world;

use std::collections::{BTreeMap, BTreeSet};

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tickspace_common::{ChunkCoord, WorldId};
use tickspace_kernel::{TickSummary, WorldDirectory};

use crate::config::StrategyKind;

pub use chunk_group::ChunkGroupStrategy;
pub use per_world::PerWorldStrategy;

/// What a partition covers inside one world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The whole world.
    World,
    /// Only these loaded chunks.
    Chunks(BTreeSet<ChunkCoord>),
}

/// The unit of work handed to one worker for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub members: BTreeMap<WorldId, Scope>,
}

impl Partition {
    pub fn whole_world(world: WorldId) -> Self {
        Self {
            members: BTreeMap::from([(world, Scope::World)]),
        }
    }

    /// Number of loaded chunks covered. Whole-world members count as zero.
    pub fn chunk_count(&self) -> usize {
        self.members
            .values()
            .map(|scope| match scope {
                Scope::World => 0,
                Scope::Chunks(chunks) => chunks.len(),
            })
            .sum()
    }
}

/// Result of one [`PartitionStrategy::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrategyReport {
    pub partitions: usize,
    pub summary: TickSummary,
}

/// Policy object deciding how worlds are split across the worker pool.
///
/// `update` is the per-tick barrier: it returns only once every partition's
/// work for the tick is done.
pub trait PartitionStrategy: Send {
    fn name(&self) -> &'static str;

    /// Called once when the strategy is installed in a scheduler.
    fn attach(&mut self, _worlds: &WorldDirectory) {}

    /// The partitions the next `update` will run.
    fn partitions(&self, worlds: &WorldDirectory) -> Vec<Partition>;

    /// Run one tick of every world.
    fn update(&mut self, worlds: &WorldDirectory, timestamp: i64) -> StrategyReport;

    fn on_chunk_load(&mut self, world: WorldId, chunk: ChunkCoord);

    fn on_chunk_unload(&mut self, world: WorldId, chunk: ChunkCoord);
}

impl StrategyKind {
    /// Build the strategy with its own pool of `workers` threads.
    pub fn build(self, workers: usize) -> Result<Box<dyn PartitionStrategy>, ThreadPoolBuildError> {
        let pool = worker_pool(workers)?;
        Ok(match self {
            StrategyKind::PerWorld => Box::new(PerWorldStrategy::new(pool)),
            StrategyKind::ChunkGroup => Box::new(ChunkGroupStrategy::new(pool)),
        })
    }
}

pub(crate) fn worker_pool(workers: usize) -> Result<ThreadPool, ThreadPoolBuildError> {
    ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("tick-worker-{i}"))
        .build()
}

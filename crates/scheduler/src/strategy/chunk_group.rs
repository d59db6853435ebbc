use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use rayon::ThreadPool;
use rayon::prelude::*;
use tickspace_common::{ChunkCoord, WorldId};
use tickspace_kernel::{TickSummary, World, WorldDirectory};

use super::{Partition, PartitionStrategy, Scope, StrategyReport};

type ChunkKey = (WorldId, ChunkCoord);
type GroupId = u64;

/// Partitions are clusters of loaded chunks that touch (diagonals included).
///
/// Adjacency ignores world boundaries: chunk `(3, 4)` of one world groups with
/// chunks `(2..=4, 3..=5)` of every world. Loads merge the groups a chunk
/// touches; unloads split its group back into connected components.
pub struct ChunkGroupStrategy {
    pool: ThreadPool,
    groups: BTreeMap<GroupId, BTreeSet<ChunkKey>>,
    owner: HashMap<ChunkKey, GroupId>,
    /// Which worlds have each coordinate loaded, for neighbour lookup.
    by_coord: HashMap<ChunkCoord, BTreeSet<WorldId>>,
    next_group: GroupId,
}

impl ChunkGroupStrategy {
    pub fn new(pool: ThreadPool) -> Self {
        Self {
            pool,
            groups: BTreeMap::new(),
            owner: HashMap::new(),
            by_coord: HashMap::new(),
            next_group: 0,
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.owner.len()
    }

    /// Group currently holding a chunk.
    pub fn group_of(&self, world: WorldId, chunk: ChunkCoord) -> Option<GroupId> {
        self.owner.get(&(world, chunk)).copied()
    }

    fn neighbours(&self, key: ChunkKey) -> Vec<ChunkKey> {
        let mut found = Vec::new();
        for coord in key.1.range(1) {
            if let Some(worlds) = self.by_coord.get(&coord) {
                found.extend(
                    worlds
                        .iter()
                        .map(|world| (*world, coord))
                        .filter(|other| *other != key),
                );
            }
        }
        found
    }

    fn allocate(&mut self) -> GroupId {
        let id = self.next_group;
        self.next_group += 1;
        id
    }

    fn assign(&mut self, group: GroupId, members: BTreeSet<ChunkKey>) {
        for key in &members {
            self.owner.insert(*key, group);
        }
        self.groups.insert(group, members);
    }

    /// Split `group` into its connected components.
    fn split(&mut self, group: GroupId) {
        let Some(mut remaining) = self.groups.remove(&group) else {
            return;
        };
        let mut first = true;
        while let Some(seed) = remaining.pop_first() {
            let mut component = BTreeSet::from([seed]);
            let mut queue = VecDeque::from([seed]);
            while let Some(key) = queue.pop_front() {
                for next in self.neighbours(key) {
                    if remaining.remove(&next) {
                        component.insert(next);
                        queue.push_back(next);
                    }
                }
            }
            let id = if first { group } else { self.allocate() };
            first = false;
            self.assign(id, component);
        }
    }
}

impl std::fmt::Debug for ChunkGroupStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkGroupStrategy")
            .field("workers", &self.pool.current_num_threads())
            .field("groups", &self.groups.len())
            .field("chunks", &self.owner.len())
            .finish()
    }
}

impl PartitionStrategy for ChunkGroupStrategy {
    fn name(&self) -> &'static str {
        "chunk_group"
    }

    fn attach(&mut self, worlds: &WorldDirectory) {
        for world in worlds.worlds() {
            for chunk in world.loaded_chunks() {
                self.on_chunk_load(world.id(), chunk);
            }
        }
        tracing::debug!(
            groups = self.groups.len(),
            chunks = self.owner.len(),
            "chunk groups seeded"
        );
    }

    fn partitions(&self, _worlds: &WorldDirectory) -> Vec<Partition> {
        self.groups
            .values()
            .map(|members| {
                let mut by_world: BTreeMap<WorldId, BTreeSet<ChunkCoord>> = BTreeMap::new();
                for (world, chunk) in members {
                    by_world.entry(*world).or_default().insert(*chunk);
                }
                Partition {
                    members: by_world
                        .into_iter()
                        .map(|(world, chunks)| (world, Scope::Chunks(chunks)))
                        .collect(),
                }
            })
            .collect()
    }

    fn update(&mut self, worlds: &WorldDirectory, timestamp: i64) -> StrategyReport {
        let _span = tracing::debug_span!("chunk_group_update", groups = self.groups.len()).entered();

        // Resolve worlds up front; groups can outlive a removed world.
        let work: Vec<Vec<(Arc<World>, HashSet<ChunkCoord>)>> = self
            .partitions(worlds)
            .into_iter()
            .map(|partition| {
                partition
                    .members
                    .into_iter()
                    .filter_map(|(id, scope)| {
                        let world = worlds.get(id)?;
                        let chunks = match scope {
                            Scope::Chunks(chunks) => chunks.into_iter().collect(),
                            Scope::World => world.loaded_chunks().into_iter().collect(),
                        };
                        Some((world, chunks))
                    })
                    .collect()
            })
            .collect();

        let summaries: Vec<TickSummary> = self.pool.install(|| {
            work.par_iter()
                .map(|members| {
                    let mut summary = TickSummary::default();
                    for (world, chunks) in members {
                        summary.merge(world.tick_chunks(chunks));
                    }
                    summary
                })
                .collect()
        });

        // Every group has finished; now each world completes its tick once.
        for world in worlds.worlds() {
            world.advance(timestamp);
        }

        let mut summary = TickSummary::default();
        for s in summaries {
            summary.merge(s);
        }
        StrategyReport {
            partitions: work.len(),
            summary,
        }
    }

    fn on_chunk_load(&mut self, world: WorldId, chunk: ChunkCoord) {
        let key = (world, chunk);
        if self.owner.contains_key(&key) {
            return;
        }

        let touching: BTreeSet<GroupId> = self
            .neighbours(key)
            .iter()
            .filter_map(|other| self.owner.get(other).copied())
            .collect();

        let mut touching = touching.into_iter();
        let target = match touching.next() {
            Some(first) => first,
            None => self.allocate(),
        };
        let mut members = self.groups.remove(&target).unwrap_or_default();
        for other in touching {
            if let Some(absorbed) = self.groups.remove(&other) {
                members.extend(absorbed);
            }
        }
        members.insert(key);
        self.by_coord.entry(chunk).or_default().insert(world);
        self.assign(target, members);
        tracing::trace!(%world, %chunk, group = target, "chunk joined group");
    }

    fn on_chunk_unload(&mut self, world: WorldId, chunk: ChunkCoord) {
        let key = (world, chunk);
        let Some(group) = self.owner.remove(&key) else {
            return;
        };
        if let Some(worlds) = self.by_coord.get_mut(&chunk) {
            worlds.remove(&world);
            if worlds.is_empty() {
                self.by_coord.remove(&chunk);
            }
        }
        if let Some(members) = self.groups.get_mut(&group) {
            members.remove(&key);
        }
        self.split(group);
        tracing::trace!(%world, %chunk, group, "chunk left group");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::worker_pool;
    use tickspace_common::Point;
    use tickspace_tracking::EntityKind;

    fn strategy() -> ChunkGroupStrategy {
        ChunkGroupStrategy::new(worker_pool(2).unwrap())
    }

    fn c(x: i32, z: i32) -> ChunkCoord {
        ChunkCoord::new(x, z)
    }

    fn assert_each_chunk_in_one_partition(s: &ChunkGroupStrategy) {
        let partitions = s.partitions(&WorldDirectory::new());
        let mut seen = HashSet::new();
        for partition in &partitions {
            for (world, scope) in &partition.members {
                let Scope::Chunks(chunks) = scope else {
                    panic!("chunk groups never cover whole worlds");
                };
                for chunk in chunks {
                    assert!(seen.insert((*world, *chunk)), "{chunk} in two partitions");
                }
            }
        }
        assert_eq!(seen.len(), s.chunk_count());
    }

    #[test]
    fn adjacent_chunks_share_a_group() {
        let w = WorldId::new();
        let mut s = strategy();
        s.on_chunk_load(w, c(0, 0));
        s.on_chunk_load(w, c(1, 1));
        s.on_chunk_load(w, c(5, 5));
        assert_eq!(s.group_count(), 2);
        assert_eq!(s.group_of(w, c(0, 0)), s.group_of(w, c(1, 1)));
        assert_ne!(s.group_of(w, c(0, 0)), s.group_of(w, c(5, 5)));
        assert_each_chunk_in_one_partition(&s);
    }

    #[test]
    fn bridge_chunk_merges_groups() {
        let w = WorldId::new();
        let mut s = strategy();
        s.on_chunk_load(w, c(0, 0));
        s.on_chunk_load(w, c(2, 0));
        assert_eq!(s.group_count(), 2);
        s.on_chunk_load(w, c(1, 0));
        assert_eq!(s.group_count(), 1);
        assert_each_chunk_in_one_partition(&s);
    }

    #[test]
    fn unloading_the_bridge_splits_the_group() {
        let w = WorldId::new();
        let mut s = strategy();
        for x in 0..3 {
            s.on_chunk_load(w, c(x, 0));
        }
        let before = s.group_of(w, c(0, 0));
        s.on_chunk_unload(w, c(1, 0));
        assert_eq!(s.group_count(), 2);
        assert_eq!(s.group_of(w, c(1, 0)), None);
        assert_eq!(s.group_of(w, c(0, 0)), before);
        assert_ne!(s.group_of(w, c(0, 0)), s.group_of(w, c(2, 0)));
        assert_each_chunk_in_one_partition(&s);
    }

    #[test]
    fn groups_span_worlds() {
        let a = WorldId::new();
        let b = WorldId::new();
        let mut s = strategy();
        s.on_chunk_load(a, c(0, 0));
        s.on_chunk_load(b, c(1, 0));
        s.on_chunk_load(b, c(9, 9));
        assert_eq!(s.group_count(), 2);
        assert_eq!(s.group_of(a, c(0, 0)), s.group_of(b, c(1, 0)));
        assert_each_chunk_in_one_partition(&s);
    }

    #[test]
    fn repeated_signals_are_idempotent() {
        let w = WorldId::new();
        let mut s = strategy();
        s.on_chunk_load(w, c(0, 0));
        s.on_chunk_load(w, c(0, 0));
        assert_eq!(s.chunk_count(), 1);
        s.on_chunk_unload(w, c(0, 0));
        s.on_chunk_unload(w, c(0, 0));
        assert_eq!(s.chunk_count(), 0);
        assert_eq!(s.group_count(), 0);
    }

    #[test]
    fn update_ticks_loaded_chunks_and_advances_every_world() {
        let dir = WorldDirectory::new();
        let world = dir.create(2).unwrap();
        let idle = dir.create(2).unwrap();
        world.load_chunk(c(0, 0));
        world.load_chunk(c(4, 0));

        let near = world
            .spawn(EntityKind::Entity, Point::new(1.0, 64.0, 1.0))
            .unwrap();
        let far = world
            .spawn(EntityKind::Entity, Point::new(65.0, 64.0, 1.0))
            .unwrap();
        let unloaded = world
            .spawn(EntityKind::Entity, Point::new(300.0, 64.0, 300.0))
            .unwrap();
        for id in [near, far, unloaded] {
            let at = world.position(id).unwrap();
            world.queue_move(id, at + Point::new(1.0, 0.0, 0.0)).unwrap();
        }

        let mut s = strategy();
        s.attach(&dir);
        let report = s.update(&dir, 50);

        assert_eq!(report.partitions, 2);
        assert_eq!(report.summary.moves_applied, 2);
        assert_eq!(world.pending_moves(), 1);
        assert_eq!(world.tick_count(), 1);
        assert_eq!(idle.tick_count(), 1);
    }
}

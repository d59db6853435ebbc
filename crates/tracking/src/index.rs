use std::collections::{BTreeSet, HashMap};

use tickspace_common::{ChunkCoord, EntityId, Point};

use crate::target::{EntityKind, Target, TrackedEntity, Update};
use crate::tracking::{EntityTracking, TrackingError};

/// Per-target chunk buckets.
type Buckets = HashMap<ChunkCoord, BTreeSet<EntityId>>;

#[derive(Debug, Clone, Copy)]
struct Entry {
    entity: TrackedEntity,
    chunk: ChunkCoord,
}

/// Chunk-bucketed entity index for a single world.
///
/// Entities are assigned to a chunk from their XZ position; every target the
/// entity matches gets its own bucket entry. Buckets are `BTreeSet`s so
/// queries visit entities in a stable order, and empty buckets are dropped so
/// the bucket count only reflects occupied chunks.
#[derive(Debug, Clone)]
pub struct ChunkIndex {
    view_distance: i32,
    entries: HashMap<EntityId, Entry>,
    buckets: [Buckets; Target::COUNT],
    views: [BTreeSet<EntityId>; Target::COUNT],
}

impl ChunkIndex {
    /// Create an empty index whose viewers see `view_distance` chunks around them.
    ///
    /// Fails with [`TrackingError::InvalidViewDistance`] below 1.
    pub fn new(view_distance: i32) -> Result<Self, TrackingError> {
        if view_distance < 1 {
            return Err(TrackingError::InvalidViewDistance(view_distance));
        }
        Ok(Self::with_distance(view_distance))
    }

    fn with_distance(view_distance: i32) -> Self {
        Self {
            view_distance,
            entries: HashMap::new(),
            buckets: Default::default(),
            views: Default::default(),
        }
    }

    /// Number of tracked entities (every target).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of occupied chunks for `target`.
    pub fn chunk_count(&self, target: Target) -> usize {
        self.buckets[target.ordinal()].len()
    }

    /// Total bucket entries for `target`. Equals the target's entity count
    /// whenever the index is consistent.
    pub fn total_placements(&self, target: Target) -> usize {
        self.buckets[target.ordinal()].values().map(|s| s.len()).sum()
    }

    /// Ids tracked for `target`, in id order.
    pub fn ids(&self, target: Target) -> &BTreeSet<EntityId> {
        &self.views[target.ordinal()]
    }

    /// Drop every tracked entity.
    pub fn clear(&mut self) {
        self.entries.clear();
        for target in Target::ALL {
            self.buckets[target.ordinal()].clear();
            self.views[target.ordinal()].clear();
        }
    }

    fn insert(&mut self, entity: TrackedEntity, chunk: ChunkCoord) {
        for target in Target::ALL.into_iter().filter(|t| t.matches(entity.kind)) {
            self.buckets[target.ordinal()]
                .entry(chunk)
                .or_default()
                .insert(entity.id);
            self.views[target.ordinal()].insert(entity.id);
        }
        self.entries.insert(entity.id, Entry { entity, chunk });
    }

    fn detach(&mut self, entity: &TrackedEntity, chunk: ChunkCoord) {
        for target in Target::ALL.into_iter().filter(|t| t.matches(entity.kind)) {
            let buckets = &mut self.buckets[target.ordinal()];
            if let Some(bucket) = buckets.get_mut(&chunk) {
                bucket.remove(&entity.id);
                if bucket.is_empty() {
                    buckets.remove(&chunk);
                }
            }
        }
    }
}

impl Default for ChunkIndex {
    fn default() -> Self {
        Self::with_distance(crate::DEFAULT_VIEW_DISTANCE)
    }
}

/// Forwards viewer notifications, skipping the entity being relocated.
struct OtherViewers<'a> {
    subject: EntityId,
    inner: &'a mut dyn Update,
}

impl Update for OtherViewers<'_> {
    fn add(&mut self, entity: &TrackedEntity) {
        if entity.id != self.subject {
            self.inner.add(entity);
        }
    }

    fn remove(&mut self, entity: &TrackedEntity) {
        if entity.id != self.subject {
            self.inner.remove(entity);
        }
    }
}

impl EntityTracking for ChunkIndex {
    fn view_distance(&self) -> i32 {
        self.view_distance
    }

    fn register(
        &mut self,
        id: EntityId,
        kind: EntityKind,
        point: Point,
        update: &mut dyn Update,
    ) -> Result<bool, TrackingError> {
        let chunk = ChunkCoord::from_point(point);
        if let Some(existing) = self.entries.get(&id) {
            if existing.chunk == chunk {
                return Ok(false);
            }
            return Err(TrackingError::AlreadyTracked {
                id,
                chunk: existing.chunk,
            });
        }

        // Viewers are collected before insertion so the entity never sees itself.
        self.visible_entities(point, Target::Players, &mut |viewer: &TrackedEntity| {
            update.add(viewer)
        });
        self.insert(TrackedEntity::new(id, kind, point), chunk);
        tracing::trace!(entity = %id.short(), %chunk, "registered");
        Ok(true)
    }

    fn unregister(
        &mut self,
        id: EntityId,
        point: Point,
        update: &mut dyn Update,
    ) -> Result<bool, TrackingError> {
        let Some(entry) = self.entries.get(&id).copied() else {
            return Ok(false);
        };
        let claimed = ChunkCoord::from_point(point);
        if entry.chunk != claimed {
            return Err(TrackingError::ChunkMismatch {
                id,
                expected: entry.chunk,
                actual: claimed,
            });
        }

        self.detach(&entry.entity, entry.chunk);
        for target in Target::ALL {
            self.views[target.ordinal()].remove(&id);
        }
        self.entries.remove(&id);
        self.visible_entities(point, Target::Players, &mut |viewer: &TrackedEntity| {
            update.remove(viewer)
        });
        tracing::trace!(entity = %id.short(), chunk = %entry.chunk, "unregistered");
        Ok(true)
    }

    fn move_entity(
        &mut self,
        id: EntityId,
        old: Point,
        new: Point,
        update: &mut dyn Update,
    ) -> Result<(), TrackingError> {
        let Some(entry) = self.entries.get(&id).copied() else {
            return Err(TrackingError::NotTracked(id));
        };
        let old_chunk = ChunkCoord::from_point(old);
        if entry.chunk != old_chunk {
            return Err(TrackingError::ChunkMismatch {
                id,
                expected: entry.chunk,
                actual: old_chunk,
            });
        }

        let new_chunk = ChunkCoord::from_point(new);
        let moved = TrackedEntity { position: new, ..entry.entity };
        if new_chunk == old_chunk {
            self.entries.insert(id, Entry { entity: moved, chunk: old_chunk });
            return Ok(());
        }

        self.detach(&entry.entity, old_chunk);
        self.insert(moved, new_chunk);
        tracing::trace!(entity = %id.short(), from = %old_chunk, to = %new_chunk, "crossed chunk");

        let mut viewers = OtherViewers {
            subject: id,
            inner: update,
        };
        self.difference(old, new, Target::Players, &mut viewers);
        Ok(())
    }

    fn chunk_entities(
        &self,
        chunk: ChunkCoord,
        target: Target,
        query: &mut dyn FnMut(&TrackedEntity),
    ) {
        let Some(bucket) = self.buckets[target.ordinal()].get(&chunk) else {
            return;
        };
        for id in bucket {
            if let Some(entry) = self.entries.get(id) {
                query(&entry.entity);
            }
        }
    }

    fn get(&self, id: EntityId) -> Option<TrackedEntity> {
        self.entries.get(&id).map(|e| e.entity)
    }

    fn tracked(&self, target: Target) -> Vec<TrackedEntity> {
        self.views[target.ordinal()]
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| e.entity))
            .collect()
    }

    fn tracked_count(&self, target: Target) -> usize {
        self.views[target.ordinal()].len()
    }
}

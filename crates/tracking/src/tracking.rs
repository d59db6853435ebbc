use tickspace_common::{CHUNK_SIZE, ChunkCoord, ChunkRange, EntityId, MAX_CHUNK_RADIUS, Point};

use crate::target::{EntityKind, Target, TrackedEntity, Update};

/// Precondition violations reported by a tracker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackingError {
    #[error("entity {0} is not tracked")]
    NotTracked(EntityId),
    #[error("entity {id} is already tracked in chunk {chunk}")]
    AlreadyTracked { id: EntityId, chunk: ChunkCoord },
    #[error("entity {id} is tracked in chunk {expected}, caller claims {actual}")]
    ChunkMismatch {
        id: EntityId,
        expected: ChunkCoord,
        actual: ChunkCoord,
    },
    #[error("view distance must be at least 1 chunk, got {0}")]
    InvalidViewDistance(i32),
}

/// Square scans larger than this many chunks visit the tracked entities
/// directly when there are fewer of them than chunks.
const SCAN_AREA_LIMIT: usize = 4096;

/// Chunk radius that covers every point strictly closer than `range`.
///
/// One more than the whole chunks spanned, so an entity just across a chunk
/// corner is never missed; the exact distance filter removes the excess.
/// Saturates at [`MAX_CHUNK_RADIUS`], NaN included.
pub fn nearby_chunk_radius(range: f64) -> i32 {
    let chunks = (range / CHUNK_SIZE).abs();
    if chunks < MAX_CHUNK_RADIUS as f64 {
        chunks as i32 + 1
    } else {
        MAX_CHUNK_RADIUS
    }
}

/// Whether visiting every tracked entity beats scanning `chunks`.
///
/// Always true once the range reaches the radius cap, so a clamped scan never
/// drops an entity.
fn scan_tracked<T: EntityTracking + ?Sized>(
    tracker: &T,
    chunks: &ChunkRange,
    target: Target,
) -> bool {
    let area = chunks.area();
    chunks.radius() == MAX_CHUNK_RADIUS
        || (area > SCAN_AREA_LIMIT && area > tracker.tracked_count(target))
}

/// How entities are tracked within one world.
///
/// Mutations take `&mut self`, so a plain implementation is only ever touched
/// by one thread at a time. Share one across threads through
/// [`crate::Synchronized`].
pub trait EntityTracking: Send {
    /// Radius, in chunks, of the square a viewer can see.
    fn view_distance(&self) -> i32;

    /// Start tracking `id` at `point`. `update` receives the players that can
    /// now see it.
    ///
    /// Returns `Ok(false)` when the entity is already tracked at that point's
    /// chunk. Registering an entity that is tracked elsewhere is an error:
    /// relocation goes through [`EntityTracking::move_entity`].
    fn register(
        &mut self,
        id: EntityId,
        kind: EntityKind,
        point: Point,
        update: &mut dyn Update,
    ) -> Result<bool, TrackingError>;

    /// Stop tracking `id`. `update` receives the players that lose sight of it.
    ///
    /// Returns `Ok(false)` if the entity was not tracked.
    fn unregister(
        &mut self,
        id: EntityId,
        point: Point,
        update: &mut dyn Update,
    ) -> Result<bool, TrackingError>;

    /// Relocate `id` from `old` to `new`.
    ///
    /// Crossing a chunk border moves the entity between buckets and tells
    /// `update` which players gained or lost sight of it. Within one chunk
    /// only the stored position changes and `update` is never called.
    fn move_entity(
        &mut self,
        id: EntityId,
        old: Point,
        new: Point,
        update: &mut dyn Update,
    ) -> Result<(), TrackingError>;

    /// Visit every entity of `target` in exactly `chunk`.
    fn chunk_entities(
        &self,
        chunk: ChunkCoord,
        target: Target,
        query: &mut dyn FnMut(&TrackedEntity),
    );

    /// Look up a tracked entity.
    fn get(&self, id: EntityId) -> Option<TrackedEntity>;

    /// Snapshot of every tracked entity of `target`.
    fn tracked(&self, target: Target) -> Vec<TrackedEntity>;

    /// Number of tracked entities of `target`.
    fn tracked_count(&self, target: Target) -> usize {
        self.tracked(target).len()
    }

    fn chunk_entities_at(
        &self,
        point: Point,
        target: Target,
        query: &mut dyn FnMut(&TrackedEntity),
    ) {
        self.chunk_entities(ChunkCoord::from_point(point), target, query);
    }

    /// Entities in the view-distance square around `point`'s chunk.
    fn visible_entities(
        &self,
        point: Point,
        target: Target,
        query: &mut dyn FnMut(&TrackedEntity),
    ) {
        for chunk in ChunkCoord::from_point(point).range(self.view_distance()) {
            self.chunk_entities(chunk, target, query);
        }
    }

    /// Entities strictly closer than `range` to `point`.
    fn nearby_entities(
        &self,
        point: Point,
        range: f64,
        target: Target,
        query: &mut dyn FnMut(&TrackedEntity),
    ) {
        let squared = range * range;
        let mut filter = |entity: &TrackedEntity| {
            if point.distance_squared(entity.position) < squared {
                query(entity);
            }
        };
        let chunks = ChunkCoord::from_point(point).range(nearby_chunk_radius(range));
        if scan_tracked(self, &chunks, target) {
            self.tracked(target).iter().for_each(&mut filter);
            return;
        }
        for chunk in chunks {
            self.chunk_entities(chunk, target, &mut filter);
        }
    }

    /// View-distance diff: entities in chunks seen from `to` but not `from`
    /// are added, the converse are removed.
    fn difference(&self, from: Point, to: Point, target: Target, update: &mut dyn Update) {
        let distance = self.view_distance();
        let from_chunk = ChunkCoord::from_point(from);
        let to_chunk = ChunkCoord::from_point(to);
        if from_chunk == to_chunk {
            return;
        }
        for chunk in from_chunk.range(distance) {
            if to_chunk.chebyshev(chunk) > distance {
                self.chunk_entities(chunk, target, &mut |entity: &TrackedEntity| {
                    update.remove(entity)
                });
            }
        }
        for chunk in to_chunk.range(distance) {
            if from_chunk.chebyshev(chunk) > distance {
                self.chunk_entities(chunk, target, &mut |entity: &TrackedEntity| {
                    update.add(entity)
                });
            }
        }
    }

    /// Radius diff: entities strictly within `range` of `to` but not of
    /// `from` are added, the converse are removed.
    fn difference_within(
        &self,
        from: Point,
        to: Point,
        range: f64,
        target: Target,
        update: &mut dyn Update,
    ) {
        let squared = range * range;
        let radius = nearby_chunk_radius(range);
        let from_range = ChunkCoord::from_point(from).range(radius);
        let to_range = ChunkCoord::from_point(to).range(radius);
        let mut visit = |entity: &TrackedEntity| {
            let was = from.distance_squared(entity.position) < squared;
            let is = to.distance_squared(entity.position) < squared;
            match (was, is) {
                (true, false) => update.remove(entity),
                (false, true) => update.add(entity),
                _ => {}
            }
        };
        if scan_tracked(self, &from_range, target) {
            self.tracked(target).iter().for_each(&mut visit);
            return;
        }
        for chunk in from_range.clone() {
            self.chunk_entities(chunk, target, &mut visit);
        }
        for chunk in to_range {
            if !from_range.contains(chunk) {
                self.chunk_entities(chunk, target, &mut visit);
            }
        }
    }

    fn entities(&self) -> Vec<TrackedEntity> {
        self.tracked(Target::Entities)
    }

    fn players(&self) -> Vec<TrackedEntity> {
        self.tracked(Target::Players)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_radius_has_one_chunk_of_slack() {
        assert_eq!(nearby_chunk_radius(0.0), 1);
        assert_eq!(nearby_chunk_radius(15.9), 1);
        assert_eq!(nearby_chunk_radius(16.0), 2);
        assert_eq!(nearby_chunk_radius(40.0), 3);
        assert_eq!(nearby_chunk_radius(-40.0), 3);
    }

    #[test]
    fn chunk_radius_saturates_for_huge_ranges() {
        assert_eq!(nearby_chunk_radius(1e11), MAX_CHUNK_RADIUS);
        assert_eq!(nearby_chunk_radius(f64::MAX), MAX_CHUNK_RADIUS);
        assert_eq!(nearby_chunk_radius(f64::INFINITY), MAX_CHUNK_RADIUS);
        assert_eq!(nearby_chunk_radius(f64::NAN), MAX_CHUNK_RADIUS);
        let below = (MAX_CHUNK_RADIUS - 1) as f64 * CHUNK_SIZE;
        assert_eq!(nearby_chunk_radius(below), MAX_CHUNK_RADIUS);
    }

    #[test]
    fn errors_render_readably() {
        let id = EntityId::new();
        let err = TrackingError::ChunkMismatch {
            id,
            expected: ChunkCoord::new(0, 0),
            actual: ChunkCoord::new(1, 0),
        };
        assert!(err.to_string().contains("(0, 0)"));
        assert!(err.to_string().contains("(1, 0)"));
    }
}

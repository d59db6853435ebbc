use parking_lot::Mutex;
use tickspace_common::{ChunkCoord, EntityId, Point};

use crate::target::{EntityKind, Target, TrackedEntity, Update};
use crate::tracking::{EntityTracking, TrackingError};

/// Serializes every tracker call behind one exclusive lock.
///
/// Slower than a bare tracker under contention, but any interleaving of
/// callers observes whole operations only: an entity mid-move is never seen
/// in both chunks or in neither. Used whenever a partition strategy can hand
/// chunks of the same world to different workers.
///
/// `Update` and query callbacks run with the lock held and must not call back
/// into the same tracker.
#[derive(Debug, Default)]
pub struct Synchronized<T> {
    inner: Mutex<T>,
}

impl<T: EntityTracking> Synchronized<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Run several operations inside a single lock scope.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn view_distance(&self) -> i32 {
        self.inner.lock().view_distance()
    }

    pub fn register(
        &self,
        id: EntityId,
        kind: EntityKind,
        point: Point,
        update: &mut dyn Update,
    ) -> Result<bool, TrackingError> {
        self.inner.lock().register(id, kind, point, update)
    }

    pub fn unregister(
        &self,
        id: EntityId,
        point: Point,
        update: &mut dyn Update,
    ) -> Result<bool, TrackingError> {
        self.inner.lock().unregister(id, point, update)
    }

    pub fn move_entity(
        &self,
        id: EntityId,
        old: Point,
        new: Point,
        update: &mut dyn Update,
    ) -> Result<(), TrackingError> {
        self.inner.lock().move_entity(id, old, new, update)
    }

    pub fn chunk_entities(
        &self,
        chunk: ChunkCoord,
        target: Target,
        query: &mut dyn FnMut(&TrackedEntity),
    ) {
        self.inner.lock().chunk_entities(chunk, target, query)
    }

    pub fn visible_entities(
        &self,
        point: Point,
        target: Target,
        query: &mut dyn FnMut(&TrackedEntity),
    ) {
        self.inner.lock().visible_entities(point, target, query)
    }

    pub fn nearby_entities(
        &self,
        point: Point,
        range: f64,
        target: Target,
        query: &mut dyn FnMut(&TrackedEntity),
    ) {
        self.inner.lock().nearby_entities(point, range, target, query)
    }

    pub fn difference(&self, from: Point, to: Point, target: Target, update: &mut dyn Update) {
        self.inner.lock().difference(from, to, target, update)
    }

    pub fn difference_within(
        &self,
        from: Point,
        to: Point,
        range: f64,
        target: Target,
        update: &mut dyn Update,
    ) {
        self.inner
            .lock()
            .difference_within(from, to, range, target, update)
    }

    pub fn get(&self, id: EntityId) -> Option<TrackedEntity> {
        self.inner.lock().get(id)
    }

    /// Owned snapshot, consistent with the last completed mutation.
    pub fn entities(&self) -> Vec<TrackedEntity> {
        self.inner.lock().entities()
    }

    /// Owned snapshot, consistent with the last completed mutation.
    pub fn players(&self) -> Vec<TrackedEntity> {
        self.inner.lock().players()
    }
}

impl<T: EntityTracking> From<T> for Synchronized<T> {
    fn from(inner: T) -> Self {
        Self::new(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChunkIndex;
    use std::sync::Arc;

    #[test]
    fn concurrent_moves_never_lose_or_duplicate() {
        let tracker = Arc::new(Synchronized::new(ChunkIndex::new(2).unwrap()));
        let ids: Vec<EntityId> = (0..8).map(|_| EntityId::new()).collect();
        for id in &ids {
            tracker
                .register(*id, EntityKind::Entity, Point::ZERO, &mut ())
                .unwrap();
        }

        std::thread::scope(|scope| {
            for id in ids.iter().copied() {
                let tracker = Arc::clone(&tracker);
                scope.spawn(move || {
                    let mut at = Point::ZERO;
                    for step in 1..=50 {
                        let next = Point::new(step as f64 * 7.0, 0.0, 0.0);
                        tracker.move_entity(id, at, next, &mut ()).unwrap();
                        at = next;
                    }
                });
            }
            // A reader counting the whole line while writers run.
            let reader = Arc::clone(&tracker);
            scope.spawn(move || {
                for _ in 0..50 {
                    let seen = reader.with(|index| {
                        let mut seen = 0;
                        for x in -1..30 {
                            index.chunk_entities(
                                ChunkCoord::new(x, 0),
                                Target::Entities,
                                &mut |_: &TrackedEntity| seen += 1,
                            );
                        }
                        seen
                    });
                    assert_eq!(seen, 8);
                }
            });
        });

        let index = Arc::try_unwrap(tracker).unwrap().into_inner();
        assert_eq!(index.total_placements(Target::Entities), 8);
        assert_eq!(index.entities().len(), 8);
    }

    #[test]
    fn with_runs_a_batch_under_one_lock() {
        let tracker = Synchronized::new(ChunkIndex::new(1).unwrap());
        let a = EntityId::new();
        let b = EntityId::new();
        let placed = tracker.with(|index| {
            index.register(a, EntityKind::Player, Point::ZERO, &mut ()).unwrap();
            index.register(b, EntityKind::Entity, Point::ZERO, &mut ()).unwrap();
            index.len()
        });
        assert_eq!(placed, 2);
        assert_eq!(tracker.players().len(), 1);
        assert_eq!(tracker.entities().len(), 2);
    }
}

use std::collections::VecDeque;

use parking_lot::Mutex;
use tickspace_common::{EntityId, Point, WorldId};
use tickspace_tracking::EntityKind;

use crate::directory::WorldDirectory;

/// Entities that finished validation elsewhere and are waiting to join a world.
pub trait WaitingAdmissions: Send + Sync {
    /// Register every waiting entity into its world. Returns how many joined.
    ///
    /// Called synchronously by the tick loop, so admitted entities are visible
    /// to the next tick's tracking queries.
    fn admit_waiting(&self, worlds: &WorldDirectory) -> usize;
}

/// One entity waiting to join.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub id: EntityId,
    pub kind: EntityKind,
    pub world: WorldId,
    pub position: Point,
}

/// FIFO of waiting entities, filled from any thread.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    waiting: Mutex<VecDeque<Admission>>,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, admission: Admission) {
        self.waiting.lock().push_back(admission);
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.lock().is_empty()
    }
}

impl WaitingAdmissions for AdmissionQueue {
    fn admit_waiting(&self, worlds: &WorldDirectory) -> usize {
        let batch = std::mem::take(&mut *self.waiting.lock());
        let mut admitted = 0;
        for admission in batch {
            let joined = worlds.require(admission.world).and_then(|world| {
                world.spawn_with_id(admission.id, admission.kind, admission.position)
            });
            match joined {
                Ok(()) => admitted += 1,
                Err(err) => {
                    tracing::warn!(entity = %admission.id.short(), %err, "admission dropped");
                }
            }
        }
        if admitted > 0 {
            tracing::debug!(admitted, "admitted waiting entities");
        }
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_into_the_right_world() {
        let dir = WorldDirectory::new();
        let world = dir.create(2).unwrap();
        let queue = AdmissionQueue::new();
        let id = EntityId::new();
        queue.queue(Admission {
            id,
            kind: EntityKind::Player,
            world: world.id(),
            position: Point::new(1.0, 64.0, 1.0),
        });
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.admit_waiting(&dir), 1);
        assert!(queue.is_empty());
        assert_eq!(world.tracker().players().len(), 1);
        assert_eq!(world.position(id), Some(Point::new(1.0, 64.0, 1.0)));
    }

    #[test]
    fn unknown_world_is_dropped_not_requeued() {
        let dir = WorldDirectory::new();
        let queue = AdmissionQueue::new();
        queue.queue(Admission {
            id: EntityId::new(),
            kind: EntityKind::Entity,
            world: WorldId::new(),
            position: Point::ZERO,
        });
        assert_eq!(queue.admit_waiting(&dir), 0);
        assert!(queue.is_empty());
    }
}

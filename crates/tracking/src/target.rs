use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tickspace_common::{ChunkCoord, EntityId, Point};

/// What an entity is, as far as tracking cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Anything simulated in the world that is not a connected player.
    Entity,
    /// An entity backed by a live connection; players are also viewers.
    Player,
}

/// A category of tracked entity. Each target has its own set of buckets.
///
/// The set is closed: adding a category means adding a variant here, so the
/// per-target storage can be a fixed array indexed by [`Target::ordinal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    /// Every tracked entity, players included.
    Entities,
    /// Connected players only.
    Players,
}

impl Target {
    pub const COUNT: usize = 2;
    pub const ALL: [Target; Target::COUNT] = [Target::Entities, Target::Players];

    /// Stable index into per-target storage.
    pub const fn ordinal(self) -> usize {
        match self {
            Target::Entities => 0,
            Target::Players => 1,
        }
    }

    pub fn matches(self, kind: EntityKind) -> bool {
        match self {
            Target::Entities => true,
            Target::Players => kind == EntityKind::Player,
        }
    }
}

/// Snapshot of one tracked entity as handed to queries and updates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Point,
}

impl TrackedEntity {
    pub fn new(id: EntityId, kind: EntityKind, position: Point) -> Self {
        Self { id, kind, position }
    }

    pub fn chunk(&self) -> ChunkCoord {
        ChunkCoord::from_point(self.position)
    }

    pub fn is_player(&self) -> bool {
        self.kind == EntityKind::Player
    }
}

/// Receives entities that became visible (`add`) or invisible (`remove`).
///
/// Implementations must not call back into the tracker that is notifying
/// them; [`crate::Synchronized`] holds its lock for the whole call.
pub trait Update {
    fn add(&mut self, entity: &TrackedEntity);
    fn remove(&mut self, entity: &TrackedEntity);
}

/// Discards every notification.
impl Update for () {
    fn add(&mut self, _entity: &TrackedEntity) {}
    fn remove(&mut self, _entity: &TrackedEntity) {}
}

/// Materialized result of a visibility diff.
///
/// Keyed by entity id so iteration order is deterministic and a repeated
/// notification cannot duplicate an entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilitySet {
    added: BTreeMap<EntityId, TrackedEntity>,
    removed: BTreeMap<EntityId, TrackedEntity>,
}

impl VisibilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entities that became visible.
    pub fn added(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.added.values()
    }

    /// Entities that became invisible.
    pub fn removed(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.removed.values()
    }

    pub fn was_added(&self, id: EntityId) -> bool {
        self.added.contains_key(&id)
    }

    pub fn was_removed(&self, id: EntityId) -> bool {
        self.removed.contains_key(&id)
    }

    pub fn added_len(&self) -> usize {
        self.added.len()
    }

    pub fn removed_len(&self) -> usize {
        self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
    }
}

impl Update for VisibilitySet {
    fn add(&mut self, entity: &TrackedEntity) {
        self.removed.remove(&entity.id);
        self.added.insert(entity.id, *entity);
    }

    fn remove(&mut self, entity: &TrackedEntity) {
        self.added.remove(&entity.id);
        self.removed.insert(entity.id, *entity);
    }
}

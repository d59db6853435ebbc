use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tickspace_common::{ChunkCoord, EntityId, Point, WorldId};
use tickspace_tracking::{
    ChunkIndex, EntityKind, Synchronized, Target, TrackedEntity, TrackingError, VisibilitySet,
};

/// Errors from world operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldError {
    #[error("unknown world {0}")]
    UnknownWorld(WorldId),
    #[error("entity {0} already exists in this world")]
    DuplicateEntity(EntityId),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
}

/// An event record produced by every mutation to the world.
///
/// The log lets the persistence layer and tooling follow what happened
/// between two ticks without diffing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    /// Entity started being tracked.
    Registered {
        id: EntityId,
        kind: EntityKind,
        position: Point,
    },
    /// Entity stopped being tracked. Carries its last position.
    Unregistered { id: EntityId, position: Point },
    /// A queued move was applied.
    Moved { id: EntityId, from: Point, to: Point },
    /// The world finished a tick.
    Ticked { tick: u64, timestamp: i64 },
}

/// A change in what a player (the viewer) can see, for the network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewEvent {
    Show { viewer: EntityId, entity: EntityId },
    Hide { viewer: EntityId, entity: EntityId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkSignalKind {
    Load,
    Unload,
}

/// A chunk residency change, forwarded to the partition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkSignal {
    pub world: WorldId,
    pub chunk: ChunkCoord,
    pub kind: ChunkSignalKind,
}

/// What one call to [`World::tick_chunks`] or [`World::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub moves_applied: usize,
    pub moves_rejected: usize,
    pub view_events: usize,
}

impl TickSummary {
    pub fn merge(&mut self, other: TickSummary) {
        self.moves_applied += other.moves_applied;
        self.moves_rejected += other.moves_rejected;
        self.view_events += other.view_events;
    }
}

/// One world (instance) of the server.
///
/// Every field sits behind its own lock so chunk groups of the same world can
/// be ticked from several workers at once; the tracker is [`Synchronized`]
/// for the same reason. Per-world partitioning never contends on any of them.
#[derive(Debug)]
pub struct World {
    id: WorldId,
    tracker: Synchronized<ChunkIndex>,
    pending_moves: Mutex<BTreeMap<EntityId, Point>>,
    loaded_chunks: RwLock<BTreeSet<ChunkCoord>>,
    chunk_signals: Mutex<Vec<ChunkSignal>>,
    tick: AtomicU64,
    event_log: Mutex<Vec<WorldEvent>>,
    view_events: Mutex<Vec<ViewEvent>>,
}

impl World {
    /// Create an empty world whose viewers see `view_distance` chunks.
    ///
    /// Fails when `view_distance` is below 1.
    pub fn new(view_distance: i32) -> Result<Self, WorldError> {
        Self::with_id(WorldId::new(), view_distance)
    }

    pub fn with_id(id: WorldId, view_distance: i32) -> Result<Self, WorldError> {
        Ok(Self {
            id,
            tracker: Synchronized::new(ChunkIndex::new(view_distance)?),
            pending_moves: Mutex::new(BTreeMap::new()),
            loaded_chunks: RwLock::new(BTreeSet::new()),
            chunk_signals: Mutex::new(Vec::new()),
            tick: AtomicU64::new(0),
            event_log: Mutex::new(Vec::new()),
            view_events: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> WorldId {
        self.id
    }

    /// Number of ticks this world has completed.
    pub fn tick_count(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    pub fn view_distance(&self) -> i32 {
        self.tracker.view_distance()
    }

    /// Read access to the entity tracker.
    pub fn tracker(&self) -> &Synchronized<ChunkIndex> {
        &self.tracker
    }

    pub fn entity_count(&self) -> usize {
        self.tracker.with(|index| index.len())
    }

    pub fn position(&self, id: EntityId) -> Option<Point> {
        self.tracker.get(id).map(|e| e.position)
    }

    /// Spawn a new entity at `position`. Returns its id.
    pub fn spawn(&self, kind: EntityKind, position: Point) -> Result<EntityId, WorldError> {
        let id = EntityId::new();
        self.spawn_with_id(id, kind, position)?;
        Ok(id)
    }

    /// Spawn an entity with a specific id (used by admission).
    pub fn spawn_with_id(
        &self,
        id: EntityId,
        kind: EntityKind,
        position: Point,
    ) -> Result<(), WorldError> {
        let mut viewers = VisibilitySet::new();
        if !self.tracker.register(id, kind, position, &mut viewers)? {
            return Err(WorldError::DuplicateEntity(id));
        }

        let mut shown: Vec<ViewEvent> = viewers
            .added()
            .map(|viewer| ViewEvent::Show {
                viewer: viewer.id,
                entity: id,
            })
            .collect();
        if kind == EntityKind::Player {
            self.tracker
                .visible_entities(position, Target::Entities, &mut |e: &TrackedEntity| {
                    if e.id != id {
                        shown.push(ViewEvent::Show {
                            viewer: id,
                            entity: e.id,
                        });
                    }
                });
        }
        self.view_events.lock().extend(shown);
        self.event_log.lock().push(WorldEvent::Registered { id, kind, position });
        tracing::debug!(world = %self.id, entity = %id.short(), ?kind, "spawned");
        Ok(())
    }

    /// Remove an entity. Returns `false` if it was not in this world.
    pub fn despawn(&self, id: EntityId) -> Result<bool, WorldError> {
        let Some(position) = self.position(id) else {
            return Ok(false);
        };
        let mut viewers = VisibilitySet::new();
        self.tracker.unregister(id, position, &mut viewers)?;
        self.pending_moves.lock().remove(&id);

        self.view_events
            .lock()
            .extend(viewers.removed().map(|viewer| ViewEvent::Hide {
                viewer: viewer.id,
                entity: id,
            }));
        self.event_log
            .lock()
            .push(WorldEvent::Unregistered { id, position });
        tracing::debug!(world = %self.id, entity = %id.short(), "despawned");
        Ok(true)
    }

    /// Queue a move to be applied on the next tick that owns the entity's
    /// chunk. A later call for the same entity replaces the earlier target.
    pub fn queue_move(&self, id: EntityId, to: Point) -> Result<(), WorldError> {
        if self.tracker.get(id).is_none() {
            return Err(TrackingError::NotTracked(id).into());
        }
        self.pending_moves.lock().insert(id, to);
        Ok(())
    }

    pub fn pending_moves(&self) -> usize {
        self.pending_moves.lock().len()
    }

    /// Run one full tick: every pending move, then advance the counter.
    pub fn tick(&self, timestamp: i64) -> TickSummary {
        let _span = tracing::debug_span!("world_tick", world = %self.id).entered();
        let batch = std::mem::take(&mut *self.pending_moves.lock());
        let summary = self.apply_moves(batch);
        self.advance(timestamp);
        summary
    }

    /// Apply the pending moves of entities currently resident in `chunks`.
    ///
    /// Does not advance the tick counter; the caller does that once per world
    /// after every group holding the world's chunks has run.
    pub fn tick_chunks(&self, chunks: &HashSet<ChunkCoord>) -> TickSummary {
        let batch: BTreeMap<EntityId, Point> = {
            let mut pending = self.pending_moves.lock();
            let owned: Vec<EntityId> = pending
                .keys()
                .copied()
                .filter(|id| {
                    self.tracker
                        .get(*id)
                        .is_some_and(|e| chunks.contains(&e.chunk()))
                })
                .collect();
            owned
                .into_iter()
                .filter_map(|id| pending.remove(&id).map(|to| (id, to)))
                .collect()
        };
        self.apply_moves(batch)
    }

    /// Finish a tick: bump the counter and log it.
    pub fn advance(&self, timestamp: i64) {
        let tick = self.tick.fetch_add(1, Ordering::AcqRel) + 1;
        self.event_log
            .lock()
            .push(WorldEvent::Ticked { tick, timestamp });
    }

    fn apply_moves(&self, batch: BTreeMap<EntityId, Point>) -> TickSummary {
        let mut summary = TickSummary::default();
        let mut view_events = Vec::new();
        let mut moved = Vec::new();

        for (id, to) in batch {
            let Some(current) = self.tracker.get(id) else {
                // Despawned after the move was queued.
                summary.moves_rejected += 1;
                continue;
            };
            let from = current.position;
            let mut viewers = VisibilitySet::new();
            if let Err(err) = self.tracker.move_entity(id, from, to, &mut viewers) {
                tracing::error!(world = %self.id, entity = %id.short(), %err, "move rejected");
                summary.moves_rejected += 1;
                continue;
            }

            view_events.extend(viewers.added().map(|v| ViewEvent::Show {
                viewer: v.id,
                entity: id,
            }));
            view_events.extend(viewers.removed().map(|v| ViewEvent::Hide {
                viewer: v.id,
                entity: id,
            }));

            if current.is_player() {
                let mut seen = VisibilitySet::new();
                self.tracker.difference(from, to, Target::Entities, &mut seen);
                view_events.extend(seen.added().filter(|e| e.id != id).map(|e| {
                    ViewEvent::Show {
                        viewer: id,
                        entity: e.id,
                    }
                }));
                view_events.extend(seen.removed().filter(|e| e.id != id).map(|e| {
                    ViewEvent::Hide {
                        viewer: id,
                        entity: e.id,
                    }
                }));
            }

            moved.push(WorldEvent::Moved { id, from, to });
            summary.moves_applied += 1;
        }

        summary.view_events = view_events.len();
        if !view_events.is_empty() {
            self.view_events.lock().extend(view_events);
        }
        if !moved.is_empty() {
            self.event_log.lock().extend(moved);
        }
        summary
    }

    /// Mark a chunk resident. Returns `false` if it already was.
    pub fn load_chunk(&self, chunk: ChunkCoord) -> bool {
        let inserted = self.loaded_chunks.write().insert(chunk);
        if inserted {
            self.chunk_signals.lock().push(ChunkSignal {
                world: self.id,
                chunk,
                kind: ChunkSignalKind::Load,
            });
            tracing::trace!(world = %self.id, %chunk, "chunk loaded");
        }
        inserted
    }

    /// Mark a chunk no longer resident. Returns `false` if it was not loaded.
    pub fn unload_chunk(&self, chunk: ChunkCoord) -> bool {
        let removed = self.loaded_chunks.write().remove(&chunk);
        if removed {
            self.chunk_signals.lock().push(ChunkSignal {
                world: self.id,
                chunk,
                kind: ChunkSignalKind::Unload,
            });
            tracing::trace!(world = %self.id, %chunk, "chunk unloaded");
        }
        removed
    }

    pub fn is_chunk_loaded(&self, chunk: ChunkCoord) -> bool {
        self.loaded_chunks.read().contains(&chunk)
    }

    /// Loaded chunks in coordinate order.
    pub fn loaded_chunks(&self) -> Vec<ChunkCoord> {
        self.loaded_chunks.read().iter().copied().collect()
    }

    /// Take the chunk signals recorded since the last drain.
    pub fn drain_chunk_signals(&self) -> Vec<ChunkSignal> {
        std::mem::take(&mut *self.chunk_signals.lock())
    }

    /// Take the view changes recorded since the last drain.
    pub fn drain_view_events(&self) -> Vec<ViewEvent> {
        std::mem::take(&mut *self.view_events.lock())
    }

    /// Drain and return the event log.
    pub fn drain_events(&self) -> Vec<WorldEvent> {
        std::mem::take(&mut *self.event_log.lock())
    }

    /// Copy of the event log.
    pub fn events(&self) -> Vec<WorldEvent> {
        self.event_log.lock().clone()
    }
}

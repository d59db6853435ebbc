//! Simulated population: wandering entities and players with fake connections.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tickspace_common::{ChunkCoord, EntityId, Point, WorldId};
use tickspace_kernel::{Admission, AdmissionQueue, World, WorldDirectory};
use tickspace_scheduler::{
    Connections, DisconnectReason, Observer, ObserverLiveness, OutboundMessage, TickReport,
};
use tickspace_tracking::EntityKind;

const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;

/// A player's connection. Non-responsive clients never answer keep-alives.
pub struct SimClient {
    id: EntityId,
    world: WorldId,
    responsive: bool,
    liveness: ObserverLiveness,
    outstanding: Mutex<Option<i64>>,
    closed: Mutex<Option<DisconnectReason>>,
}

impl SimClient {
    fn new(id: EntityId, world: WorldId, responsive: bool, connected_at: i64) -> Self {
        Self {
            id,
            world,
            responsive,
            liveness: ObserverLiveness::new(connected_at),
            outstanding: Mutex::new(None),
            closed: Mutex::new(None),
        }
    }

    /// Answer the outstanding probe, if any and if this client answers at all.
    fn answer(&self, now: i64) {
        if !self.responsive {
            return;
        }
        if let Some(id) = self.outstanding.lock().take() {
            self.liveness.acknowledge(id, now);
        }
    }
}

impl Observer for SimClient {
    fn id(&self) -> EntityId {
        self.id
    }

    fn liveness(&self) -> &ObserverLiveness {
        &self.liveness
    }

    fn send(&self, message: OutboundMessage) {
        if let OutboundMessage::KeepAlive { id } = message {
            *self.outstanding.lock() = Some(id);
        }
    }

    fn disconnect(&self, reason: DisconnectReason) {
        tracing::info!(client = %self.id.short(), %reason, "client disconnected");
        *self.closed.lock() = Some(reason);
    }
}

/// Totals printed at the end of a run.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub strategy: String,
    pub ticks: u64,
    pub worlds: usize,
    pub entities: usize,
    pub players_admitted: usize,
    pub players_disconnected: usize,
    pub moves_applied: usize,
    pub moves_rejected: usize,
    pub view_events: usize,
    pub keep_alives: usize,
    pub max_partitions: usize,
    pub mean_tick_micros: u64,
    pub max_tick_micros: u64,
}

impl RunSummary {
    pub fn record(&mut self, report: &TickReport) {
        self.ticks = report.tick;
        self.moves_applied += report.summary.moves_applied;
        self.moves_rejected += report.summary.moves_rejected;
        self.view_events += report.summary.view_events;
        self.keep_alives += report.probed;
        self.players_admitted += report.admitted;
        self.max_partitions = self.max_partitions.max(report.partitions);
        let micros = report.elapsed.as_micros() as u64;
        self.max_tick_micros = self.max_tick_micros.max(micros);
        // Running mean over completed ticks.
        let n = report.tick.max(1);
        self.mean_tick_micros = (self.mean_tick_micros * (n - 1) + micros) / n;
    }
}

/// Everything the simulation drives between ticks.
pub struct Population {
    worlds: Arc<WorldDirectory>,
    connections: Arc<Connections>,
    clients: Vec<Arc<SimClient>>,
    wanderers: Vec<(WorldId, EntityId, Point)>,
    disconnected: usize,
}

impl Population {
    /// Spawn `entities` wanderers spread over every world and queue `players`
    /// for admission. Every fourth player never answers keep-alives.
    pub fn seed(
        worlds: Arc<WorldDirectory>,
        connections: Arc<Connections>,
        admissions: &AdmissionQueue,
        entities: usize,
        players: usize,
        now: i64,
    ) -> anyhow::Result<Self> {
        let all = worlds.worlds();
        anyhow::ensure!(!all.is_empty(), "at least one world is required");

        let mut wanderers = Vec::with_capacity(entities);
        for i in 0..entities {
            let world = &all[i % all.len()];
            let at = spiral(i);
            load_around(world, at);
            let id = world.spawn(EntityKind::Entity, at)?;
            wanderers.push((world.id(), id, at));
        }

        let mut clients = Vec::with_capacity(players);
        for i in 0..players {
            let world = &all[i % all.len()];
            let id = EntityId::new();
            let at = spiral(i * 7 + 3);
            load_around(world, at);
            admissions.queue(Admission {
                id,
                kind: EntityKind::Player,
                world: world.id(),
                position: at,
            });
            let client = Arc::new(SimClient::new(id, world.id(), i % 4 != 3, now));
            connections.add(client.clone());
            clients.push(client);
        }

        tracing::info!(entities, players, worlds = all.len(), "population seeded");
        Ok(Self {
            worlds,
            connections,
            clients,
            wanderers,
            disconnected: 0,
        })
    }

    pub fn entity_count(&self) -> usize {
        self.wanderers.len()
    }

    pub fn disconnected(&self) -> usize {
        self.disconnected
    }

    /// Queue this tick's moves. Target chunks are loaded first so chunk-group
    /// partitions own them.
    pub fn wander(&mut self, tick: u64) {
        for (i, (world_id, id, at)) in self.wanderers.iter_mut().enumerate() {
            let Some(world) = self.worlds.get(*world_id) else {
                continue;
            };
            let phase = tick as f64 * 0.1 + i as f64;
            let to = *at + Point::new(phase.cos() * 3.0, 0.0, phase.sin() * 3.0);
            world.load_chunk(ChunkCoord::from_point(to));
            match world.queue_move(*id, to) {
                Ok(()) => *at = to,
                Err(err) => tracing::warn!(entity = %id.short(), %err, "move not queued"),
            }
        }
    }

    /// Answer probes, then despawn clients the liveness sweep closed.
    pub fn service_clients(&mut self, now: i64) {
        let mut kept = Vec::with_capacity(self.clients.len());
        for client in self.clients.drain(..) {
            if client.closed.lock().is_some() {
                self.connections.remove(client.id);
                if let Some(world) = self.worlds.get(client.world) {
                    if let Err(err) = world.despawn(client.id) {
                        tracing::warn!(client = %client.id.short(), %err, "despawn failed");
                    }
                }
                self.disconnected += 1;
            } else {
                client.answer(now);
                kept.push(client);
            }
        }
        self.clients = kept;
    }

    /// Drop outboxes the network layer would otherwise consume.
    pub fn flush_outboxes(&self) {
        for world in self.worlds.worlds() {
            world.drain_view_events();
            world.drain_events();
        }
    }

    pub fn shutdown(&mut self) {
        for client in self.clients.drain(..) {
            client.disconnect(DisconnectReason::ServerShutdown);
            self.connections.remove(client.id);
        }
    }
}

fn spiral(i: usize) -> Point {
    let angle = i as f64 * GOLDEN_ANGLE;
    let radius = 6.0 * (i as f64).sqrt();
    Point::new(angle.cos() * radius, 64.0, angle.sin() * radius)
}

fn load_around(world: &World, at: Point) {
    for chunk in ChunkCoord::from_point(at).range(1) {
        world.load_chunk(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickspace_kernel::WaitingAdmissions;

    #[test]
    fn seeded_population_lands_in_every_world() {
        let worlds = Arc::new(WorldDirectory::new());
        let a = worlds.create(2).unwrap();
        let b = worlds.create(2).unwrap();
        let connections = Arc::new(Connections::new());
        let admissions = AdmissionQueue::new();

        let pop = Population::seed(worlds.clone(), connections.clone(), &admissions, 10, 4, 0)
            .unwrap();
        assert_eq!(pop.entity_count(), 10);
        assert_eq!(a.entity_count(), 5);
        assert_eq!(b.entity_count(), 5);
        assert_eq!(connections.len(), 4);
        assert_eq!(admissions.admit_waiting(&worlds), 4);
        assert!(!a.loaded_chunks().is_empty());
    }

    #[test]
    fn silent_clients_are_removed_after_disconnect() {
        let worlds = Arc::new(WorldDirectory::new());
        worlds.create(2).unwrap();
        let connections = Arc::new(Connections::new());
        let admissions = AdmissionQueue::new();
        let mut pop =
            Population::seed(worlds.clone(), connections.clone(), &admissions, 0, 4, 0).unwrap();
        admissions.admit_waiting(&worlds);

        pop.clients[3].disconnect(DisconnectReason::Timeout);
        pop.service_clients(100);
        assert_eq!(pop.disconnected(), 1);
        assert_eq!(connections.len(), 3);
        assert_eq!(worlds.worlds()[0].entity_count(), 3);
    }

    #[test]
    fn summary_tracks_mean_and_max() {
        let mut summary = RunSummary::default();
        let mut report = TickReport {
            tick: 1,
            timestamp: 0,
            partitions: 2,
            summary: Default::default(),
            admitted: 1,
            probed: 0,
            disconnected: 0,
            elapsed: std::time::Duration::from_micros(100),
            sleep: std::time::Duration::from_millis(1),
        };
        summary.record(&report);
        report.tick = 2;
        report.elapsed = std::time::Duration::from_micros(300);
        summary.record(&report);
        assert_eq!(summary.mean_tick_micros, 200);
        assert_eq!(summary.max_tick_micros, 300);
        assert_eq!(summary.players_admitted, 2);
        assert_eq!(summary.max_partitions, 2);
    }
}

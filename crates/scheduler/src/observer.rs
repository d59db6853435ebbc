use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tickspace_common::EntityId;

/// Why the server closed a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The observer stopped answering keep-alive probes.
    Timeout,
    /// The server is shutting down.
    ServerShutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Timeout => write!(f, "Timeout"),
            DisconnectReason::ServerShutdown => write!(f, "Server closed"),
        }
    }
}

/// Pre-built messages the core hands to a connection. Encoding is the
/// connection's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundMessage {
    /// Probe the client answers by echoing `id`.
    KeepAlive { id: i64 },
    Disconnect { reason: DisconnectReason },
}

/// Keep-alive bookkeeping for one connected observer.
///
/// Written by the liveness sweep (`refresh`, `close`) and by the connection's
/// acknowledgement handler (`acknowledge`); both can run concurrently.
#[derive(Debug)]
pub struct ObserverLiveness {
    last_sent: AtomicI64,
    last_acknowledged: AtomicI64,
    acknowledged: AtomicBool,
    closed: AtomicBool,
}

impl ObserverLiveness {
    /// A fresh connection: nothing outstanding, silence counted from `connected_at`.
    pub fn new(connected_at: i64) -> Self {
        Self {
            last_sent: AtomicI64::new(connected_at),
            last_acknowledged: AtomicI64::new(connected_at),
            acknowledged: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// When the last probe was sent (or the connection opened).
    pub fn last_sent(&self) -> i64 {
        self.last_sent.load(Ordering::Acquire)
    }

    /// When the client last answered (or the connection opened).
    pub fn last_acknowledged(&self) -> i64 {
        self.last_acknowledged.load(Ordering::Acquire)
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::Acquire)
    }

    /// Record a probe sent at `timestamp`; it is outstanding until acknowledged.
    pub fn refresh(&self, timestamp: i64) {
        self.last_sent.store(timestamp, Ordering::Release);
        self.acknowledged.store(false, Ordering::Release);
    }

    /// Mark the connection closed. Returns `false` if it already was.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Record the client's answer to the probe with id `id`. Answers to
    /// anything but the latest probe are ignored.
    pub fn acknowledge(&self, id: i64, at: i64) -> bool {
        if id != self.last_sent() {
            return false;
        }
        self.last_acknowledged.store(at, Ordering::Release);
        self.acknowledged.store(true, Ordering::Release);
        true
    }
}

/// A connected remote observer (a player's connection).
///
/// Implementors supply the liveness record and the two outbound actions; the
/// keep-alive accessors are provided on top of the record.
pub trait Observer: Send + Sync {
    fn id(&self) -> EntityId;

    fn liveness(&self) -> &ObserverLiveness;

    /// Queue a pre-built message on the connection.
    fn send(&self, message: OutboundMessage);

    /// Close the connection, telling the client why.
    fn disconnect(&self, reason: DisconnectReason);

    fn last_keep_alive(&self) -> i64 {
        self.liveness().last_sent()
    }

    fn last_acknowledged(&self) -> i64 {
        self.liveness().last_acknowledged()
    }

    fn has_acknowledged_keep_alive(&self) -> bool {
        self.liveness().is_acknowledged()
    }

    fn refresh_keep_alive(&self, timestamp: i64) {
        self.liveness().refresh(timestamp);
    }

    fn is_closed(&self) -> bool {
        self.liveness().is_closed()
    }
}

/// Lookup of the currently connected observers.
///
/// Observers the liveness sweep closed may still be listed; the sweep skips
/// them.
pub trait ConnectionDirectory: Send + Sync {
    fn online_observers(&self) -> Vec<Arc<dyn Observer>>;
}

/// In-memory connection registry. Closed observers are dropped on the next
/// lookup.
#[derive(Default)]
pub struct Connections {
    online: RwLock<BTreeMap<EntityId, Arc<dyn Observer>>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn Observer>) {
        self.online.write().insert(observer.id(), observer);
    }

    pub fn remove(&self, id: EntityId) -> Option<Arc<dyn Observer>> {
        self.online.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.online.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.read().is_empty()
    }

    /// Drop every closed observer, returning how many went.
    pub fn prune_closed(&self) -> usize {
        let mut online = self.online.write();
        let before = online.len();
        online.retain(|_, observer| !observer.is_closed());
        let pruned = before - online.len();
        if pruned > 0 {
            tracing::debug!(pruned, "closed connections dropped");
        }
        pruned
    }
}

impl ConnectionDirectory for Connections {
    fn online_observers(&self) -> Vec<Arc<dyn Observer>> {
        self.prune_closed();
        self.online.read().values().cloned().collect()
    }
}

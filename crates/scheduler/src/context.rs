use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tickspace_kernel::{WaitingAdmissions, WorldDirectory};

use crate::observer::ConnectionDirectory;

/// Source of wall-clock milliseconds handed to strategies and the liveness sweep.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::Release);
    }

    pub fn advance(&self, millis: i64) -> i64 {
        self.now.fetch_add(millis, Ordering::AcqRel) + millis
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}

/// Everything the scheduler reaches out to, passed in at construction.
#[derive(Clone)]
pub struct ServerContext {
    pub worlds: Arc<WorldDirectory>,
    pub connections: Arc<dyn ConnectionDirectory>,
    pub admissions: Arc<dyn WaitingAdmissions>,
    pub clock: Arc<dyn Clock>,
}

impl ServerContext {
    pub fn new(
        worlds: Arc<WorldDirectory>,
        connections: Arc<dyn ConnectionDirectory>,
        admissions: Arc<dyn WaitingAdmissions>,
    ) -> Self {
        Self::with_clock(worlds, connections, admissions, Arc::new(SystemClock))
    }

    pub fn with_clock(
        worlds: Arc<WorldDirectory>,
        connections: Arc<dyn ConnectionDirectory>,
        admissions: Arc<dyn WaitingAdmissions>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            worlds,
            connections,
            admissions,
            clock,
        }
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("worlds", &self.worlds.len())
            .field("now", &self.clock.now_millis())
            .finish_non_exhaustive()
    }
}

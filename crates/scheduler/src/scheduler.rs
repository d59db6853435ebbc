use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tickspace_common::{ChunkCoord, WorldId};
use tickspace_kernel::{ChunkSignal, ChunkSignalKind, TickSummary};

use crate::config::{ConfigError, SchedulerConfig};
use crate::context::ServerContext;
use crate::liveness::{self, LivenessPolicy};
use crate::strategy::{PartitionStrategy, StrategyReport};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler was already started")]
    AlreadyStarted,
    #[error("scheduler is not running")]
    NotRunning,
    #[error("the tick loop is running; manual ticks are refused")]
    LoopRunning,
    #[error("a tick is in flight; strategies can only be swapped between ticks")]
    TickInFlight,
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to spawn tick thread: {0}")]
    Spawn(std::io::Error),
}

/// Lifecycle of the tick loop: `Idle -> Running -> StopRequested -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Running = 1,
    StopRequested = 2,
    Stopped = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Running,
            2 => SchedulerState::StopRequested,
            _ => SchedulerState::Stopped,
        }
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Wall-clock millis handed to the strategy and the liveness sweep.
    pub timestamp: i64,
    pub partitions: usize,
    pub summary: TickSummary,
    pub admitted: usize,
    pub probed: usize,
    pub disconnected: usize,
    pub elapsed: Duration,
    pub sleep: Duration,
}

/// Time left in the tick period, floored at 1 ms so the loop never spins.
pub fn sleep_budget(period: Duration, elapsed: Duration) -> Duration {
    let remaining = period.as_nanos() as i128 - elapsed.as_nanos() as i128;
    let millis = (remaining / 1_000_000).max(1);
    Duration::from_millis(millis as u64)
}

struct Shared {
    config: SchedulerConfig,
    policy: LivenessPolicy,
    context: ServerContext,
    /// Held for the whole partition step of a tick.
    strategy: Mutex<Option<Box<dyn PartitionStrategy>>>,
    signals: Mutex<Vec<ChunkSignal>>,
    /// Held for a whole tick, so ticks never overlap.
    ticking: Mutex<()>,
    state: AtomicU8,
    ticks: AtomicU64,
    woken: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SchedulerState, to: SchedulerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn run_tick(&self) -> TickReport {
        let _ticking = self.ticking.lock();
        let start = Instant::now();
        let tick = self.ticks.load(Ordering::Acquire) + 1;
        let _span = tracing::info_span!("tick", tick).entered();
        let worlds = &self.context.worlds;
        let now = self.context.clock.now_millis();

        let report = {
            let mut slot = self.strategy.lock();
            let mut signals = std::mem::take(&mut *self.signals.lock());
            signals.extend(worlds.drain_chunk_signals());
            match slot.as_mut() {
                Some(strategy) => {
                    for signal in signals {
                        match signal.kind {
                            ChunkSignalKind::Load => {
                                strategy.on_chunk_load(signal.world, signal.chunk)
                            }
                            ChunkSignalKind::Unload => {
                                strategy.on_chunk_unload(signal.world, signal.chunk)
                            }
                        }
                    }
                    strategy.update(worlds, now)
                }
                None => {
                    if !signals.is_empty() {
                        tracing::trace!(dropped = signals.len(), "no strategy, chunk signals dropped");
                    }
                    StrategyReport::default()
                }
            }
        };

        let admitted = self.context.admissions.admit_waiting(worlds);

        let observers = self.context.connections.online_observers();
        let sweep = liveness::sweep(&observers, now, &self.policy);

        self.ticks.fetch_add(1, Ordering::AcqRel);
        let period = self.config.tick_period();
        let elapsed = start.elapsed();
        if elapsed > period {
            tracing::warn!(?elapsed, ?period, "tick overran its period");
        }

        let report = TickReport {
            tick,
            timestamp: now,
            partitions: report.partitions,
            summary: report.summary,
            admitted,
            probed: sweep.probed,
            disconnected: sweep.disconnected,
            elapsed,
            sleep: sleep_budget(period, elapsed),
        };
        tracing::trace!(?report, "tick complete");
        report
    }

    fn sleep(&self, duration: Duration) {
        let mut woken = self.woken.lock();
        if !*woken && !self.wake.wait_for(&mut woken, duration).timed_out() {
            tracing::debug!("tick sleep interrupted");
        }
        *woken = false;
    }

    fn interrupt(&self) {
        *self.woken.lock() = true;
        self.wake.notify_all();
    }

    fn run_loop(&self) {
        tracing::info!(
            period_ms = self.config.tick_period_millis,
            "tick loop started"
        );
        while self.state() == SchedulerState::Running {
            let report = self.run_tick();
            self.sleep(report.sleep);
        }
        self.state
            .store(SchedulerState::Stopped as u8, Ordering::Release);
        tracing::info!(ticks = self.ticks.load(Ordering::Acquire), "tick loop stopped");
    }
}

/// Drives every world at a fixed nominal rate on a dedicated thread.
///
/// Each iteration runs the partition strategy (a full barrier), admits waiting
/// entities, sweeps observer liveness, then sleeps out the rest of the period.
pub struct TickScheduler {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TickScheduler {
    /// Validate `config` and build the strategy it names.
    pub fn new(config: SchedulerConfig, context: ServerContext) -> Result<Self, SchedulerError> {
        config.validate()?;
        let strategy = config
            .partition_strategy
            .build(config.worker_threads)?;
        Self::with_strategy(config, context, strategy)
    }

    /// Like [`TickScheduler::new`] with an explicitly supplied strategy.
    pub fn with_strategy(
        config: SchedulerConfig,
        context: ServerContext,
        mut strategy: Box<dyn PartitionStrategy>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        strategy.attach(&context.worlds);
        tracing::info!(strategy = strategy.name(), "scheduler configured");
        Ok(Self {
            shared: Arc::new(Shared {
                policy: LivenessPolicy::from(&config),
                config,
                context,
                strategy: Mutex::new(Some(strategy)),
                signals: Mutex::new(Vec::new()),
                ticking: Mutex::new(()),
                state: AtomicU8::new(SchedulerState::Idle as u8),
                ticks: AtomicU64::new(0),
                woken: Mutex::new(false),
                wake: Condvar::new(),
            }),
            handle: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn context(&self) -> &ServerContext {
        &self.shared.context
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    /// Ticks completed so far.
    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    /// Start the loop on the `tick-main` thread. Only valid once.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if !self
            .shared
            .transition(SchedulerState::Idle, SchedulerState::Running)
        {
            return Err(SchedulerError::AlreadyStarted);
        }
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("tick-main".into())
            .spawn(move || shared.run_loop());
        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared
                    .state
                    .store(SchedulerState::Idle as u8, Ordering::Release);
                Err(SchedulerError::Spawn(err))
            }
        }
    }

    /// Ask the loop to exit after the tick in flight, if any. Does not wait.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        match self.state() {
            SchedulerState::Idle => Err(SchedulerError::NotRunning),
            SchedulerState::Running => {
                if self
                    .shared
                    .transition(SchedulerState::Running, SchedulerState::StopRequested)
                {
                    tracing::info!("stop requested");
                }
                self.shared.interrupt();
                Ok(())
            }
            SchedulerState::StopRequested | SchedulerState::Stopped => Ok(()),
        }
    }

    /// Wait for the loop thread to exit.
    pub fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("tick thread panicked");
                self.shared
                    .state
                    .store(SchedulerState::Stopped as u8, Ordering::Release);
            }
        }
    }

    /// Run one loop body on the calling thread, without sleeping.
    ///
    /// Only before [`TickScheduler::start`] or after the loop has stopped;
    /// fails with [`SchedulerError::LoopRunning`] in between.
    pub fn run_tick(&self) -> Result<TickReport, SchedulerError> {
        match self.state() {
            SchedulerState::Running | SchedulerState::StopRequested => {
                Err(SchedulerError::LoopRunning)
            }
            SchedulerState::Idle | SchedulerState::Stopped => Ok(self.shared.run_tick()),
        }
    }

    /// Cut the current (or next) end-of-tick sleep short.
    pub fn interrupt_sleep(&self) {
        self.shared.interrupt();
    }

    /// Swap in a new strategy, returning the old one.
    ///
    /// Fails with [`SchedulerError::TickInFlight`] if a tick is currently
    /// running its partition step.
    pub fn set_strategy(
        &self,
        mut strategy: Box<dyn PartitionStrategy>,
    ) -> Result<Option<Box<dyn PartitionStrategy>>, SchedulerError> {
        let mut slot = self
            .shared
            .strategy
            .try_lock()
            .ok_or(SchedulerError::TickInFlight)?;
        strategy.attach(&self.shared.context.worlds);
        tracing::info!(strategy = strategy.name(), "partition strategy replaced");
        Ok(slot.replace(strategy))
    }

    /// Remove the strategy. Ticks then do no partition work.
    pub fn take_strategy(&self) -> Result<Option<Box<dyn PartitionStrategy>>, SchedulerError> {
        let mut slot = self
            .shared
            .strategy
            .try_lock()
            .ok_or(SchedulerError::TickInFlight)?;
        Ok(slot.take())
    }

    /// Name of the installed strategy. `None` while a tick holds it or none is set.
    pub fn strategy_name(&self) -> Option<&'static str> {
        self.shared
            .strategy
            .try_lock()
            .and_then(|slot| slot.as_ref().map(|s| s.name()))
    }

    /// Notify the strategy, at the next tick boundary, that a chunk loaded.
    pub fn signal_chunk_load(&self, world: WorldId, chunk: ChunkCoord) {
        self.queue_signal(world, chunk, ChunkSignalKind::Load);
    }

    pub fn signal_chunk_unload(&self, world: WorldId, chunk: ChunkCoord) {
        self.queue_signal(world, chunk, ChunkSignalKind::Unload);
    }

    fn queue_signal(&self, world: WorldId, chunk: ChunkCoord, kind: ChunkSignalKind) {
        // A held slot means a tick is in flight, so a strategy is present.
        if let Some(slot) = self.shared.strategy.try_lock() {
            if slot.is_none() {
                tracing::trace!(%world, %chunk, ?kind, "no strategy, chunk signal ignored");
                return;
            }
        }
        self.shared
            .signals
            .lock()
            .push(ChunkSignal { world, chunk, kind });
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        if self.state() == SchedulerState::Running {
            let _ = self.stop();
        }
        self.join();
    }
}

impl std::fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("state", &self.state())
            .field("ticks", &self.tick_count())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

//! Tick scheduling: the fixed-rate loop that drives every world.
//!
//! # Invariants
//! - A tick's partition work completes before admission, the liveness sweep,
//!   or the next tick begins.
//! - Every world, or every loaded chunk, belongs to exactly one partition per tick.
//! - Strategies are only swapped between ticks.
//! - The loop always sleeps at least 1 ms between ticks. Sustained overrun
//!   drifts the tick rate; no catch-up ticks are run.

pub mod config;
pub mod context;
pub mod liveness;
pub mod observer;
pub mod scheduler;
pub mod strategy;

pub use config::{ConfigError, SchedulerConfig, StrategyKind};
pub use context::{Clock, ManualClock, ServerContext, SystemClock};
pub use liveness::{LivenessPolicy, SweepReport, sweep};
pub use observer::{
    ConnectionDirectory, Connections, DisconnectReason, Observer, ObserverLiveness,
    OutboundMessage,
};
pub use scheduler::{SchedulerError, SchedulerState, TickReport, TickScheduler, sleep_budget};
pub use strategy::{
    ChunkGroupStrategy, Partition, PartitionStrategy, PerWorldStrategy, Scope, StrategyReport,
};

pub fn crate_info() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("scheduler"));
    }
}

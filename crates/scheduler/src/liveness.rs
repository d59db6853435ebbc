use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::observer::{DisconnectReason, Observer, OutboundMessage};

/// Keep-alive thresholds, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    /// Probe once the last probe is older than this (strictly).
    pub keep_alive_delay: i64,
    /// Disconnect once the last answer is at least this old.
    pub keep_alive_kick: i64,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            keep_alive_delay: 10_000,
            keep_alive_kick: 30_000,
        }
    }
}

impl From<&SchedulerConfig> for LivenessPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            keep_alive_delay: config.keep_alive_delay_millis,
            keep_alive_kick: config.keep_alive_kick_millis,
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub disconnected: usize,
}

/// Probe or evict every observer, given the wall clock `now` in millis.
///
/// An observer whose previous probe was answered gets a new one once the
/// delay has passed. Otherwise it is disconnected when its last answer (or
/// its connection time) is `keep_alive_kick` old, however many probes went
/// out in between. Disconnecting closes the observer's liveness record, and
/// closed observers are skipped.
pub fn sweep(observers: &[Arc<dyn Observer>], now: i64, policy: &LivenessPolicy) -> SweepReport {
    let _span = tracing::debug_span!("liveness_sweep", observers = observers.len()).entered();
    let mut report = SweepReport::default();

    for observer in observers {
        if observer.is_closed() {
            continue;
        }
        let since_probe = now - observer.last_keep_alive();
        if since_probe > policy.keep_alive_delay && observer.has_acknowledged_keep_alive() {
            observer.refresh_keep_alive(now);
            observer.send(OutboundMessage::KeepAlive { id: now });
            report.probed += 1;
            tracing::trace!(observer = %observer.id().short(), "keep-alive sent");
        } else if now - observer.last_acknowledged() >= policy.keep_alive_kick
            && observer.liveness().close()
        {
            tracing::warn!(
                observer = %observer.id().short(),
                silent_for = now - observer.last_acknowledged(),
                "keep-alive timeout, disconnecting"
            );
            observer.disconnect(DisconnectReason::Timeout);
            report.disconnected += 1;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ObserverLiveness;
    use parking_lot::Mutex;
    use tickspace_common::EntityId;

    struct Silent {
        id: EntityId,
        liveness: ObserverLiveness,
        sent: Mutex<Vec<OutboundMessage>>,
        reason: Mutex<Option<DisconnectReason>>,
    }

    impl Silent {
        fn connected_at(t: i64) -> Arc<Self> {
            Arc::new(Self {
                id: EntityId::new(),
                liveness: ObserverLiveness::new(t),
                sent: Mutex::new(Vec::new()),
                reason: Mutex::new(None),
            })
        }
    }

    impl Observer for Silent {
        fn id(&self) -> EntityId {
            self.id
        }

        fn liveness(&self) -> &ObserverLiveness {
            &self.liveness
        }

        fn send(&self, message: OutboundMessage) {
            self.sent.lock().push(message);
        }

        fn disconnect(&self, reason: DisconnectReason) {
            *self.reason.lock() = Some(reason);
        }
    }

    fn run(observer: &Arc<Silent>, now: i64) -> SweepReport {
        let observers: Vec<Arc<dyn Observer>> = vec![observer.clone()];
        sweep(&observers, now, &LivenessPolicy::default())
    }

    #[test]
    fn probe_is_strictly_after_the_delay() {
        let obs = Silent::connected_at(0);
        assert_eq!(run(&obs, 10_000).probed, 0);
        assert_eq!(run(&obs, 10_001).probed, 1);
        assert_eq!(
            obs.sent.lock().as_slice(),
            &[OutboundMessage::KeepAlive { id: 10_001 }]
        );
        assert_eq!(obs.last_keep_alive(), 10_001);
        assert!(!obs.has_acknowledged_keep_alive());
    }

    #[test]
    fn silent_observer_is_evicted_at_thirty_seconds() {
        let obs = Silent::connected_at(0);
        run(&obs, 10_001);
        assert_eq!(run(&obs, 29_999), SweepReport::default());
        assert!(obs.reason.lock().is_none());

        let report = run(&obs, 30_000);
        assert_eq!(report.disconnected, 1);
        assert_eq!(*obs.reason.lock(), Some(DisconnectReason::Timeout));
    }

    #[test]
    fn eviction_ignores_probe_cadence() {
        // Sweeping every 50 ms: exactly one probe goes out, eviction still at 30 s.
        let obs = Silent::connected_at(0);
        let mut evicted_at = None;
        for now in (0..=40_000).step_by(50) {
            if run(&obs, now).disconnected > 0 {
                evicted_at = Some(now);
                break;
            }
        }
        assert_eq!(obs.sent.lock().len(), 1);
        assert_eq!(evicted_at, Some(30_000));
    }

    #[test]
    fn evicted_observer_is_disconnected_once() {
        let obs = Silent::connected_at(0);
        run(&obs, 10_001);
        assert_eq!(run(&obs, 30_000).disconnected, 1);
        assert!(obs.is_closed());

        *obs.reason.lock() = None;
        assert_eq!(run(&obs, 30_050), SweepReport::default());
        assert_eq!(run(&obs, 60_000), SweepReport::default());
        assert!(obs.reason.lock().is_none());
        assert_eq!(obs.sent.lock().len(), 1);
    }

    #[test]
    fn answering_observer_is_probed_again_and_kept() {
        let obs = Silent::connected_at(0);
        run(&obs, 10_001);
        assert!(obs.liveness.acknowledge(10_001, 10_100));
        assert_eq!(run(&obs, 20_001).probed, 0);
        assert_eq!(run(&obs, 20_002).probed, 1);
        assert!(obs.liveness.acknowledge(20_002, 20_010));
        assert_eq!(run(&obs, 31_000), SweepReport::default());
        assert!(obs.reason.lock().is_none());
    }
}

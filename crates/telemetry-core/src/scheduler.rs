//! Broadcast Scheduler: ticks at a fixed cadence, takes one registry
//! snapshot per tick, and fans a filtered, encoded payload out to every
//! subscriber through the broker.
//!
//! Cadence is enforced with [`MissedTickBehavior::Skip`] — a slow tick
//! never queues a burst of catch-up ticks; the next tick just lands at the
//! next scheduled instant. A tick that overruns its period is logged, not
//! retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::broker::SubscriptionBroker;
use crate::registry::MetricRegistry;
use crate::snapshot::{build_snapshot, encode};

/// Default broadcast cadence, matching the ~60Hz dashboard refresh target.
pub const DEFAULT_TICK_HZ: u32 = 60;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub tick_hz: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_hz: DEFAULT_TICK_HZ }
    }
}

impl SchedulerConfig {
    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }
}

/// Drives fixed-cadence broadcast of registry snapshots to subscribers.
pub struct BroadcastScheduler {
    registry: Arc<MetricRegistry>,
    broker: Arc<SubscriptionBroker<Arc<str>>>,
    config: SchedulerConfig,
}

impl BroadcastScheduler {
    pub fn new(
        registry: Arc<MetricRegistry>,
        broker: Arc<SubscriptionBroker<Arc<str>>>,
        config: SchedulerConfig,
    ) -> Self {
        Self { registry, broker, config }
    }

    /// Runs the broadcast loop until `shutdown` fires, then returns.
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!("broadcast scheduler shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.broadcast_once();
                }
            }
        }
    }

    /// Performs exactly one broadcast pass: one registry snapshot, one
    /// encoding of the unfiltered payload (reused for every empty-filter
    /// subscriber), and a per-subscriber encoding only for those with a
    /// non-empty filter.
    pub fn broadcast_once(&self) {
        let latest = self.registry.latest_snapshot();
        let timestamp_ns = now_ns();

        let full = build_snapshot(&latest, &[], timestamp_ns);
        let full_encoded = match encode(&full) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode full snapshot; skipping tick");
                return;
            }
        };

        let stats = self.broker.broadcast(|filter| {
            if filter.is_empty() {
                Arc::clone(&full_encoded)
            } else {
                let filtered = build_snapshot(&latest, filter, timestamp_ns);
                encode(&filtered).unwrap_or_else(|_| Arc::clone(&full_encoded))
            }
        });

        debug!(
            subscribers = stats.subscribers,
            offered = stats.offered,
            dropped = stats.dropped,
            "broadcast tick complete"
        );
    }
}

/// Monotonic-ish wall clock reading for outbound timestamps. Broadcast
/// cadence correctness relies on `tokio::time`, not on this value.
fn now_ns() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use crate::registry::RegistryConfig;
    use crate::types::MetricKey;
    use std::time::Duration;

    #[tokio::test]
    async fn broadcast_once_delivers_current_gauge_value_to_an_unfiltered_subscriber() {
        let registry = Arc::new(MetricRegistry::new(RegistryConfig::default()));
        let broker: Arc<SubscriptionBroker<Arc<str>>> =
            Arc::new(SubscriptionBroker::new(BrokerConfig::default()));
        let key = MetricKey::new("s1", "g");
        registry
            .get_or_create(crate::types::MetricVariant::Gauge, key.clone())
            .unwrap()
            .as_scalar()
            .unwrap()
            .push(1, 7.0);

        let (_id, mut rx) = broker.register(Vec::new()).unwrap();
        let scheduler = BroadcastScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&broker),
            SchedulerConfig::default(),
        );
        scheduler.broadcast_once();

        let payload = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["gauges"]["s1/g"]["val"], 7.0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_promptly_when_shutdown_fires() {
        let registry = Arc::new(MetricRegistry::new(RegistryConfig::default()));
        let broker: Arc<SubscriptionBroker<Arc<str>>> =
            Arc::new(SubscriptionBroker::new(BrokerConfig::default()));
        let scheduler = BroadcastScheduler::new(registry, broker, SchedulerConfig { tick_hz: 60 });

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler task did not exit promptly")
            .unwrap();
    }
}

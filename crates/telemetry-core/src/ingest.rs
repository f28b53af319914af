//! Ingest Router: translates an authenticated, deserialized
//! [`TelemetryBatch`] into writes against the [`MetricRegistry`] and hints
//! the Broadcast Scheduler that a service has new data.
//!
//! A single malformed sample never aborts a batch: variant conflicts and
//! histogram bound mismatches are counted and the router moves on to the
//! next sample, matching the propagation policy that recoverable ingest
//! problems are metrics, not errors returned to the caller.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::registry::MetricRegistry;
use crate::types::{IngestValue, MetricKey, MetricVariant, TelemetryBatch};

/// Default capacity of the update-hint channel the router writes to after
/// each batch.
pub const DEFAULT_HINT_CHANNEL_CAPACITY: usize = 1024;

/// Per-batch outcome counters. Never an `Err` — a batch always completes,
/// these are the shape of its recoverable-problem metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub samples_accepted: u64,
    pub variant_conflicts: u64,
    pub histogram_shape_conflicts: u64,
}

impl BatchOutcome {
    fn merge(&mut self, other: BatchOutcome) {
        self.samples_accepted += other.samples_accepted;
        self.variant_conflicts += other.variant_conflicts;
        self.histogram_shape_conflicts += other.histogram_shape_conflicts;
    }
}

/// Routes deserialized batches into the registry and signals the scheduler.
pub struct IngestRouter {
    registry: Arc<MetricRegistry>,
    update_hint_tx: mpsc::Sender<String>,
}

impl IngestRouter {
    /// Builds a router over `registry`. Returns the router plus the
    /// receiving half of the update-hint channel, which the scheduler may
    /// optionally drain between ticks (this revision does not require it
    /// to accelerate a tick).
    pub fn new(registry: Arc<MetricRegistry>) -> (Self, mpsc::Receiver<String>) {
        Self::with_hint_capacity(registry, DEFAULT_HINT_CHANNEL_CAPACITY)
    }

    pub fn with_hint_capacity(
        registry: Arc<MetricRegistry>,
        hint_capacity: usize,
    ) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(hint_capacity);
        (
            Self {
                registry,
                update_hint_tx: tx,
            },
            rx,
        )
    }

    /// Processes one batch end to end: every sample is routed to its
    /// metric's bounded history, malformed samples are counted rather than
    /// raised, and a single non-blocking update hint is emitted for the
    /// batch's service once all samples have been processed.
    pub fn process_batch(&self, batch: &TelemetryBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for metric in &batch.metrics {
            let key = MetricKey::new(batch.service.clone(), metric.name.clone());
            for sample in &metric.samples {
                outcome.merge(self.route_sample(&key, sample.timestamp_ns as i64, &sample.value));
            }
        }

        // Non-blocking hint; dropped silently if the scheduler hasn't kept
        // up draining it, per the router's "it only hints" contract.
        let _ = self.update_hint_tx.try_send(batch.service.clone());

        outcome
    }

    fn route_sample(&self, key: &MetricKey, timestamp_ns: i64, value: &IngestValue) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        match value {
            IngestValue::Gauge(v) => {
                match self.registry.get_or_create(MetricVariant::Gauge, key.clone()) {
                    Ok(handle) => {
                        handle.as_scalar().expect("gauge handle is scalar").push(timestamp_ns, *v);
                        outcome.samples_accepted += 1;
                    }
                    Err(err) => {
                        warn!(metric = %key, error = %err, "dropping gauge sample: variant conflict");
                        outcome.variant_conflicts += 1;
                    }
                }
            }
            IngestValue::Counter(v) => {
                match self.registry.get_or_create(MetricVariant::Counter, key.clone()) {
                    Ok(handle) => {
                        handle
                            .as_scalar()
                            .expect("counter handle is scalar")
                            .push(timestamp_ns, *v as f64);
                        outcome.samples_accepted += 1;
                    }
                    Err(err) => {
                        warn!(metric = %key, error = %err, "dropping counter sample: variant conflict");
                        outcome.variant_conflicts += 1;
                    }
                }
            }
            IngestValue::Histogram { bounds, counts } => {
                match self.registry.get_or_create(MetricVariant::Histogram, key.clone()) {
                    Ok(handle) => {
                        let ring = handle.as_histogram().expect("histogram handle is histogram");
                        match ring.push(timestamp_ns, bounds, counts) {
                            Ok(()) => outcome.samples_accepted += 1,
                            Err(err) => {
                                warn!(metric = %key, error = %err, "dropping histogram sample: bounds mismatch");
                                outcome.histogram_shape_conflicts += 1;
                            }
                        }
                    }
                    Err(err) => {
                        warn!(metric = %key, error = %err, "dropping histogram sample: variant conflict");
                        outcome.variant_conflicts += 1;
                    }
                }
            }
        }

        outcome
    }
}

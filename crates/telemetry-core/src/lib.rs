//! Core of the real-time telemetry aggregator: bounded-history storage,
//! the metric registry, ingest routing, subscription management, and the
//! fixed-cadence broadcast scheduler.
//!
//! This crate has no network or process-lifecycle surface of its own —
//! transports, authentication, and the scrape exporter live upstream. It
//! owns the in-memory pipeline from an already-deserialized
//! [`types::TelemetryBatch`] through to an encoded snapshot ready to hand
//! to a subscriber's mailbox.

pub mod bhs;
pub mod broker;
pub mod control;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod scheduler;
pub mod snapshot;
pub mod types;

pub use bhs::{HistogramRing, ScalarRing};
pub use broker::{
    run_read_pump, run_write_pump, BrokerConfig, OfferOutcome, PumpConfig, SubscriberId,
    SubscriptionBroker,
};
pub use control::parse_subscribe;
pub use error::{BhsError, BrokerError, Error, RegistryError};
pub use ingest::{BatchOutcome, IngestRouter};
pub use registry::{MetricHandle, MetricRegistry, RegistryConfig};
pub use scheduler::{BroadcastScheduler, SchedulerConfig};
pub use snapshot::{build_snapshot, encode, OutboundHistogram, OutboundScalar, OutboundSnapshot};
pub use types::{
    HistogramSample, IngestMetric, IngestSample, IngestValue, LatestSnapshot, MetricKey,
    MetricVariant, Sample, TelemetryBatch,
};

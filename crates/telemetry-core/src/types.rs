//! Shared data model: metric identity, typed samples, and the wire-shaped
//! ingest batch that the router consumes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The kind of a metric: gauge (point-in-time float), counter (point-in-time
/// total, widened to f64 for uniform storage), or histogram (bucketed
/// distribution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricVariant {
    Gauge,
    Counter,
    Histogram,
}

impl fmt::Display for MetricVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricVariant::Gauge => write!(f, "gauge"),
            MetricVariant::Counter => write!(f, "counter"),
            MetricVariant::Histogram => write!(f, "histogram"),
        }
    }
}

/// The (service, name) identity of a metric. Equality and hashing are
/// componentwise; insertion order across a registry is never observable.
///
/// Not `Serialize`/`Deserialize`: it is only ever used as a `HashMap` key or
/// converted to its `canonical()` string form before hitting the wire, and
/// `serde_json` cannot encode a non-string map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub service: String,
    pub name: String,
}

impl MetricKey {
    pub fn new(service: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
        }
    }

    /// Canonical `"<service>/<metric>"` string form used as the JSON object
    /// key in outbound snapshots.
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.service, self.name)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.name)
    }
}

/// One timestamped scalar observation (gauge value or counter total).
///
/// Invariant: a stored `Sample` is always fully written — the bounded
/// history store never exposes a partially-written entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_ns: i64,
    pub value: f64,
}

/// One timestamped histogram observation. `bounds` is shared (`Arc<[f64]>`)
/// because it is pinned at first write and reused by every later sample of
/// the same metric, so cloning a sample never reallocates the bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSample {
    pub timestamp_ns: i64,
    pub bounds: Arc<[f64]>,
    pub counts: Arc<[u64]>,
}

/// A point-in-time mapping from metric identity to its most recent sample,
/// split by variant. Ordering of entries is never observable.
///
/// This is the Rust-side read API (`MetricRegistry::latest_snapshot`), not
/// a wire type — it is keyed by [`MetricKey`], which isn't itself string-keyed
/// JSON. Encoding to the external snapshot format goes through
/// [`crate::snapshot::build_snapshot`], which re-keys by `canonical()` string.
#[derive(Debug, Clone, Default)]
pub struct LatestSnapshot {
    pub gauges: HashMap<MetricKey, Sample>,
    pub counters: HashMap<MetricKey, Sample>,
    pub histograms: HashMap<MetricKey, HistogramSample>,
}

impl LatestSnapshot {
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty() && self.histograms.is_empty()
    }
}

/// A bounded window of recent samples per metric, split by variant.
#[derive(Debug, Clone, Default)]
pub struct BoundedSnapshot {
    pub gauges: HashMap<MetricKey, Vec<Sample>>,
    pub counters: HashMap<MetricKey, Vec<Sample>>,
    pub histograms: HashMap<MetricKey, Vec<HistogramSample>>,
}

// ---------------------------------------------------------------------------
// Ingest wire shapes (§6 "Ingest contract"). These model the already-
// deserialized batch the core receives; framing and authentication happen
// upstream of the router.
// ---------------------------------------------------------------------------

/// The tagged sample value carried on the wire.
///
/// Not `Serialize`/`Deserialize`: an internally-tagged enum (`#[serde(tag =
/// "kind")]`) cannot represent a newtype variant wrapping a primitive —
/// `serde_json` errors at runtime on both `Gauge`/`Counter` ("cannot
/// serialize tagged newtype variant ... containing an f64"). Framing and
/// deserialization of the wire batch happen upstream of this crate (§1
/// Non-goals); nothing here ever serializes an `IngestValue`, so the derive
/// would be dead weight that is also broken, same reasoning as dropping it
/// from `MetricKey` above.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestValue {
    Gauge(f64),
    Counter(u64),
    Histogram { bounds: Vec<f64>, counts: Vec<u64> },
}

impl IngestValue {
    pub fn variant(&self) -> MetricVariant {
        match self {
            IngestValue::Gauge(_) => MetricVariant::Gauge,
            IngestValue::Counter(_) => MetricVariant::Counter,
            IngestValue::Histogram { .. } => MetricVariant::Histogram,
        }
    }
}

/// One sample within a `Metric`, as received from the transport.
///
/// `timestamp_ns` is unsigned on the wire (per the external interface) and
/// narrowed to the signed internal `Sample::timestamp_ns` on ingest; epoch
/// nanosecond values fit comfortably until the year 2262.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSample {
    pub timestamp_ns: u64,
    pub value: IngestValue,
}

/// One named metric within a batch, with its (currently unstored) labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestMetric {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub samples: Vec<IngestSample>,
}

/// A batch of metrics submitted by one (service, instance) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryBatch {
    pub service: String,
    pub instance: String,
    pub metrics: Vec<IngestMetric>,
}

//! Outbound snapshot encoding: turns a [`LatestSnapshot`] plus a
//! subscriber's filter into the JSON payload shipped to dashboards.
//!
//! `HashMap` keys here are strings (the metric's canonical
//! `"service/metric"` form), not [`MetricKey`] structs, because
//! `serde_json` can only serialize object keys that are strings.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::types::{HistogramSample, LatestSnapshot, MetricKey, Sample};

/// Wire shape of one broadcast message. Field names here are the literal
/// external contract (§6): `type`/`timestamp` at the top level, `{ts, val}`
/// per scalar entry, `{ts, bounds, counts}` per histogram entry.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundSnapshot {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: i64,
    pub gauges: HashMap<String, OutboundScalar>,
    pub counters: HashMap<String, OutboundScalar>,
    pub histograms: HashMap<String, OutboundHistogram>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct OutboundScalar {
    pub ts: i64,
    pub val: f64,
}

impl From<&Sample> for OutboundScalar {
    fn from(sample: &Sample) -> Self {
        Self { ts: sample.timestamp_ns, val: sample.value }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundHistogram {
    pub ts: i64,
    pub bounds: Arc<[f64]>,
    pub counts: Arc<[u64]>,
}

impl From<&HistogramSample> for OutboundHistogram {
    fn from(sample: &HistogramSample) -> Self {
        Self {
            ts: sample.timestamp_ns,
            bounds: Arc::clone(&sample.bounds),
            counts: Arc::clone(&sample.counts),
        }
    }
}

/// Builds the outbound snapshot for one subscriber. An empty `filter`
/// means "all known metrics"; otherwise only keys present in `filter` are
/// included, in constant time per filter entry rather than scanning every
/// known metric.
pub fn build_snapshot(
    latest: &LatestSnapshot,
    filter: &[MetricKey],
    timestamp_ns: i64,
) -> OutboundSnapshot {
    let mut out = OutboundSnapshot {
        kind: "snapshot",
        timestamp: timestamp_ns,
        gauges: HashMap::new(),
        counters: HashMap::new(),
        histograms: HashMap::new(),
    };

    if filter.is_empty() {
        for (key, sample) in &latest.gauges {
            out.gauges.insert(key.canonical(), sample.into());
        }
        for (key, sample) in &latest.counters {
            out.counters.insert(key.canonical(), sample.into());
        }
        for (key, sample) in &latest.histograms {
            out.histograms.insert(key.canonical(), sample.into());
        }
        return out;
    }

    for key in filter {
        if let Some(sample) = latest.gauges.get(key) {
            out.gauges.insert(key.canonical(), sample.into());
        }
        if let Some(sample) = latest.counters.get(key) {
            out.counters.insert(key.canonical(), sample.into());
        }
        if let Some(sample) = latest.histograms.get(key) {
            out.histograms.insert(key.canonical(), sample.into());
        }
    }

    out
}

/// Encodes a snapshot to a shareable, immutably-owned JSON string. Callers
/// that need the same encoding for many subscribers (the empty-filter
/// case) should call this once and clone the cheap `Arc<str>` handle
/// rather than re-serializing per subscriber.
pub fn encode(snapshot: &OutboundSnapshot) -> Result<Arc<str>, serde_json::Error> {
    serde_json::to_string(snapshot).map(Arc::from)
}

//! Metric Registry: a single directory from [`MetricKey`] to a typed bounded
//! history store, with O(1) expected access and safe concurrent lazy
//! creation.
//!
//! Three maps — one per variant — live behind one readers-writer lock.
//! Lookups take the read side; creation takes the write side after a
//! double-checked read, so the common case (metric already exists) never
//! contends on the write lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bhs::{HistogramRing, ScalarRing, DEFAULT_HISTOGRAM_CAPACITY, DEFAULT_SCALAR_CAPACITY};
use crate::error::RegistryError;
use crate::types::{BoundedSnapshot, LatestSnapshot, MetricKey, MetricVariant};

/// A handle to the bounded-history store backing one metric. Cheap to
/// clone (an `Arc` underneath); holders can push/read without going back
/// through the registry.
#[derive(Clone)]
pub enum MetricHandle {
    Scalar(Arc<ScalarRing>),
    Histogram(Arc<HistogramRing>),
}

impl MetricHandle {
    pub fn as_scalar(&self) -> Option<&Arc<ScalarRing>> {
        match self {
            MetricHandle::Scalar(ring) => Some(ring),
            MetricHandle::Histogram(_) => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&Arc<HistogramRing>> {
        match self {
            MetricHandle::Histogram(ring) => Some(ring),
            MetricHandle::Scalar(_) => None,
        }
    }
}

/// Capacities used when a new metric's bounded history is created.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    pub scalar_capacity: usize,
    pub histogram_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            scalar_capacity: DEFAULT_SCALAR_CAPACITY,
            histogram_capacity: DEFAULT_HISTOGRAM_CAPACITY,
        }
    }
}

#[derive(Default)]
struct RegistryMaps {
    gauges: HashMap<MetricKey, Arc<ScalarRing>>,
    counters: HashMap<MetricKey, Arc<ScalarRing>>,
    histograms: HashMap<MetricKey, Arc<HistogramRing>>,
}

impl RegistryMaps {
    /// Returns the variant currently bound to `key`, if any, by checking
    /// whichever of the three maps actually holds it.
    fn bound_variant(&self, key: &MetricKey) -> Option<MetricVariant> {
        if self.gauges.contains_key(key) {
            Some(MetricVariant::Gauge)
        } else if self.counters.contains_key(key) {
            Some(MetricVariant::Counter)
        } else if self.histograms.contains_key(key) {
            Some(MetricVariant::Histogram)
        } else {
            None
        }
    }
}

/// The lazy, thread-safe directory from metric identity to bounded
/// history.
pub struct MetricRegistry {
    maps: RwLock<RegistryMaps>,
    config: RegistryConfig,
}

impl MetricRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            maps: RwLock::new(RegistryMaps::default()),
            config,
        }
    }

    /// Returns the bounded-history store for `(variant, key)`, creating it
    /// on first use. Concurrent creators of the same `(variant, key)` all
    /// observe the same instance; a request for a key already bound to a
    /// different variant is rejected without mutating the map.
    pub fn get_or_create(
        &self,
        variant: MetricVariant,
        key: MetricKey,
    ) -> Result<MetricHandle, RegistryError> {
        // Fast path: read lock, metric already exists.
        {
            let maps = self.maps.read();
            if let Some(handle) = Self::lookup(&maps, variant, &key) {
                return Ok(handle);
            }
            if let Some(existing) = maps.bound_variant(&key) {
                if existing != variant {
                    return Err(RegistryError::VariantConflict {
                        key,
                        existing,
                        requested: variant,
                    });
                }
            }
        }

        // Slow path: write lock, double-checked creation.
        let mut maps = self.maps.write();
        if let Some(handle) = Self::lookup(&maps, variant, &key) {
            return Ok(handle);
        }
        if let Some(existing) = maps.bound_variant(&key) {
            if existing != variant {
                return Err(RegistryError::VariantConflict {
                    key,
                    existing,
                    requested: variant,
                });
            }
        }

        Ok(match variant {
            MetricVariant::Gauge => {
                let ring = Arc::new(ScalarRing::new(self.config.scalar_capacity));
                maps.gauges.insert(key, Arc::clone(&ring));
                MetricHandle::Scalar(ring)
            }
            MetricVariant::Counter => {
                let ring = Arc::new(ScalarRing::new(self.config.scalar_capacity));
                maps.counters.insert(key, Arc::clone(&ring));
                MetricHandle::Scalar(ring)
            }
            MetricVariant::Histogram => {
                let ring = Arc::new(HistogramRing::new(self.config.histogram_capacity));
                maps.histograms.insert(key, Arc::clone(&ring));
                MetricHandle::Histogram(ring)
            }
        })
    }

    fn lookup(maps: &RegistryMaps, variant: MetricVariant, key: &MetricKey) -> Option<MetricHandle> {
        match variant {
            MetricVariant::Gauge => maps.gauges.get(key).cloned().map(MetricHandle::Scalar),
            MetricVariant::Counter => maps.counters.get(key).cloned().map(MetricHandle::Scalar),
            MetricVariant::Histogram => {
                maps.histograms.get(key).cloned().map(MetricHandle::Histogram)
            }
        }
    }

    /// An atomically-at-read snapshot of every currently-known metric's
    /// latest value. Metrics are not synchronized relative to one another;
    /// a metric created concurrently with this call may or may not appear.
    pub fn latest_snapshot(&self) -> LatestSnapshot {
        let maps = self.maps.read();
        let mut out = LatestSnapshot::default();

        for (key, ring) in &maps.gauges {
            if let Some(sample) = ring.latest() {
                out.gauges.insert(key.clone(), sample);
            }
        }
        for (key, ring) in &maps.counters {
            if let Some(sample) = ring.latest() {
                out.counters.insert(key.clone(), sample);
            }
        }
        for (key, ring) in &maps.histograms {
            if let Some(sample) = ring.latest() {
                out.histograms.insert(key.clone(), sample);
            }
        }
        out
    }

    /// Like [`Self::latest_snapshot`] but returns up to `n_per_metric`
    /// recent samples per metric instead of just the latest one.
    pub fn bounded_snapshot(&self, n_per_metric: usize) -> BoundedSnapshot {
        let maps = self.maps.read();
        let mut out = BoundedSnapshot::default();

        for (key, ring) in &maps.gauges {
            out.gauges.insert(key.clone(), ring.snapshot_window(n_per_metric));
        }
        for (key, ring) in &maps.counters {
            out.counters.insert(key.clone(), ring.snapshot_window(n_per_metric));
        }
        for (key, ring) in &maps.histograms {
            out.histograms.insert(key.clone(), ring.snapshot_window(n_per_metric));
        }
        out
    }

    /// Enumerates the distinct services with at least one known metric.
    /// Ordering is unspecified.
    pub fn list_services(&self) -> Vec<String> {
        let maps = self.maps.read();
        let mut services: Vec<String> = maps
            .gauges
            .keys()
            .chain(maps.counters.keys())
            .chain(maps.histograms.keys())
            .map(|k| k.service.clone())
            .collect();
        services.sort_unstable();
        services.dedup();
        services
    }

    /// Enumerates metric names known for `service`. Ordering is
    /// unspecified.
    pub fn list_metrics(&self, service: &str) -> Vec<String> {
        let maps = self.maps.read();
        let mut names: Vec<String> = maps
            .gauges
            .keys()
            .chain(maps.counters.keys())
            .chain(maps.histograms.keys())
            .filter(|k| k.service == service)
            .map(|k| k.name.clone())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let registry = MetricRegistry::default();
        let key = MetricKey::new("s1", "g");
        let a = registry.get_or_create(MetricVariant::Gauge, key.clone()).unwrap();
        let b = registry.get_or_create(MetricVariant::Gauge, key).unwrap();
        assert!(Arc::ptr_eq(a.as_scalar().unwrap(), b.as_scalar().unwrap()));
    }

    #[test]
    fn variant_conflict_does_not_mutate_existing_history() {
        let registry = MetricRegistry::default();
        let key = MetricKey::new("s1", "x");

        let gauge = registry
            .get_or_create(MetricVariant::Gauge, key.clone())
            .unwrap();
        gauge.as_scalar().unwrap().push(1, 1.0);

        let err = registry
            .get_or_create(MetricVariant::Counter, key.clone())
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::VariantConflict {
                key: key.clone(),
                existing: MetricVariant::Gauge,
                requested: MetricVariant::Counter,
            }
        );

        let snapshot = registry.latest_snapshot();
        assert_eq!(snapshot.gauges.get(&key).unwrap().value, 1.0);
        assert!(!snapshot.counters.contains_key(&key));
    }

    #[test]
    fn latest_snapshot_reflects_single_gauge_push() {
        let registry = MetricRegistry::default();
        let key = MetricKey::new("s1", "g");
        let handle = registry.get_or_create(MetricVariant::Gauge, key.clone()).unwrap();
        handle.as_scalar().unwrap().push(1000, 3.14);

        let snapshot = registry.latest_snapshot();
        let sample = snapshot.gauges.get(&key).unwrap();
        assert_eq!(sample.timestamp_ns, 1000);
        assert_eq!(sample.value, 3.14);
    }

    #[test]
    fn concurrent_creators_converge_on_one_instance() {
        use std::thread;
        let registry = Arc::new(MetricRegistry::default());
        let key = MetricKey::new("s1", "g");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let key = key.clone();
                thread::spawn(move || registry.get_or_create(MetricVariant::Gauge, key).unwrap())
            })
            .collect();

        let rings: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().as_scalar().unwrap().clone())
            .collect();

        for ring in &rings[1..] {
            assert!(Arc::ptr_eq(&rings[0], ring));
        }
    }

    #[test]
    fn bounded_snapshot_returns_up_to_n_recent_samples_per_metric() {
        let registry = MetricRegistry::default();
        let key = MetricKey::new("s1", "g");
        let handle = registry.get_or_create(MetricVariant::Gauge, key.clone()).unwrap();
        let ring = handle.as_scalar().unwrap();
        for i in 0..5 {
            ring.push(i, i as f64);
        }

        let bounded = registry.bounded_snapshot(2);
        let window = bounded.gauges.get(&key).unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window.last().unwrap().timestamp_ns, 4);
    }

    #[test]
    fn list_services_and_metrics_enumerate_known_identities() {
        let registry = MetricRegistry::default();
        registry
            .get_or_create(MetricVariant::Gauge, MetricKey::new("s1", "a"))
            .unwrap();
        registry
            .get_or_create(MetricVariant::Counter, MetricKey::new("s1", "b"))
            .unwrap();
        registry
            .get_or_create(MetricVariant::Histogram, MetricKey::new("s2", "h"))
            .unwrap();

        assert_eq!(registry.list_services(), vec!["s1", "s2"]);
        assert_eq!(registry.list_metrics("s1"), vec!["a", "b"]);
        assert_eq!(registry.list_metrics("s2"), vec!["h"]);
    }
}

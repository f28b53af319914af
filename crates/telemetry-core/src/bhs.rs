//! Bounded-History Store (BHS): a fixed-capacity circular history of typed
//! samples for one metric, with single-writer-discipline-free multi-writer
//! pushes and torn-read-free multi-reader snapshots.
//!
//! Two concrete shapes exist, matching the two storage strategies the design
//! calls for:
//!
//! - [`ScalarRing`] holds gauge/counter samples (fixed 16-byte payload) on a
//!   lock-free fast path: a shared atomic reservation counter hands each
//!   writer a slot, and each slot is itself a tiny seqlock so concurrent
//!   readers never observe a torn write even while a slot is mid-overwrite.
//! - [`HistogramRing`] holds variable-shaped histogram samples behind a
//!   short mutex-guarded region, as the design explicitly allows for the
//!   variable-length variant.
//!
//! ## Memory ordering
//!
//! `ScalarRing` picks the seqlock strategy the design calls out as one of
//! two valid options: every slot carries its own `version` counter (even =
//! stable, odd = being written) plus the logical write sequence number that
//! produced its current contents. A writer reserves a sequence number with
//! `Ordering::Relaxed` fetch-add (reservation order doesn't need to
//! synchronize anything by itself), then brackets its write with
//! `Acquire`/`Release` bumps of the slot's version so a reader's paired
//! version loads act as the synchronization edge. A reader that sees a
//! torn or stale slot (version changed mid-read, or the slot's logical
//! sequence number doesn't match what it expected) discards that sample
//! silently — this is the "overwrite of the oldest slot is silent and by
//! design" failure semantics. The same mismatch path also covers a slot
//! that has been reserved (the writer's `fetch_add` has run) but not yet
//! written: each slot's sequence number starts at a `u64::MAX` sentinel
//! that no real push can ever produce, so a reader racing a slot's very
//! first write sees a mismatch and discards rather than observing the
//! slot's zeroed initial contents as a phantom sample.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::error::BhsError;
use crate::types::{HistogramSample, Sample};

/// Default scalar history capacity: ~10s of history at 100Hz.
pub const DEFAULT_SCALAR_CAPACITY: usize = 1000;
/// Default histogram history capacity.
pub const DEFAULT_HISTOGRAM_CAPACITY: usize = 500;

/// Maximum number of retries a reader makes against one slot before giving
/// up and treating it as transiently unreadable. Bounded so a reader can
/// never spin indefinitely against a pathologically unlucky interleaving.
const MAX_READ_RETRIES: u32 = 64;

/// One seqlock-guarded slot: a timestamp/value pair plus the logical
/// sequence number that produced its current contents.
struct Slot {
    version: AtomicU64,
    seq: UnsafeCell<u64>,
    timestamp_ns: UnsafeCell<i64>,
    value_bits: UnsafeCell<u64>,
}

// SAFETY: all mutation of the UnsafeCell fields happens only inside the
// version-bracketed write in `Slot::write`; readers only ever read through
// the seqlock protocol below. Two writers racing on the same slot (see
// `Slot::write`'s doc) is a bounded, accepted risk, not a soundness hole
// this impl papers over differently than the rest of the type already does.
unsafe impl Sync for Slot {}

impl Slot {
    fn new() -> Self {
        Self {
            version: AtomicU64::new(0),
            // `u64::MAX` is a sentinel no real push sequence number can ever
            // reach, so an unwritten slot can never match an `expected_seq`
            // of `0` (or anything else) before its first real write. Without
            // this, a reader racing the *first* push to this slot would see
            // `version` still even (looks stable) and `seq == 0`, matching
            // `expected_seq == 0` for that slot's very first reservation,
            // and hand back a phantom `Sample { timestamp_ns: 0, value: 0.0
            // }` that was never pushed — `ScalarRing::push` bumps `written`
            // before the slot write lands, so `latest()`/`snapshot_window`
            // can observe the reservation before the write starts.
            seq: UnsafeCell::new(u64::MAX),
            timestamp_ns: UnsafeCell::new(0),
            value_bits: UnsafeCell::new(0),
        }
    }

    /// Writes `(seq, timestamp_ns, value)` into the slot, bracketed by a
    /// seqlock version bump so concurrent readers can detect tearing.
    ///
    /// Slot reservation is a single shared `fetch_add` (see
    /// `ScalarRing::push`), so two writers only target the same slot when
    /// their sequence numbers are `capacity` apart. A writer stalled for
    /// longer than `capacity` other pushes could in principle still be here
    /// when the later writer's reservation lands on the same index, racing
    /// this call's unsynchronized field stores below. That's a bounded,
    /// accepted risk rather than one this method guards against: catching it
    /// would need a per-slot lock, which defeats the wait-free write path the
    /// design calls for. A reader that loses this race sees a torn or
    /// mismatched-sequence slot and drops the sample, same as any other
    /// overwrite-in-flight read.
    fn write(&self, seq: u64, timestamp_ns: i64, value: f64) {
        self.version.fetch_add(1, Ordering::AcqRel);

        // SAFETY: version is now odd; readers that observe an odd version
        // retry instead of reading these cells.
        unsafe {
            *self.seq.get() = seq;
            *self.timestamp_ns.get() = timestamp_ns;
            *self.value_bits.get() = value.to_bits();
        }

        self.version.fetch_add(1, Ordering::Release);
    }

    /// Attempts to read a stable `(timestamp_ns, value)` pair that was
    /// written for logical sequence number `expected_seq`. Returns `None`
    /// if the slot is mid-write past the retry budget, or if it now holds a
    /// different sequence number (overwritten or not yet populated).
    fn read(&self, expected_seq: u64) -> Option<(i64, f64)> {
        for _ in 0..MAX_READ_RETRIES {
            let before = self.version.load(Ordering::Acquire);
            if before % 2 != 0 {
                std::hint::spin_loop();
                continue;
            }

            // SAFETY: version was even at `before`; if it's still the same
            // even value after reading, no write interleaved with this read.
            let (seq, ts, bits) = unsafe {
                (*self.seq.get(), *self.timestamp_ns.get(), *self.value_bits.get())
            };

            let after = self.version.load(Ordering::Acquire);
            if before != after {
                continue;
            }

            if seq != expected_seq {
                return None;
            }
            return Some((ts, f64::from_bits(bits)));
        }
        None
    }
}

/// Lock-free bounded history for scalar (gauge/counter) samples.
pub struct ScalarRing {
    capacity: u64,
    written: CachePadded<AtomicU64>,
    slots: Box<[Slot]>,
}

impl ScalarRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BHS capacity must be nonzero");
        let slots = (0..capacity).map(|_| Slot::new()).collect::<Vec<_>>().into_boxed_slice();
        Self {
            capacity: capacity as u64,
            written: CachePadded::new(AtomicU64::new(0)),
            slots,
        }
    }

    /// Appends one sample. Wait-free: a single fetch-add reserves a slot,
    /// then the write proceeds without contending with other writers.
    pub fn push(&self, timestamp_ns: i64, value: f64) {
        let seq = self.written.fetch_add(1, Ordering::Relaxed);
        let idx = (seq % self.capacity) as usize;
        self.slots[idx].write(seq, timestamp_ns, value);
    }

    /// Total number of pushes ever reserved (monotonic, never decreases).
    pub fn count(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Current valid length: `min(count(), capacity)`.
    pub fn len(&self) -> usize {
        self.count().min(self.capacity) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Returns the most recent sample, or `None` if nothing has been
    /// pushed yet (or the most recent push is transiently unreadable).
    pub fn latest(&self) -> Option<Sample> {
        let w = self.written.load(Ordering::Acquire);
        if w == 0 {
            return None;
        }
        let last_seq = w - 1;
        let idx = (last_seq % self.capacity) as usize;
        self.slots[idx]
            .read(last_seq)
            .map(|(timestamp_ns, value)| Sample { timestamp_ns, value })
    }

    /// Returns up to `min(n, capacity, count())` most recent samples,
    /// oldest first. Samples overwritten or still in flight during the
    /// read are silently dropped from the result rather than torn.
    pub fn snapshot_window(&self, n: usize) -> Vec<Sample> {
        let w = self.written.load(Ordering::Acquire);
        let len = w.min(self.capacity);
        let take = (n as u64).min(len);
        let from = w - take;

        let mut out = Vec::with_capacity(take as usize);
        for seq in from..w {
            let idx = (seq % self.capacity) as usize;
            if let Some((timestamp_ns, value)) = self.slots[idx].read(seq) {
                out.push(Sample { timestamp_ns, value });
            }
        }
        out
    }
}

/// One histogram entry stored in the bucket-guarded history.
struct HistogramEntry {
    timestamp_ns: i64,
    counts: Arc<[u64]>,
}

struct HistogramInner {
    bounds: Option<Arc<[f64]>>,
    history: VecDeque<HistogramEntry>,
    pushed: u64,
}

/// Mutex-guarded bounded history for histogram samples.
///
/// Histogram payloads are variable-length (though bucket bounds are pinned
/// at first write and shared across samples), so the lock-free scalar
/// strategy doesn't apply cleanly; a short critical section around the
/// slot update is the design's explicitly sanctioned alternative.
pub struct HistogramRing {
    capacity: usize,
    inner: Mutex<HistogramInner>,
}

impl HistogramRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BHS capacity must be nonzero");
        Self {
            capacity,
            inner: Mutex::new(HistogramInner {
                bounds: None,
                history: VecDeque::with_capacity(capacity),
                pushed: 0,
            }),
        }
    }

    /// Appends one histogram sample. The first push pins `bounds` for this
    /// metric; later pushes with a different bucket count are rejected as
    /// [`BhsError::BoundsMismatch`] and do not mutate the history — the
    /// implementation's resolution of the open question on whether bounds
    /// must match across pushes (see DESIGN.md). `counts` must carry exactly
    /// one entry per bound (the last bound is the overflow edge); a
    /// mismatched shape is rejected as [`BhsError::ShapeMismatch`] before
    /// bounds are even checked or pinned.
    pub fn push(&self, timestamp_ns: i64, bounds: &[f64], counts: &[u64]) -> Result<(), BhsError> {
        if counts.len() != bounds.len() {
            return Err(BhsError::ShapeMismatch {
                bounds: bounds.len(),
                counts: counts.len(),
            });
        }

        let mut inner = self.inner.lock();

        match &inner.bounds {
            None => inner.bounds = Some(Arc::from(bounds)),
            Some(pinned) => {
                if pinned.len() != bounds.len() || pinned.as_ref() != bounds {
                    return Err(BhsError::BoundsMismatch {
                        pinned: pinned.len(),
                        found: bounds.len(),
                    });
                }
            }
        }

        if inner.history.len() == self.capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(HistogramEntry {
            timestamp_ns,
            counts: Arc::from(counts),
        });
        inner.pushed += 1;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().pushed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest(&self) -> Option<HistogramSample> {
        let inner = self.inner.lock();
        let bounds = inner.bounds.clone()?;
        inner.history.back().map(|entry| HistogramSample {
            timestamp_ns: entry.timestamp_ns,
            bounds,
            counts: entry.counts.clone(),
        })
    }

    pub fn snapshot_window(&self, n: usize) -> Vec<HistogramSample> {
        let inner = self.inner.lock();
        let Some(bounds) = inner.bounds.clone() else {
            return Vec::new();
        };
        let take = n.min(inner.history.len());
        let skip = inner.history.len() - take;
        inner
            .history
            .iter()
            .skip(skip)
            .map(|entry| HistogramSample {
                timestamp_ns: entry.timestamp_ns,
                bounds: bounds.clone(),
                counts: entry.counts.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ring_has_no_latest() {
        let ring = ScalarRing::new(4);
        assert_eq!(ring.latest(), None);
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.count(), 0);
    }

    #[test]
    fn push_then_latest_roundtrips() {
        let ring = ScalarRing::new(4);
        ring.push(1000, 3.14);
        assert_eq!(ring.latest(), Some(Sample { timestamp_ns: 1000, value: 3.14 }));
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.count(), 1);
    }

    #[test]
    fn wraparound_keeps_only_capacity_most_recent() {
        let ring = ScalarRing::new(4);
        for v in 1..=6 {
            ring.push(v, v as f64);
        }
        let window = ring.snapshot_window(10);
        let got: Vec<(i64, f64)> = window.iter().map(|s| (s.timestamp_ns, s.value)).collect();
        assert_eq!(got, vec![(3, 3.0), (4, 4.0), (5, 5.0), (6, 6.0)]);
        assert_eq!(ring.count(), 6);
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn snapshot_window_caps_at_k() {
        let ring = ScalarRing::new(100);
        for v in 0..10 {
            ring.push(v, v as f64);
        }
        assert_eq!(ring.snapshot_window(3).len(), 3);
        assert_eq!(ring.snapshot_window(0).len(), 0);
        assert_eq!(ring.snapshot_window(1000).len(), 10);
    }

    #[test]
    fn concurrent_pushes_preserve_per_sample_correctness() {
        use std::thread;
        let ring = Arc::new(ScalarRing::new(256));
        let mut handles = Vec::new();
        for t in 0..8u64 {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                for i in 0..100u64 {
                    let ts = (t * 1000 + i) as i64;
                    ring.push(ts, ts as f64);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ring.count(), 800);
        let window = ring.snapshot_window(256);
        for sample in &window {
            assert_eq!(sample.value, sample.timestamp_ns as f64);
        }
    }

    #[test]
    fn an_unwritten_slot_at_seq_zero_is_never_read_as_a_phantom_sample() {
        // Models the window between `written.fetch_add` and the slot write
        // landing: the reservation counter says one push happened, but slot
        // 0 itself is still in its just-constructed state. `read` must
        // report this as absent, not as a `Sample { timestamp_ns: 0, value:
        // 0.0 }` that nothing ever pushed.
        let slot = Slot::new();
        assert_eq!(slot.read(0), None);
    }

    #[test]
    fn histogram_pins_bounds_on_first_push() {
        let ring = HistogramRing::new(4);
        ring.push(1, &[1.0, 2.0], &[1, 2]).unwrap();
        let err = ring.push(2, &[1.0, 2.0, 3.0], &[1, 2, 3]).unwrap_err();
        assert_eq!(err, BhsError::BoundsMismatch { pinned: 2, found: 3 });

        let latest = ring.latest().unwrap();
        assert_eq!(latest.timestamp_ns, 1);
        assert_eq!(&*latest.counts, &[1, 2]);
    }

    #[test]
    fn histogram_push_rejects_counts_bounds_shape_mismatch() {
        let ring = HistogramRing::new(4);
        let err = ring.push(1, &[1.0, 2.0], &[1, 2, 3]).unwrap_err();
        assert_eq!(err, BhsError::ShapeMismatch { bounds: 2, counts: 3 });
        assert!(ring.latest().is_none());
    }

    #[test]
    fn histogram_wraparound_respects_capacity() {
        let ring = HistogramRing::new(2);
        for i in 0..5i64 {
            ring.push(i, &[1.0], &[i as u64]).unwrap();
        }
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.count(), 5);
        let window = ring.snapshot_window(10);
        let ts: Vec<i64> = window.iter().map(|h| h.timestamp_ns).collect();
        assert_eq!(ts, vec![3, 4]);
    }
}

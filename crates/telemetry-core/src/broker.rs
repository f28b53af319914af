//! Subscription Broker: tracks live subscribers, each with a filter and a
//! bounded outbound mailbox, and delivers messages with strict non-blocking
//! semantics.
//!
//! The broker is generic over the message type `M` it ships to mailboxes —
//! the Broadcast Scheduler instantiates it with an encoded snapshot
//! payload, but the delivery/backpressure/lifecycle machinery here doesn't
//! need to know that.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::error::BrokerError;
use crate::types::MetricKey;

/// Default mailbox capacity per subscriber.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default deadline for one subscriber write to complete on the transport
/// before the subscriber is disconnected (§5, §7 `WriteTimeout`).
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default idle deadline for a subscriber's inbound control stream before
/// the subscriber is disconnected, refreshed by heartbeat pings.
pub const DEFAULT_READ_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Default interval at which the subscriber's read pump expects a heartbeat
/// ping to arrive and refresh the idle deadline.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub type SubscriberId = u64;

/// Deadlines governing the per-subscriber write and read pumps. The pumps
/// themselves only know about a generic transport operation (a write
/// closure, a next-inbound-message closure) — the actual socket/framing is
/// an external collaborator per the design's scope boundary.
#[derive(Debug, Clone, Copy)]
pub struct PumpConfig {
    pub write_timeout: Duration,
    pub read_idle_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_idle_timeout: DEFAULT_READ_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    pub mailbox_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

/// Outcome of a single `offer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// The message was queued into the mailbox.
    Accepted,
    /// The mailbox was full; the message was dropped and the subscriber's
    /// drop counter was incremented. The subscriber stays Connected.
    Dropped,
    /// No live subscriber with this id (never registered, already
    /// disconnected, or its mailbox receiver was dropped).
    Unknown,
}

/// Aggregate result of one `broadcast` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub subscribers: usize,
    pub offered: usize,
    pub dropped: usize,
}

struct SubscriberState<M> {
    filter: RwLock<Vec<MetricKey>>,
    mailbox: mpsc::Sender<M>,
    dropped: AtomicU64,
    // Tracked alongside map membership: an entry only ever exists for a
    // Connected subscriber. `connected` lets a caller holding an `Arc`
    // clone (e.g. mid-broadcast) observe a disconnect that raced it,
    // without needing to re-take the live-set lock.
    connected: AtomicBool,
}

/// Tracks subscriber lifecycle and fans messages out to their mailboxes.
pub struct SubscriptionBroker<M> {
    live: RwLock<HashMap<SubscriberId, Arc<SubscriberState<M>>>>,
    next_id: AtomicU64,
    config: BrokerConfig,
    // Set by `shutdown`. Once true, `register` refuses new subscribers —
    // there would be nothing left running the pumps/scheduler that would
    // ever drain their mailboxes.
    closed: AtomicBool,
}

impl<M: Clone> SubscriptionBroker<M> {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            live: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Registers a new subscriber with an initial filter (empty = all
    /// metrics) and returns its id plus the receiving half of its mailbox.
    /// Fails with [`BrokerError::Closed`] once [`Self::shutdown`] has run.
    pub fn register(
        &self,
        initial_filter: Vec<MetricKey>,
    ) -> Result<(SubscriberId, mpsc::Receiver<M>), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity);
        let state = Arc::new(SubscriberState {
            filter: RwLock::new(initial_filter),
            mailbox: tx,
            dropped: AtomicU64::new(0),
            connected: AtomicBool::new(true),
        });
        self.live.write().insert(id, state);
        Ok((id, rx))
    }

    /// Removes `id` from the live set and closes its mailbox by dropping
    /// the sender. Idempotent: unregistering twice, or unregistering an
    /// unknown id, is a no-op.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        self.disconnect(id)
    }

    /// One-shot Connected -> Disconnected transition, whatever the trigger
    /// (explicit unregister, write timeout, unexpected close). Returns
    /// `true` if this call performed the transition.
    pub fn disconnect(&self, id: SubscriberId) -> bool {
        let removed = self.live.write().remove(&id);
        if let Some(state) = removed {
            state.connected.store(false, Ordering::Release);
            debug!(subscriber = id, dropped = state.dropped.load(Ordering::Relaxed), "subscriber disconnected");
            true
        } else {
            false
        }
    }

    /// Atomically replaces `id`'s filter. A no-op (returns `false`) if the
    /// subscriber is unknown or already disconnected.
    pub fn set_subscription(&self, id: SubscriberId, filter: Vec<MetricKey>) -> bool {
        let live = self.live.read();
        match live.get(&id) {
            Some(state) => {
                *state.filter.write() = filter;
                true
            }
            None => false,
        }
    }

    /// Returns a clone of `id`'s current filter, if it is live.
    pub fn subscription(&self, id: SubscriberId) -> Option<Vec<MetricKey>> {
        self.live.read().get(&id).map(|s| s.filter.read().clone())
    }

    /// Number of messages dropped for `id` due to mailbox saturation.
    pub fn dropped_count(&self, id: SubscriberId) -> Option<u64> {
        self.live.read().get(&id).map(|s| s.dropped.load(Ordering::Relaxed))
    }

    pub fn is_connected(&self, id: SubscriberId) -> bool {
        self.live.read().contains_key(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.live.read().len()
    }

    /// Ids of every currently-connected subscriber, in no particular order.
    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.live.read().keys().copied().collect()
    }

    /// Closes every live subscriber's mailbox and marks the broker itself
    /// closed: `register` after this call fails with [`BrokerError::Closed`]
    /// (§5's "no new external messages are accepted after cancellation").
    /// Draining `live` drops the last `Arc<SubscriberState>` for each
    /// subscriber, which drops its mailbox `Sender` — the write pump
    /// reading the paired `Receiver` then sees its channel close and exits
    /// on its own, same as a one-at-a-time `disconnect`. Idempotent.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut live = self.live.write();
        let count = live.len();
        for (_, state) in live.drain() {
            state.connected.store(false, Ordering::Release);
        }
        debug!(subscribers = count, "broker shut down, all mailboxes closed");
    }

    /// Best-effort enqueue of `message` into `id`'s mailbox.
    pub fn offer(&self, id: SubscriberId, message: M) -> OfferOutcome {
        let live = self.live.read();
        match live.get(&id) {
            Some(state) => Self::offer_state(state, message),
            None => OfferOutcome::Unknown,
        }
    }

    fn offer_state(state: &SubscriberState<M>, message: M) -> OfferOutcome {
        match state.mailbox.try_send(message) {
            Ok(()) => OfferOutcome::Accepted,
            Err(TrySendError::Full(_)) => {
                state.dropped.fetch_add(1, Ordering::Relaxed);
                OfferOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => OfferOutcome::Unknown,
        }
    }

    /// For each live subscriber, invokes `builder(filter)` to produce its
    /// message, then offers it. The live-set read lock is held only for
    /// the duration of this loop; every offer inside it is non-blocking,
    /// so the hold time is bounded by subscriber count, not by any
    /// subscriber's consumption rate.
    pub fn broadcast<F>(&self, mut builder: F) -> BroadcastStats
    where
        F: FnMut(&[MetricKey]) -> M,
    {
        let live = self.live.read();
        let mut stats = BroadcastStats { subscribers: live.len(), ..Default::default() };

        for state in live.values() {
            let filter = state.filter.read().clone();
            let message = builder(&filter);
            match Self::offer_state(state, message) {
                OfferOutcome::Accepted => stats.offered += 1,
                OfferOutcome::Dropped => stats.dropped += 1,
                OfferOutcome::Unknown => {}
            }
        }

        stats
    }
}

impl<M: Clone> Default for SubscriptionBroker<M> {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

/// Drives one subscriber's outbound mailbox to its transport, applying a
/// per-write deadline (`config.write_timeout`). Returns once the mailbox is
/// closed (clean broker-initiated disconnect — not an error) or once a
/// single write fails to complete in time or the transport reports a
/// failure, in which case the subscriber is disconnected exactly once
/// before returning. `write` is the transport collaborator: the pump itself
/// only knows it is a fallible async operation, not how bytes reach the
/// wire.
pub async fn run_write_pump<M, W, Fut, E>(
    broker: &SubscriptionBroker<M>,
    id: SubscriberId,
    mut mailbox: mpsc::Receiver<M>,
    config: PumpConfig,
    mut write: W,
) where
    M: Clone + Send + 'static,
    W: FnMut(M) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    while let Some(message) = mailbox.recv().await {
        match tokio::time::timeout(config.write_timeout, write(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                debug!(subscriber = id, "write pump: transport reported a failure");
                broker.disconnect(id);
                return;
            }
            Err(_elapsed) => {
                debug!(subscriber = id, "write pump: write timeout elapsed");
                broker.disconnect(id);
                return;
            }
        }
    }
}

/// Drives one subscriber's inbound control stream. Every inbound message —
/// a real control message or a heartbeat ping — refreshes the idle
/// deadline; if `config.read_idle_timeout` passes with nothing received, or
/// the stream ends, the subscriber is disconnected exactly once.
/// `next_message` is the transport collaborator, yielding the raw text of
/// one inbound message per `Some`, and `None` on stream end. Each message is
/// run through [`crate::control::parse_subscribe`]; a recognized
/// `subscribe` message updates `id`'s filter via
/// [`SubscriptionBroker::set_subscription`], and anything else (a
/// heartbeat ping, an unrecognized message, malformed JSON) still refreshes
/// the idle deadline but otherwise does nothing.
pub async fn run_read_pump<M, R, Fut>(
    broker: &SubscriptionBroker<M>,
    id: SubscriberId,
    config: PumpConfig,
    mut next_message: R,
) where
    M: Clone,
    R: FnMut() -> Fut,
    Fut: Future<Output = Option<String>>,
{
    loop {
        match tokio::time::timeout(config.read_idle_timeout, next_message()).await {
            Ok(Some(raw)) => {
                if let Some(filter) = crate::control::parse_subscribe(&raw) {
                    broker.set_subscription(id, filter);
                }
                continue;
            }
            Ok(None) => {
                debug!(subscriber = id, "read pump: inbound stream ended");
                broker.disconnect(id);
                return;
            }
            Err(_elapsed) => {
                debug!(subscriber = id, "read pump: idle deadline elapsed with no heartbeat");
                broker.disconnect(id);
                return;
            }
        }
    }
}

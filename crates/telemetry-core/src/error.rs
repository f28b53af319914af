//! Layered error taxonomy.
//!
//! Each component that can fail defines its own error enum, scoped to the
//! decisions that component alone can make (reject a write, drop a message,
//! disconnect a subscriber). Problems the design treats as recoverable and
//! metric-worthy (variant conflicts, mailbox drops) are not represented as
//! `Err` at the call sites that count them — they are folded into counted
//! outcomes instead, matching the propagation policy: the core never bounces
//! an error back in reply to a structurally valid ingest.

use thiserror::Error;

use crate::types::{MetricKey, MetricVariant};

/// Errors raised by the [`crate::registry::MetricRegistry`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    /// The key is already bound to a different variant than the one requested.
    #[error("metric {key} is bound to {existing:?}, rejecting write as {requested:?}")]
    VariantConflict {
        key: MetricKey,
        existing: MetricVariant,
        requested: MetricVariant,
    },
}

/// Errors raised while pushing into a bounded-history store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BhsError {
    /// A histogram push did not match the bucket bounds pinned at first write.
    #[error("histogram bounds mismatch: pinned {pinned} buckets, got {found}")]
    BoundsMismatch { pinned: usize, found: usize },

    /// A histogram push's `counts` did not have one entry per `bounds`
    /// entry (the convention this revision fixes: the last bound is the
    /// overflow edge, so `len(counts) == len(bounds)`).
    #[error("histogram shape mismatch: {bounds} bounds but {counts} counts")]
    ShapeMismatch { bounds: usize, counts: usize },
}

/// Errors raised by the [`crate::broker::SubscriptionBroker`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker has been shut down and accepts no further registrations.
    #[error("subscription broker is closed")]
    Closed,
}

/// Aggregate error type for call sites that want a single error surface,
/// such as the demo binaries.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Bhs(#[from] BhsError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

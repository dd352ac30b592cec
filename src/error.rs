//! Crate-level errors for the release protocol.
//!
//! Two-layer hierarchy: [`StoreError`](crate::coordination::StoreError)
//! covers the coordination store boundary, and [`Error`] here is what the
//! enclosing subscription state machine observes. Store errors flow up via
//! `From`, except where the protocol assigns them a more specific meaning
//! (position reads, deferred watch-cancellation failures).
//!
//! # Severity
//!
//! - [`Error::WatchCancel`] is a per-partition failure surfaced after the
//!   batch transfer completed; the partition was released regardless.
//! - [`Error::PositionRead`] means one offset evaluation failed; retrying is
//!   the driver's call, never done here.
//! - [`Error::Invariant`] signals a coordination bug, not a runtime
//!   condition. Drivers must treat it as fatal for the subscription.

use std::result;

use thiserror::Error;

use crate::coordination::StoreError;
use crate::types::PartitionKey;

pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced to the enclosing subscription state machine.
#[derive(Debug, Error)]
pub enum Error {
    /// A coordination store call failed.
    #[error("coordination store error")]
    Store(#[from] StoreError),

    /// The externally committed position for a partition could not be read
    /// or decoded during an offset evaluation.
    #[error("failed to read committed position for {key}")]
    PositionRead {
        key: PartitionKey,
        #[source]
        source: StoreError,
    },

    /// An offset watch could not be cancelled while releasing a partition.
    /// Raised after the batch's ownership transfer completed; the partition
    /// itself was released.
    #[error("failed to cancel offset watch for released partition {key}")]
    WatchCancel {
        key: PartitionKey,
        #[source]
        source: StoreError,
    },

    /// A programming-invariant violation. Fatal: indicates a bug in the
    /// coordination between the driver and this component.
    #[error("invariant violation: {0}")]
    Invariant(&'static str),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The task queue closed before any transition was requested.
    #[error("task queue closed before a transition was requested")]
    QueueClosed,
}

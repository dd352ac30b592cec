//! Error types for the coordination store boundary.
//!
//! These are the failures a [`CoordinationStore`](super::CoordinationStore)
//! implementation may report: transport problems talking to the backing
//! store, malformed cursor payloads, lock acquisition failures, and watch
//! subscription errors. How they surface to the subscription is decided one
//! layer up, in [`crate::error`].

use thiserror::Error;

use crate::types::PartitionKey;

/// Result type for coordination store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by the coordination store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or the call failed in flight.
    #[error("coordination transport error: {0}")]
    Transport(String),

    /// The stored cursor payload for a partition could not be decoded.
    #[error("malformed cursor payload for {key}: {reason}")]
    Decode { key: PartitionKey, reason: String },

    /// The store-wide mutual exclusion primitive could not be acquired.
    #[error("coordination lock unavailable: {0}")]
    Lock(String),

    /// A watch subscription could not be registered, refreshed, or
    /// cancelled.
    #[error("watch error for {target}: {reason}")]
    Watch { target: String, reason: String },

    /// The store has no record for the requested partition.
    #[error("unknown partition: {0}")]
    UnknownPartition(PartitionKey),
}

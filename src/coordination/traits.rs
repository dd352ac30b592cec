//! Coordination store traits for the subscription layer.
//!
//! These traits abstract the distributed locking/notification backend,
//! allowing for:
//! - Different backend implementations (ZooKeeper-style stores, in-memory
//!   for testing)
//! - Easier testing with an in-memory store
//! - Clear separation between protocol logic and store plumbing
//!
//! # Watches are one-shot
//!
//! A watch registered through [`CoordinationStore::subscribe_topology_changes`]
//! or [`CoordinationStore::subscribe_offset_changes`] fires at most once per
//! arming. After a fire, the subscriber must call [`WatchHandle::refresh`]
//! before the watch will report further changes; until then, changes are
//! silently missed. Re-arming is a correctness obligation of the subscriber,
//! not an implementation detail of the store.
//!
//! # The exclusion primitive
//!
//! [`CoordinationStore::acquire_exclusive`] returns an RAII guard for the
//! store-wide (or per-subscription) mutual exclusion primitive. Callers hold
//! the guard only across a single listing read or a single transfer write,
//! never across a whole reaction. Guards must not be nested; the two call
//! sites in this crate acquire sequentially, never re-entrantly.

use async_trait::async_trait;
use std::sync::Arc;

use super::error::StoreResult;
use crate::types::{PartitionKey, Position, SessionId, TopologyEntry};

/// Callback invoked when a watch fires. Runs on the store's notification
/// path, so it must only hand work off (e.g. enqueue a task), never block
/// or re-enter the store.
pub type WatchCallback = Arc<dyn Fn() + Send + Sync>;

/// A registered one-shot change subscription.
pub trait WatchHandle: Send {
    /// Re-arm the watch after a fire. Without this, subsequent changes are
    /// silently missed.
    fn refresh(&self) -> StoreResult<()>;

    /// Cancel the subscription. After cancellation the callback is never
    /// invoked again. Cancelling an already-cancelled watch is a no-op.
    fn cancel(&self) -> StoreResult<()>;
}

/// RAII guard for the store's mutual exclusion primitive. Dropping the
/// guard releases the lock.
pub trait ExclusiveGuard: Send {}

/// The coordination store collaborator: locking, topology listing, offset
/// reads, ownership transfer, and change-notification subscriptions.
///
/// Implementations back this with a distributed store in production and
/// with [`InMemoryStore`](super::InMemoryStore) in tests.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Acquire the store-wide mutual exclusion primitive.
    ///
    /// Held only across one listing read or one transfer write. See the
    /// module docs for the non-nesting discipline.
    async fn acquire_exclusive(&self) -> StoreResult<Box<dyn ExclusiveGuard>>;

    /// List all topology entries currently owned by the given session.
    async fn list_owned_partitions(&self, session: &SessionId) -> StoreResult<Vec<TopologyEntry>>;

    /// Relinquish the given partitions back to the shared pool for
    /// reassignment.
    ///
    /// Duplicate or late transfers (keys the store no longer records for
    /// this session) are idempotent no-ops.
    async fn transfer_ownership(
        &self,
        session: &SessionId,
        keys: &[PartitionKey],
    ) -> StoreResult<()>;

    /// Read the externally committed position for a partition.
    ///
    /// Fails with [`StoreError::Decode`](super::StoreError::Decode) if the
    /// stored cursor payload is malformed, or with a transport error.
    async fn read_committed_position(&self, key: &PartitionKey) -> StoreResult<Position>;

    /// Subscribe to changes of the partition-assignment topology.
    fn subscribe_topology_changes(&self, on_fire: WatchCallback)
    -> StoreResult<Box<dyn WatchHandle>>;

    /// Subscribe to committed-offset changes for one partition.
    fn subscribe_offset_changes(
        &self,
        key: &PartitionKey,
        on_fire: WatchCallback,
    ) -> StoreResult<Box<dyn WatchHandle>>;
}

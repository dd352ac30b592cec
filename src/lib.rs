//! # Handoff
//!
//! Graceful partition-release protocol for multi-consumer event streaming.
//!
//! When a consumer session shuts down it must relinquish the stream
//! partitions it holds without losing commit guarantees or blocking sibling
//! sessions indefinitely. This crate implements that release protocol: a
//! reactive participant in a per-subscription state machine that bounds the
//! wait for outstanding commits with a timeout, re-evaluates the distributed
//! assignment topology as it changes, tracks per-partition commit progress
//! through one-shot change watches, and hands each partition back to the
//! shared pool the instant it is safe.
//!
//! # Pieces
//!
//! - [`phase::ClosingPhase`]: the protocol itself — entry, topology and
//!   offset reactions, batch release, timeout, exit teardown.
//! - [`coordination::CoordinationStore`]: the store collaborator contract
//!   (locking, listing, transfer, offset reads, watches), with
//!   [`coordination::InMemoryStore`] as the in-process implementation.
//! - [`phase::TaskQueue`]: a tokio-backed single task queue satisfying the
//!   one-reaction-at-a-time discipline the protocol assumes.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use handoff::coordination::InMemoryStore;
//! use handoff::phase::{
//!     ClosingConfig, ClosingPhase, SubscriptionContext, TaskQueue, run_until_transition,
//! };
//! use handoff::types::{PartitionKey, Position, SessionId};
//!
//! struct Context;
//!
//! impl SubscriptionContext for Context {
//!     fn uncommitted_offsets(&self) -> HashMap<PartitionKey, Position> {
//!         HashMap::from([(PartitionKey::new("orders", 0), Position::new(10))])
//!     }
//!     fn last_commit_epoch_ms(&self) -> u64 {
//!         0
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryStore::new());
//!     let (queue, mut receiver) = TaskQueue::new();
//!     let mut phase = ClosingPhase::new(
//!         SessionId::new("session-1"),
//!         ClosingConfig::new(Duration::from_secs(30)),
//!         store,
//!         Arc::new(queue),
//!         Arc::new(Context),
//!     )?;
//!     let transition = run_until_transition(&mut phase, &mut receiver).await?;
//!     phase.on_exit().await?;
//!     println!("closing finished: {transition:?}");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod coordination;
pub mod error;
pub mod phase;
pub mod telemetry;
pub mod types;

pub use error::{Error, Result};

pub mod prelude {
    //! Main exports for building against the release protocol.
    pub use crate::coordination::{
        CoordinationStore, InMemoryStore, StoreError, StoreResult, WatchCallback, WatchHandle,
    };
    pub use crate::error::{Error, Result};
    pub use crate::phase::{
        ClosingConfig, ClosingPhase, PhaseDriver, PhaseTask, SubscriptionContext, TaskQueue,
        Transition, run_until_transition,
    };
    pub use crate::types::{AssignmentState, PartitionKey, Position, SessionId, TopologyEntry};
}

//! Subscription lifecycle phase contracts and the closing phase itself.
//!
//! The enclosing subscription state machine owns a single task queue; every
//! notification a phase reacts to (topology change, offset change, deadline)
//! is delivered as a [`PhaseTask`] on that queue, so reactions never run
//! concurrently with each other or with entry/exit. The contracts here are
//! the slice of the driver that the closing phase needs; the full state
//! machine lives outside this crate.

pub mod closing;
pub mod queue;

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::types::{PartitionKey, Position};

pub use closing::{ClosingConfig, ClosingPhase};
pub use queue::{TaskQueue, TaskReceiver, run_until_transition};

/// A discrete unit of work delivered on the state machine's task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTask {
    /// The partition-assignment topology changed.
    TopologyChanged,
    /// The committed offset for one partition changed.
    OffsetChanged(PartitionKey),
    /// The phase's deadline timer fired.
    DeadlineElapsed,
}

/// The next lifecycle phase a reaction may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Terminal for the closing phase: proceed to cleanup.
    Cleanup,
}

/// Services the enclosing state machine driver provides to a phase.
///
/// Both methods deliver tasks onto the driver's single task queue;
/// `schedule` after a delay. Implementations must be safe to call from
/// watch-notification callbacks.
pub trait PhaseDriver: Send + Sync {
    /// Enqueue a task for immediate delivery.
    fn enqueue(&self, task: PhaseTask);

    /// Deliver a task after `delay` has elapsed.
    fn schedule(&self, task: PhaseTask, delay: Duration);
}

/// State the surrounding subscription context furnishes to the closing
/// phase. The phase does not own this data; it snapshots what it needs at
/// entry.
pub trait SubscriptionContext: Send + Sync {
    /// Snapshot of the partitions this session still owes a commit for,
    /// with the last known uncommitted position of each.
    fn uncommitted_offsets(&self) -> HashMap<PartitionKey, Position>;

    /// Timestamp of the last commit observed for this session, in epoch
    /// milliseconds.
    fn last_commit_epoch_ms(&self) -> u64;

    /// Current time in epoch milliseconds. Overridable for tests; the
    /// default reads the system clock.
    fn now_epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

//! The closing phase: graceful release of a departing session's partitions.
//!
//! When a consumer session shuts down it still owes commits for partitions
//! it streamed. This phase bounds how long the subscription waits for those
//! commits, watches the assignment topology and per-partition committed
//! offsets, and hands each partition back to the shared pool the moment it
//! is safe, releasing everything that remains when the commit timeout
//! expires.
//!
//! # Reaction model
//!
//! Entry snapshots the uncommitted offsets and computes the remaining
//! timeout budget. If nothing is pending or the budget is spent, the phase
//! completes immediately. Otherwise it arms a one-shot deadline, subscribes
//! to topology changes, and evaluates the topology once. Every later
//! topology or offset notification arrives as a [`PhaseTask`] on the
//! driver's single task queue, so reactions are mutually exclusive by
//! construction. Any reaction that empties the tracked set requests the
//! terminal [`Transition::Cleanup`]; the deadline firing forces it
//! unconditionally.
//!
//! # Locking
//!
//! The store's exclusion primitive is acquired twice per release cycle,
//! once around the topology listing and once around the ownership transfer,
//! never across a whole reaction. A partition freed by the store between
//! those two points is handled by stale reclamation on the next evaluation
//! and by the store treating duplicate transfers as no-ops.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{PhaseDriver, PhaseTask, SubscriptionContext, Transition};
use crate::coordination::{CoordinationStore, StoreError, WatchCallback, WatchHandle};
use crate::error::{Error, Result};
use crate::types::{AssignmentState, PartitionKey, Position, SessionId};

/// Configuration for the closing phase.
#[derive(Debug, Clone)]
pub struct ClosingConfig {
    /// How long after the session's last commit the phase keeps waiting for
    /// outstanding commits before forcing the terminal transition.
    pub commit_timeout: Duration,
}

impl Default for ClosingConfig {
    fn default() -> Self {
        ClosingConfig {
            commit_timeout: Duration::from_secs(60),
        }
    }
}

impl ClosingConfig {
    pub fn new(commit_timeout: Duration) -> Self {
        ClosingConfig { commit_timeout }
    }

    pub fn validate(&self) -> Result<()> {
        if self.commit_timeout.is_zero() {
            return Err(Error::Config(
                "commit_timeout must be a positive duration".to_string(),
            ));
        }
        Ok(())
    }
}

/// The closing phase of one subscription session.
///
/// Constructed when the session enters the phase and dropped after the
/// terminal transition; the tracked set, the offset-watch table, and the
/// topology watch exist only for that window.
pub struct ClosingPhase {
    session: SessionId,
    config: ClosingConfig,
    store: Arc<dyn CoordinationStore>,
    driver: Arc<dyn PhaseDriver>,
    context: Arc<dyn SubscriptionContext>,

    /// Partitions this session still owes a commit for, with the last known
    /// uncommitted position of each. Snapshot taken once at entry; only
    /// ever shrinks. The phase is complete exactly when this is empty.
    uncommitted: HashMap<PartitionKey, Position>,

    /// Offset watches, one per tracked partition currently monitored for
    /// external commit progress. A handle exists for a key iff the key is
    /// tracked and monitored; all mutation goes through `free_partitions`.
    offset_watches: HashMap<PartitionKey, Box<dyn WatchHandle>>,

    /// Present throughout the active waiting phase, absent before entry and
    /// after exit.
    topology_watch: Option<Box<dyn WatchHandle>>,

    /// Set once the terminal transition has been requested; later tasks are
    /// ignored.
    done: bool,
}

impl ClosingPhase {
    pub fn new(
        session: SessionId,
        config: ClosingConfig,
        store: Arc<dyn CoordinationStore>,
        driver: Arc<dyn PhaseDriver>,
        context: Arc<dyn SubscriptionContext>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(ClosingPhase {
            session,
            config,
            store,
            driver,
            context,
            uncommitted: HashMap::new(),
            offset_watches: HashMap::new(),
            topology_watch: None,
            done: false,
        })
    }

    /// Number of partitions still tracked.
    pub fn tracked_partitions(&self) -> usize {
        self.uncommitted.len()
    }

    /// True once the terminal transition has been requested.
    pub fn is_complete(&self) -> bool {
        self.done
    }

    /// Enter the phase: snapshot uncommitted offsets, compute the remaining
    /// timeout budget, and either complete immediately or arm the deadline
    /// and the topology watch and run one topology evaluation.
    pub async fn on_enter(&mut self) -> Result<Option<Transition>> {
        let budget_ms = self.config.commit_timeout.as_millis() as u64;
        let elapsed_ms = self
            .context
            .now_epoch_ms()
            .saturating_sub(self.context.last_commit_epoch_ms());
        let remaining_ms = budget_ms.saturating_sub(elapsed_ms);

        self.uncommitted = self.context.uncommitted_offsets();

        if self.uncommitted.is_empty() || remaining_ms == 0 {
            info!(
                session = %self.session,
                tracked = self.uncommitted.len(),
                remaining_ms,
                "nothing to wait for, completing closing phase immediately"
            );
            self.done = true;
            return Ok(Some(Transition::Cleanup));
        }

        debug!(
            session = %self.session,
            tracked = self.uncommitted.len(),
            remaining_ms,
            "entering closing phase"
        );

        self.driver
            .schedule(PhaseTask::DeadlineElapsed, Duration::from_millis(remaining_ms));

        let driver = Arc::clone(&self.driver);
        let on_fire: WatchCallback = Arc::new(move || driver.enqueue(PhaseTask::TopologyChanged));
        self.topology_watch = Some(self.store.subscribe_topology_changes(on_fire)?);

        self.react_on_topology().await?;
        Ok(self.try_complete())
    }

    /// Handle one task from the driver's queue. Returns the transition to
    /// perform, if any. Tasks delivered after the terminal transition are
    /// ignored.
    pub async fn on_task(&mut self, task: PhaseTask) -> Result<Option<Transition>> {
        if self.done {
            return Ok(None);
        }
        match task {
            PhaseTask::TopologyChanged => self.on_topology_changed().await,
            PhaseTask::OffsetChanged(key) => self.on_offset_changed(key).await,
            PhaseTask::DeadlineElapsed => {
                warn!(
                    session = %self.session,
                    tracked = self.uncommitted.len(),
                    "commit timeout elapsed, forcing transition with partitions still tracked"
                );
                self.done = true;
                Ok(Some(Transition::Cleanup))
            }
        }
    }

    /// Leave the phase: best-effort release of every still-tracked
    /// partition, then unconditional cancellation of the topology watch.
    /// The two cleanups are independent; the first error encountered is
    /// propagated after both have run.
    pub async fn on_exit(&mut self) -> Result<()> {
        self.done = true;

        let remaining: Vec<PartitionKey> = self.uncommitted.keys().cloned().collect();
        let release_result = self.free_partitions(&remaining).await;
        if let Err(err) = &release_result {
            error!(
                session = %self.session,
                error = %err,
                "failed to release remaining partitions on exit"
            );
        }

        let cancel_result = match self.topology_watch.take() {
            Some(watch) => watch.cancel().map_err(Error::from),
            None => Ok(()),
        };
        if let Err(err) = &cancel_result {
            error!(session = %self.session, error = %err, "failed to cancel topology watch on exit");
        }

        release_result.and(cancel_result)
    }

    async fn on_topology_changed(&mut self) -> Result<Option<Transition>> {
        // A topology notification with no registered watch means the driver
        // delivered a task this phase never asked for. Fatal.
        let watch = self.topology_watch.as_ref().ok_or(Error::Invariant(
            "topology change delivered without a registered topology watch",
        ))?;
        // One-shot semantics: re-arm before reacting, or later changes are
        // silently missed.
        watch.refresh()?;
        self.react_on_topology().await?;
        Ok(self.try_complete())
    }

    async fn on_offset_changed(&mut self, key: PartitionKey) -> Result<Option<Transition>> {
        if let Some(watch) = self.offset_watches.get(&key) {
            watch.refresh()?;
        }
        self.react_on_offset(&key).await?;
        Ok(self.try_complete())
    }

    /// One topology evaluation: list this session's entries, release what
    /// is releasable now, arm offset watches on the rest.
    async fn react_on_topology(&mut self) -> Result<()> {
        let entries = {
            let _guard = self.store.acquire_exclusive().await?;
            self.store.list_owned_partitions(&self.session).await?
        };

        let mut free_now: Vec<PartitionKey> = Vec::new();
        let mut needs_watch: Vec<PartitionKey> = Vec::new();
        for entry in &entries {
            let tracked = self.uncommitted.contains_key(&entry.key);
            match entry.state {
                // Being handed elsewhere with no commit obligation left.
                AssignmentState::Reassigning if !tracked => free_now.push(entry.key.clone()),
                _ => {
                    if tracked && !self.offset_watches.contains_key(&entry.key) {
                        needs_watch.push(entry.key.clone());
                    }
                }
            }
        }

        // Tracked but absent from the listing: already transferred away by
        // another path. Reclaim.
        let listed: HashSet<&PartitionKey> = entries.iter().map(|entry| &entry.key).collect();
        for key in self.uncommitted.keys() {
            if !listed.contains(key) {
                debug!(session = %self.session, partition = %key, "reclaiming stale partition");
                free_now.push(key.clone());
            }
        }

        self.free_partitions(&free_now).await?;
        for key in needs_watch {
            self.register_offset_watch(key).await?;
        }
        Ok(())
    }

    /// Register an offset watch for a tracked partition and evaluate it
    /// immediately: the condition may already hold, and the store may have
    /// fired between our listing and this subscription.
    async fn register_offset_watch(&mut self, key: PartitionKey) -> Result<()> {
        let driver = Arc::clone(&self.driver);
        let watched = key.clone();
        let on_fire: WatchCallback =
            Arc::new(move || driver.enqueue(PhaseTask::OffsetChanged(watched.clone())));
        let handle = self.store.subscribe_offset_changes(&key, on_fire)?;
        debug!(session = %self.session, partition = %key, "watching committed offset");
        self.offset_watches.insert(key.clone(), handle);
        self.react_on_offset(&key).await
    }

    /// One offset evaluation: release the partition if its committed
    /// position has caught up to the recorded uncommitted position.
    async fn react_on_offset(&mut self, key: &PartitionKey) -> Result<()> {
        let committed = self
            .store
            .read_committed_position(key)
            .await
            .map_err(|source| Error::PositionRead {
                key: key.clone(),
                source,
            })?;

        let pending = self.uncommitted.get(key).copied();
        if let Some(pending) = pending {
            if !committed.is_before(pending) {
                debug!(
                    session = %self.session,
                    partition = %key,
                    %committed,
                    %pending,
                    "committed position caught up"
                );
                self.free_partitions(std::slice::from_ref(key)).await?;
            }
        }
        Ok(())
    }

    /// The single mutation point for the tracked set and the watch table.
    ///
    /// For every key: drop it from tracking, cancel its offset watch if one
    /// exists. A cancellation failure is logged and does not stop the
    /// remaining keys. The batch ownership transfer always runs afterwards;
    /// only then is the last cancellation failure re-raised.
    async fn free_partitions(&mut self, keys: &[PartitionKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut cancel_failure: Option<(PartitionKey, StoreError)> = None;
        for key in keys {
            self.uncommitted.remove(key);
            if let Some(watch) = self.offset_watches.remove(key) {
                if let Err(err) = watch.cancel() {
                    error!(
                        session = %self.session,
                        partition = %key,
                        error = %err,
                        "failed to cancel offset watch, continuing release"
                    );
                    cancel_failure = Some((key.clone(), err));
                }
            }
        }

        {
            let _guard = self.store.acquire_exclusive().await?;
            self.store.transfer_ownership(&self.session, keys).await?;
        }
        info!(
            session = %self.session,
            released = keys.len(),
            "transferred partitions back to the pool"
        );

        match cancel_failure {
            Some((key, source)) => Err(Error::WatchCancel { key, source }),
            None => Ok(()),
        }
    }

    fn try_complete(&mut self) -> Option<Transition> {
        if !self.done && self.uncommitted.is_empty() {
            info!(session = %self.session, "all partitions released, completing closing phase");
            self.done = true;
            Some(Transition::Cleanup)
        } else {
            None
        }
    }
}

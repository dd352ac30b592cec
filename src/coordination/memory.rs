//! In-memory coordination store.
//!
//! A complete [`CoordinationStore`] implementation backed by process-local
//! maps, with real one-shot watch semantics: a watch fires at most once per
//! arming and stays silent until [`WatchHandle::refresh`] is called. Used as
//! the test double for the release protocol and as the reference for what a
//! distributed backend must provide.
//!
//! Mutators (`set_partition`, `set_committed`, ...) fire the relevant
//! watches, so tests exercise the same notification path a distributed store
//! would drive. Failure injection hooks (`fail_offset_watch_cancel`,
//! `fail_topology_watch_cancel`) let tests cover the degraded paths.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::error::{StoreError, StoreResult};
use super::traits::{CoordinationStore, ExclusiveGuard, WatchCallback, WatchHandle};
use crate::types::{AssignmentState, PartitionKey, Position, SessionId, TopologyEntry};

/// What a watch observes. Determines which injected failures apply.
#[derive(Debug, Clone)]
enum WatchTarget {
    Topology,
    Offset(PartitionKey),
}

impl WatchTarget {
    fn label(&self) -> String {
        match self {
            WatchTarget::Topology => "topology".to_string(),
            WatchTarget::Offset(key) => key.to_string(),
        }
    }
}

/// Per-subscription watch state. `armed` implements the one-shot contract:
/// firing swaps it to false, `refresh` swaps it back.
struct WatchState {
    armed: AtomicBool,
    cancelled: AtomicBool,
    refreshes: AtomicU64,
    callback: WatchCallback,
}

impl WatchState {
    fn new(callback: WatchCallback) -> Arc<Self> {
        Arc::new(WatchState {
            armed: AtomicBool::new(true),
            cancelled: AtomicBool::new(false),
            refreshes: AtomicU64::new(0),
            callback,
        })
    }

    /// Take the fire permit if the watch is armed and alive.
    fn take_fire(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst) && self.armed.swap(false, Ordering::SeqCst)
    }
}

struct Inner {
    topology: HashMap<PartitionKey, TopologyEntry>,
    committed: HashMap<PartitionKey, Bytes>,
    topology_watches: Vec<Arc<WatchState>>,
    offset_watches: HashMap<PartitionKey, Vec<Arc<WatchState>>>,
    transfers: Vec<(SessionId, Vec<PartitionKey>)>,
    cancel_failures: HashSet<PartitionKey>,
    fail_topology_cancel: bool,
}

struct Shared {
    inner: std::sync::Mutex<Inner>,
}

impl Shared {
    /// Collect fireable topology callbacks under the data lock, invoke them
    /// outside it. Callbacks only enqueue tasks, but they must never observe
    /// the store mid-mutation.
    fn fire_topology(&self) {
        let callbacks: Vec<WatchCallback> = {
            let inner = self.inner.lock().unwrap();
            inner
                .topology_watches
                .iter()
                .filter(|w| w.take_fire())
                .map(|w| Arc::clone(&w.callback))
                .collect()
        };
        for callback in callbacks {
            callback();
        }
    }

    fn fire_offset(&self, key: &PartitionKey) {
        let callbacks: Vec<WatchCallback> = {
            let inner = self.inner.lock().unwrap();
            inner
                .offset_watches
                .get(key)
                .map(|watches| {
                    watches
                        .iter()
                        .filter(|w| w.take_fire())
                        .map(|w| Arc::clone(&w.callback))
                        .collect()
                })
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback();
        }
    }
}

struct MemoryWatchHandle {
    shared: Arc<Shared>,
    state: Arc<WatchState>,
    target: WatchTarget,
}

impl WatchHandle for MemoryWatchHandle {
    fn refresh(&self) -> StoreResult<()> {
        self.state.refreshes.fetch_add(1, Ordering::SeqCst);
        self.state.armed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn cancel(&self) -> StoreResult<()> {
        let fails = {
            let inner = self.shared.inner.lock().unwrap();
            match &self.target {
                WatchTarget::Topology => inner.fail_topology_cancel,
                WatchTarget::Offset(key) => inner.cancel_failures.contains(key),
            }
        };
        if fails {
            return Err(StoreError::Watch {
                target: self.target.label(),
                reason: "injected cancellation failure".to_string(),
            });
        }
        self.state.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ExclusiveGuard for MemoryGuard {}

/// Process-local [`CoordinationStore`].
pub struct InMemoryStore {
    lock: Arc<AsyncMutex<()>>,
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            lock: Arc::new(AsyncMutex::new(())),
            shared: Arc::new(Shared {
                inner: std::sync::Mutex::new(Inner {
                    topology: HashMap::new(),
                    committed: HashMap::new(),
                    topology_watches: Vec::new(),
                    offset_watches: HashMap::new(),
                    transfers: Vec::new(),
                    cancel_failures: HashSet::new(),
                    fail_topology_cancel: false,
                }),
            }),
        }
    }

    /// Insert or replace a topology entry and notify topology watchers.
    pub fn set_partition(&self, entry: TopologyEntry) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.topology.insert(entry.key.clone(), entry);
        }
        self.shared.fire_topology();
    }

    /// Change the assignment state of a recorded partition and notify
    /// topology watchers. No-op for unknown partitions.
    pub fn set_assignment_state(&self, key: &PartitionKey, state: AssignmentState) {
        let changed = {
            let mut inner = self.shared.inner.lock().unwrap();
            match inner.topology.get_mut(key) {
                Some(entry) => {
                    entry.state = state;
                    true
                }
                None => false,
            }
        };
        if changed {
            self.shared.fire_topology();
        }
    }

    /// Drop a partition from the topology record entirely and notify
    /// topology watchers.
    pub fn remove_partition(&self, key: &PartitionKey) {
        let changed = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.topology.remove(key).is_some()
        };
        if changed {
            self.shared.fire_topology();
        }
    }

    /// Record a committed position for a partition and notify its offset
    /// watchers.
    pub fn set_committed(&self, key: &PartitionKey, position: Position) {
        self.set_committed_raw(key, position.encode());
    }

    /// Record a raw cursor payload. Lets tests plant malformed payloads to
    /// drive the decode failure path.
    pub fn set_committed_raw(&self, key: &PartitionKey, payload: Bytes) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.committed.insert(key.clone(), payload);
        }
        self.shared.fire_offset(key);
    }

    /// Make every future offset-watch cancellation for `key` fail.
    pub fn fail_offset_watch_cancel(&self, key: &PartitionKey) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.cancel_failures.insert(key.clone());
    }

    /// Make every future topology-watch cancellation fail.
    pub fn fail_topology_watch_cancel(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.fail_topology_cancel = true;
    }

    /// All ownership transfers performed so far, in order.
    pub fn transfers(&self) -> Vec<(SessionId, Vec<PartitionKey>)> {
        self.shared.inner.lock().unwrap().transfers.clone()
    }

    /// True while the topology still records the partition.
    pub fn records_partition(&self, key: &PartitionKey) -> bool {
        self.shared.inner.lock().unwrap().topology.contains_key(key)
    }

    /// Topology watches that have not been cancelled.
    pub fn active_topology_watches(&self) -> usize {
        self.shared
            .inner
            .lock()
            .unwrap()
            .topology_watches
            .iter()
            .filter(|w| !w.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Offset watches for `key` that have not been cancelled.
    pub fn active_offset_watches(&self, key: &PartitionKey) -> usize {
        self.shared
            .inner
            .lock()
            .unwrap()
            .offset_watches
            .get(key)
            .map(|watches| {
                watches
                    .iter()
                    .filter(|w| !w.cancelled.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Total refresh calls observed across offset watches for `key`.
    pub fn offset_watch_refreshes(&self, key: &PartitionKey) -> u64 {
        self.shared
            .inner
            .lock()
            .unwrap()
            .offset_watches
            .get(key)
            .map(|watches| {
                watches
                    .iter()
                    .map(|w| w.refreshes.load(Ordering::SeqCst))
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Total refresh calls observed across topology watches.
    pub fn topology_watch_refreshes(&self) -> u64 {
        self.shared
            .inner
            .lock()
            .unwrap()
            .topology_watches
            .iter()
            .map(|w| w.refreshes.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn acquire_exclusive(&self) -> StoreResult<Box<dyn ExclusiveGuard>> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        Ok(Box::new(MemoryGuard { _guard: guard }))
    }

    async fn list_owned_partitions(&self, session: &SessionId) -> StoreResult<Vec<TopologyEntry>> {
        let mut entries: Vec<TopologyEntry> = self
            .shared
            .inner
            .lock()
            .unwrap()
            .topology
            .values()
            .filter(|entry| entry.owned_by(session))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn transfer_ownership(
        &self,
        session: &SessionId,
        keys: &[PartitionKey],
    ) -> StoreResult<()> {
        let changed = {
            let mut inner = self.shared.inner.lock().unwrap();
            let mut changed = false;
            for key in keys {
                // Idempotent: keys already gone or re-owned elsewhere are
                // left alone.
                let owned = inner
                    .topology
                    .get(key)
                    .is_some_and(|entry| entry.owned_by(session));
                if owned {
                    inner.topology.remove(key);
                    changed = true;
                }
            }
            inner.transfers.push((session.clone(), keys.to_vec()));
            changed
        };
        if changed {
            self.shared.fire_topology();
        }
        Ok(())
    }

    async fn read_committed_position(&self, key: &PartitionKey) -> StoreResult<Position> {
        let payload = {
            let inner = self.shared.inner.lock().unwrap();
            inner.committed.get(key).cloned()
        };
        let payload = payload.ok_or_else(|| StoreError::UnknownPartition(key.clone()))?;
        Position::decode(&payload).ok_or_else(|| StoreError::Decode {
            key: key.clone(),
            reason: format!("expected 8-byte cursor payload, got {} bytes", payload.len()),
        })
    }

    fn subscribe_topology_changes(
        &self,
        on_fire: WatchCallback,
    ) -> StoreResult<Box<dyn WatchHandle>> {
        let state = WatchState::new(on_fire);
        self.shared
            .inner
            .lock()
            .unwrap()
            .topology_watches
            .push(Arc::clone(&state));
        Ok(Box::new(MemoryWatchHandle {
            shared: Arc::clone(&self.shared),
            state,
            target: WatchTarget::Topology,
        }))
    }

    fn subscribe_offset_changes(
        &self,
        key: &PartitionKey,
        on_fire: WatchCallback,
    ) -> StoreResult<Box<dyn WatchHandle>> {
        let state = WatchState::new(on_fire);
        self.shared
            .inner
            .lock()
            .unwrap()
            .offset_watches
            .entry(key.clone())
            .or_default()
            .push(Arc::clone(&state));
        Ok(Box::new(MemoryWatchHandle {
            shared: Arc::clone(&self.shared),
            state,
            target: WatchTarget::Offset(key.clone()),
        }))
    }
}

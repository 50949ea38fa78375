//! Actor directory: live actor entries and their lifetime.
//!
//! # Design
//!
//! ```text
//! ActorDirectory
//!  ├─ collections: TypeKey ──▶ Arc<ActorCollection>
//!  │     Controller{GreeterImpl} ─┐
//!  │     Capability("Greeter") ───┴─▶ ActorCollection { "u1" ▶ entry, "u2" ▶ entry }
//!  ├─ pool  (queue assignment for new entries)
//!  └─ clock (deadlines and sweep)
//! ```
//!
//! - One collection per controller type, registered under both the
//!   controller key and the capability key.
//! - An entry owns its controller and is bound to one serial queue for its
//!   whole life. Every call for the actor runs on that queue, which is what
//!   serializes the actor without locks.
//! - Get-or-create goes through the `DashMap` entry API: the shard lock is
//!   held while the entry is built, so racing callers observe one entry.
//! - Every access pushes the deadline to `now + actor_free_time`. The sweep
//!   removes entries whose deadline passed with a conditional remove, so a
//!   touch that lands first keeps the entry alive.
//! - Teardown hooks run on the entry's bound queue, after any call already
//!   queued for it. Each teardown is isolated: a failure or panic is logged
//!   and the rest of the batch proceeds.
//! - The teardown job marks the entry freed before running the hook. A call
//!   that resolved the entry before its removal but was queued after the
//!   teardown sees the mark and fails instead of reaching a freed controller.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;

use crate::config::EngineConfig;
use crate::context::EventContext;
use crate::controller::Controller;
use crate::error::{ConfigError, HandlerError};
use crate::queue::{QueuePool, SerialQueue};
use crate::service::TypeKey;
use crate::time::Clock;

/// Why an actor entry was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FreeReason {
    /// No access for at least the actor free time.
    IdleTimeout,
    /// Explicit flush of the actor or its type.
    Flushed,
    /// Engine shutdown.
    Shutdown,
}

impl fmt::Display for FreeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            FreeReason::IdleTimeout => "idle timeout",
            FreeReason::Flushed => "flushed",
            FreeReason::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// Identity of a live actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActorInfo {
    /// Actor id, unique within its type.
    pub actor_id: String,
    /// `/<Service>/<actorId>`.
    pub actor_path: String,
    /// Service the actor was first addressed through.
    pub service_name: String,
}

impl ActorInfo {
    /// Describe actor `actor_id` of `service_name`.
    pub fn new(service_name: impl Into<String>, actor_id: impl Into<String>) -> Self {
        let service_name = service_name.into();
        let actor_id = actor_id.into();
        Self {
            actor_path: format!("/{service_name}/{actor_id}"),
            actor_id,
            service_name,
        }
    }
}

/// A live actor: its controller, bound queue and idle deadline.
pub struct ActorEntry {
    info: ActorInfo,
    controller: Arc<dyn Controller>,
    queue: Arc<SerialQueue>,
    /// Deadline in nanoseconds of engine clock time.
    deadline: AtomicU64,
    initialized: OnceCell<()>,
    freed: AtomicBool,
}

impl ActorEntry {
    fn new(
        info: ActorInfo,
        controller: Arc<dyn Controller>,
        queue: Arc<SerialQueue>,
        deadline: Duration,
    ) -> Self {
        Self {
            info,
            controller,
            queue,
            deadline: AtomicU64::new(to_nanos(deadline)),
            initialized: OnceCell::new(),
            freed: AtomicBool::new(false),
        }
    }

    /// Identity of the actor.
    pub fn info(&self) -> &ActorInfo {
        &self.info
    }

    /// The controller owned by this actor.
    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    /// The queue every call for this actor runs on.
    pub fn queue(&self) -> &Arc<SerialQueue> {
        &self.queue
    }

    /// Current idle deadline on the engine clock.
    pub fn deadline(&self) -> Duration {
        Duration::from_nanos(self.deadline.load(Ordering::Acquire))
    }

    /// Check whether the initialization hook has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Check whether the entry was evicted and its teardown has started.
    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }

    fn mark_freed(&self) {
        self.freed.store(true, Ordering::Release);
    }

    fn refresh(&self, deadline: Duration) {
        self.deadline.store(to_nanos(deadline), Ordering::Release);
    }

    fn is_expired(&self, now: Duration) -> bool {
        self.deadline() <= now
    }

    /// Run the initialization hook unless it already succeeded.
    ///
    /// Called at the start of every actor-bound job, on the bound queue.
    pub(crate) async fn ensure_initialized(&self, ctx: &EventContext) -> Result<(), HandlerError> {
        self.initialized
            .get_or_try_init(|| self.controller.on_actor_init(ctx))
            .await
            .map(|_| ())
    }
}

impl fmt::Debug for ActorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorEntry")
            .field("info", &self.info)
            .field("queue", &self.queue.id())
            .field("deadline", &self.deadline())
            .field("initialized", &self.is_initialized())
            .field("freed", &self.is_freed())
            .finish()
    }
}

fn to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Live actors of one controller type, by actor id.
#[derive(Debug)]
pub struct ActorCollection {
    name: &'static str,
    entries: DashMap<String, Arc<ActorEntry>>,
}

impl ActorCollection {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
        }
    }

    /// Controller type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of live actors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no actor is live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a live actor.
    pub fn get(&self, actor_id: &str) -> Option<Arc<ActorEntry>> {
        self.entries.get(actor_id).map(|e| e.value().clone())
    }

    fn drain(&self) -> Vec<Arc<ActorEntry>> {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter_map(|id| self.entries.remove(id).map(|(_, entry)| entry))
            .collect()
    }
}

/// Per-type tables of live actors plus the idle-eviction policy.
pub struct ActorDirectory {
    collections: DashMap<TypeKey, Arc<ActorCollection>>,
    pool: Arc<QueuePool>,
    clock: Arc<dyn Clock>,
    actor_free_time: Duration,
    max_pending: usize,
    log_level: LevelFilter,
}

impl ActorDirectory {
    /// Create an empty directory assigning queues from `pool`.
    pub fn new(pool: Arc<QueuePool>, config: &EngineConfig) -> Self {
        Self {
            collections: DashMap::new(),
            pool,
            clock: config.clock().clone(),
            actor_free_time: config.actor_free_time(),
            max_pending: config.max_pending_per_queue(),
            log_level: config.log_level(),
        }
    }

    /// How long an entry survives without access.
    pub fn actor_free_time(&self) -> Duration {
        self.actor_free_time
    }

    /// The collection for `controller`, created on first use.
    ///
    /// The collection is also reachable through `capability`. If another
    /// controller type already claimed that capability, the alias keeps
    /// pointing at the first one.
    pub fn collection(&self, controller: TypeKey, capability: TypeKey) -> Arc<ActorCollection> {
        let collection = self
            .collections
            .entry(controller)
            .or_insert_with(|| Arc::new(ActorCollection::new(controller.name())))
            .clone();
        let alias = self
            .collections
            .entry(capability)
            .or_insert_with(|| collection.clone())
            .clone();
        if !Arc::ptr_eq(&alias, &collection) {
            gated!(self.log_level, WARN,
                capability = %capability,
                kept = alias.name(),
                ignored = collection.name(),
                "capability already maps to another actor type"
            );
        }
        collection
    }

    /// Find a collection by controller or capability key.
    pub fn find(&self, key: &TypeKey) -> Option<Arc<ActorCollection>> {
        self.collections.get(key).map(|c| c.value().clone())
    }

    /// Get the entry for `actor_id`, creating it if absent.
    ///
    /// `build` runs only when the entry is created, under the collection's
    /// shard lock, so it must not call back into the directory. A new
    /// entry gets a queue by rotation. Both paths refresh the deadline.
    /// Returns the entry and whether it was created by this call.
    pub fn get_or_create<F>(
        &self,
        collection: &ActorCollection,
        actor_id: &str,
        service_name: &str,
        build: F,
    ) -> Result<(Arc<ActorEntry>, bool), HandlerError>
    where
        F: FnOnce() -> Result<Arc<dyn Controller>, HandlerError>,
    {
        let deadline = self.next_deadline();
        match collection.entries.entry(actor_id.to_string()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.get().clone();
                entry.refresh(deadline);
                Ok((entry, false))
            }
            Entry::Vacant(vacant) => {
                let controller = build()?;
                let queue = self.pool.select_by_rotation(self.max_pending);
                let entry = Arc::new(ActorEntry::new(
                    ActorInfo::new(service_name, actor_id),
                    controller,
                    queue,
                    deadline,
                ));
                vacant.insert(entry.clone());
                gated!(self.log_level, DEBUG,
                    actor_path = %entry.info.actor_path,
                    queue = entry.queue.id(),
                    "actor created"
                );
                Ok((entry, true))
            }
        }
    }

    /// Extend the entry's deadline to `now + actor_free_time`.
    pub fn touch(&self, entry: &ActorEntry) {
        entry.refresh(self.next_deadline());
    }

    fn next_deadline(&self) -> Duration {
        self.clock.now().saturating_add(self.actor_free_time)
    }

    /// Evict every entry whose deadline is at or before `now`.
    ///
    /// Waits for the teardown hooks. Returns the number of evicted entries.
    pub async fn sweep(&self, now: Duration) -> usize {
        let mut expired = Vec::new();
        for collection in self.unique_collections() {
            let ids: Vec<String> = collection
                .entries
                .iter()
                .filter(|e| e.value().is_expired(now))
                .map(|e| e.key().clone())
                .collect();
            for id in ids {
                if let Some((_, entry)) = collection.entries.remove_if(&id, |_, e| e.is_expired(now)) {
                    expired.push(entry);
                }
            }
        }
        let evicted = expired.len();
        self.release(expired, FreeReason::IdleTimeout).await;
        evicted
    }

    /// Evict one actor, or every actor of a type, regardless of deadline.
    pub async fn flush(&self, key: &TypeKey, actor_id: Option<&str>) -> usize {
        let Some(collection) = self.find(key) else {
            return 0;
        };
        let entries: Vec<Arc<ActorEntry>> = match actor_id {
            Some(id) => collection
                .entries
                .remove(id)
                .map(|(_, entry)| entry)
                .into_iter()
                .collect(),
            None => collection.drain(),
        };
        let flushed = entries.len();
        self.release(entries, FreeReason::Flushed).await;
        flushed
    }

    /// Evict every actor of every type.
    pub async fn flush_all(&self, reason: FreeReason) -> usize {
        let entries: Vec<Arc<ActorEntry>> = self
            .unique_collections()
            .iter()
            .flat_map(|collection| collection.drain())
            .collect();
        let flushed = entries.len();
        self.release(entries, reason).await;
        flushed
    }

    /// Number of live actors across all types.
    pub fn actor_count(&self) -> usize {
        self.unique_collections().iter().map(|c| c.len()).sum()
    }

    fn unique_collections(&self) -> Vec<Arc<ActorCollection>> {
        let mut unique: Vec<Arc<ActorCollection>> = Vec::new();
        for collection in self.collections.iter() {
            if !unique.iter().any(|c| Arc::ptr_eq(c, collection.value())) {
                unique.push(collection.value().clone());
            }
        }
        unique
    }

    async fn release(&self, entries: Vec<Arc<ActorEntry>>, reason: FreeReason) {
        let teardowns = entries
            .into_iter()
            .map(|entry| self.release_one(entry, reason));
        futures::future::join_all(teardowns).await;
    }

    async fn release_one(&self, entry: Arc<ActorEntry>, reason: FreeReason) {
        let (tx, rx) = oneshot::channel();
        let job_entry = entry.clone();
        let submitted = entry.queue.submit(async move {
            job_entry.mark_freed();
            let outcome = if job_entry.is_initialized() {
                AssertUnwindSafe(job_entry.controller.on_actor_free(&job_entry.info, reason))
                    .catch_unwind()
                    .await
            } else {
                Ok(Ok(()))
            };
            let _ = tx.send(outcome);
        });
        let path = &entry.info.actor_path;
        if let Err(e) = submitted {
            gated!(self.log_level, ERROR, actor_path = %path, error = %e, "actor teardown not scheduled");
            return;
        }
        match rx.await {
            Ok(Ok(Ok(()))) => {
                gated!(self.log_level, DEBUG, actor_path = %path, reason = %reason, "actor freed");
            }
            Ok(Ok(Err(e))) => {
                gated!(self.log_level, ERROR, actor_path = %path, reason = %reason, error = %e, "actor teardown failed");
            }
            Ok(Err(_)) => {
                gated!(self.log_level, ERROR, actor_path = %path, reason = %reason, "actor teardown panicked");
            }
            Err(_) => {
                gated!(self.log_level, ERROR, actor_path = %path, reason = %reason, "actor teardown dropped");
            }
        }
    }
}

impl fmt::Debug for ActorDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorDirectory")
            .field("collections", &self.unique_collections().len())
            .field("actors", &self.actor_count())
            .field("actor_free_time", &self.actor_free_time)
            .finish()
    }
}

/// Periodic idle-eviction task.
///
/// Sleeps one interval on the engine clock, sweeps, then sleeps again. The
/// next sleep only starts once the sweep (including teardown hooks) has
/// finished, so sweeps never overlap. Holds the directory weakly and exits
/// when it is gone or when cancelled.
#[derive(Debug)]
pub struct SweepTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SweepTask {
    /// Spawn the sweep loop on the current runtime.
    pub fn spawn(
        directory: Weak<ActorDirectory>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Result<Self, ConfigError> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        let cancel = CancellationToken::new();
        let handle = runtime.spawn(sweep_loop(directory, clock, interval, cancel.clone()));
        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// Stop the loop and wait for a running sweep to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for SweepTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn sweep_loop(
    directory: Weak<ActorDirectory>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = clock.sleep(interval) => {}
        }
        let Some(directory) = directory.upgrade() else {
            break;
        };
        let evicted = directory.sweep(clock.now()).await;
        if evicted > 0 {
            gated!(directory.log_level, INFO, evicted, "idle actors evicted");
        }
    }
}

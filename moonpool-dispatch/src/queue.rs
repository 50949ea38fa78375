//! Serial execution queues and the pool that selects among them.
//!
//! # Design
//!
//! ```text
//! ┌──────────────────────────── QueuePool ────────────────────────────┐
//! │  cursor: AtomicUsize (shared rotation)                            │
//! │                                                                   │
//! │  SerialQueue 0 ── mpsc ──▶ worker task ── job, job, job …         │
//! │  SerialQueue 1 ── mpsc ──▶ worker task ── job, job …              │
//! │  …                                                                │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each [`SerialQueue`] owns one tokio task that drains its channel one job
//! at a time: the next job starts only after the previous future completed,
//! including any suspension inside it. Queues share nothing but the pool's
//! rotation cursor, so they drain fully in parallel.
//!
//! Selection policies:
//! - [`QueuePool::select_by_rotation`]: round robin, skipping queues whose
//!   backlog exceeds a threshold, wrapping at most once around the pool.
//! - [`QueuePool::select_by_key`]: CRC32C of the key modulo the pool size,
//!   so the same key always lands on the same queue.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;

use crate::error::ConfigError;

type Job = BoxFuture<'static, ()>;

/// Work was submitted to a queue whose worker has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("serial queue {id} is closed")]
pub struct QueueClosed {
    /// Index of the closed queue.
    pub id: usize,
}

/// A FIFO of work items drained by a single worker task.
#[derive(Debug)]
pub struct SerialQueue {
    id: usize,
    sender: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl SerialQueue {
    fn spawn(id: usize, handle: &Handle, log_level: LevelFilter) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        handle.spawn(drain(id, receiver, pending.clone(), log_level));
        Self {
            id,
            sender,
            pending,
        }
    }

    /// Index of this queue within its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of submitted items not yet completed (including the running one).
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Submit a work item.
    ///
    /// The item runs after every item already queued here has completed.
    pub fn submit<F>(&self, work: F) -> Result<(), QueueClosed>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(Box::pin(work)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(QueueClosed { id: self.id });
        }
        Ok(())
    }
}

/// Worker loop for one queue.
///
/// A panicking job is contained here so the queue keeps draining.
async fn drain(
    id: usize,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    pending: Arc<AtomicUsize>,
    log_level: LevelFilter,
) {
    while let Some(job) = receiver.recv().await {
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            gated!(log_level, ERROR, queue = id, "work item panicked");
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
    gated!(log_level, DEBUG, queue = id, "serial queue closed");
}

/// Fixed set of serial queues with a shared selection cursor.
#[derive(Debug)]
pub struct QueuePool {
    queues: Vec<Arc<SerialQueue>>,
    cursor: AtomicUsize,
}

impl QueuePool {
    /// Spawn `count` serial queues on the current tokio runtime.
    ///
    /// Worker events below `log_level` are not emitted.
    ///
    /// # Errors
    ///
    /// Returns an error if `count` is zero or no tokio runtime is active.
    pub fn new(count: usize, log_level: LevelFilter) -> Result<Self, ConfigError> {
        if count == 0 {
            return Err(ConfigError::ZeroQueues);
        }
        let handle = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        let queues = (0..count)
            .map(|id| Arc::new(SerialQueue::spawn(id, &handle, log_level)))
            .collect();
        Ok(Self {
            queues,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Number of queues in the pool.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// A pool always holds at least one queue.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Get a queue by index.
    pub fn get(&self, id: usize) -> Option<&Arc<SerialQueue>> {
        self.queues.get(id)
    }

    /// Pick the next queue in rotation.
    ///
    /// Queues holding more than `max_pending` items are skipped. After one
    /// full lap without a candidate, the next queue is accepted regardless of
    /// load.
    pub fn select_by_rotation(&self, max_pending: usize) -> Arc<SerialQueue> {
        let count = self.queues.len();
        for _ in 0..count {
            let queue = &self.queues[self.advance() % count];
            if queue.pending() <= max_pending {
                return queue.clone();
            }
        }
        self.queues[self.advance() % count].clone()
    }

    /// Pick the queue pinned to `key`.
    pub fn select_by_key(&self, key: &[u8]) -> Arc<SerialQueue> {
        let index = crc32c::crc32c(key) as usize % self.queues.len();
        self.queues[index].clone()
    }

    fn advance(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed)
    }
}

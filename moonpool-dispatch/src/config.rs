//! Engine configuration.
//!
//! [`EngineConfig`] bundles the tunables of an [`EventEngine`](crate::EventEngine):
//! the queue pool size and load-skip threshold, actor idle lifetime, sweep
//! period, log gating, and the injected collaborators (clock, event-log
//! store, controller instance hook).
//!
//! # Example
//!
//! ```rust,ignore
//! let config = EngineConfig::builder()
//!     .queue_count(4)
//!     .actor_free_time(Duration::from_secs(120))
//!     .log_level(LevelFilter::DEBUG)
//!     .build()?;
//! let engine = EventEngine::new(config)?;
//! ```

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tracing::level_filters::LevelFilter;
use tracing::Level;

use crate::controller::InstanceHook;
use crate::error::ConfigError;
use crate::event_log::EventLogStore;
use crate::time::{Clock, TokioClock};

/// Default idle lifetime of an actor entry.
pub const DEFAULT_ACTOR_FREE_TIME: Duration = Duration::from_secs(60);

/// Default period of the idle-eviction sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Default pending-item count above which rotation skips a queue.
pub const DEFAULT_MAX_PENDING_PER_QUEUE: usize = 5;

/// Configuration for an [`EventEngine`](crate::EventEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    queue_count: usize,
    max_pending_per_queue: usize,
    actor_free_time: Duration,
    sweep_interval: Duration,
    log_level: LevelFilter,
    clock: Arc<dyn Clock>,
    event_log: Option<Arc<dyn EventLogStore>>,
    instance_hook: Option<Arc<dyn InstanceHook>>,
}

impl EngineConfig {
    /// Start building an engine configuration.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Number of serial queues in the pool.
    pub fn queue_count(&self) -> usize {
        self.queue_count
    }

    /// Pending-item threshold used by round-robin selection.
    pub fn max_pending_per_queue(&self) -> usize {
        self.max_pending_per_queue
    }

    /// How long an actor may stay idle before the sweep evicts it.
    pub fn actor_free_time(&self) -> Duration {
        self.actor_free_time
    }

    /// Period of the idle-eviction sweep.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Minimum level the engine emits log events at.
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    /// The engine clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The event-log backend, if one was injected.
    pub fn event_log(&self) -> Option<&Arc<dyn EventLogStore>> {
        self.event_log.as_ref()
    }

    /// The controller instance hook, if one was installed.
    pub fn instance_hook(&self) -> Option<&Arc<dyn InstanceHook>> {
        self.instance_hook.as_ref()
    }

    /// Check whether events at `level` pass the configured minimum.
    pub fn log_enabled(&self, level: Level) -> bool {
        level <= self.log_level
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_count: default_queue_count(),
            max_pending_per_queue: DEFAULT_MAX_PENDING_PER_QUEUE,
            actor_free_time: DEFAULT_ACTOR_FREE_TIME,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            log_level: LevelFilter::ERROR,
            clock: Arc::new(TokioClock::new()),
            event_log: None,
            instance_hook: None,
        }
    }
}

fn default_queue_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    queue_count: Option<usize>,
    max_pending_per_queue: Option<usize>,
    actor_free_time: Option<Duration>,
    sweep_interval: Option<Duration>,
    log_level: Option<LevelFilter>,
    clock: Option<Arc<dyn Clock>>,
    event_log: Option<Arc<dyn EventLogStore>>,
    instance_hook: Option<Arc<dyn InstanceHook>>,
}

impl EngineConfigBuilder {
    /// Set the number of serial queues.
    ///
    /// If not set, defaults to the available parallelism of the host.
    pub fn queue_count(mut self, count: usize) -> Self {
        self.queue_count = Some(count);
        self
    }

    /// Set the pending-item threshold used by round-robin selection.
    pub fn max_pending_per_queue(mut self, max: usize) -> Self {
        self.max_pending_per_queue = Some(max);
        self
    }

    /// Set the actor idle lifetime.
    pub fn actor_free_time(mut self, free_time: Duration) -> Self {
        self.actor_free_time = Some(free_time);
        self
    }

    /// Set the idle-eviction sweep period.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Set the minimum level the engine logs at.
    pub fn log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Set the engine clock.
    ///
    /// If not set, defaults to [`TokioClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Inject an event-log storage backend.
    pub fn event_log(mut self, store: Arc<dyn EventLogStore>) -> Self {
        self.event_log = Some(store);
        self
    }

    /// Install a controller instance hook.
    pub fn instance_hook(mut self, hook: Arc<dyn InstanceHook>) -> Self {
        self.instance_hook = Some(hook);
        self
    }

    /// Build the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue count, actor free time or sweep
    /// interval is zero.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let queue_count = self.queue_count.unwrap_or_else(default_queue_count);
        if queue_count == 0 {
            return Err(ConfigError::ZeroQueues);
        }
        let actor_free_time = self.actor_free_time.unwrap_or(DEFAULT_ACTOR_FREE_TIME);
        if actor_free_time.is_zero() {
            return Err(ConfigError::ZeroActorFreeTime);
        }
        let sweep_interval = self.sweep_interval.unwrap_or(DEFAULT_SWEEP_INTERVAL);
        if sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }

        Ok(EngineConfig {
            queue_count,
            max_pending_per_queue: self
                .max_pending_per_queue
                .unwrap_or(DEFAULT_MAX_PENDING_PER_QUEUE),
            actor_free_time,
            sweep_interval,
            log_level: self.log_level.unwrap_or(LevelFilter::ERROR),
            clock: self.clock.unwrap_or_else(|| Arc::new(TokioClock::new())),
            event_log: self.event_log,
            instance_hook: self.instance_hook,
        })
    }
}

//! Clock abstraction for actor deadlines and the idle sweep.
//!
//! The engine never reads a process-wide clock. A [`Clock`] instance is
//! created with the [`EngineConfig`](crate::EngineConfig) and threaded
//! through the actor directory and the sweep task, so tests can substitute
//! their own notion of time.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Provider trait for monotonic time.
///
/// ## Time Semantics
///
/// - `now()`: elapsed time since the clock was created. Only differences
///   between two readings of the same clock are meaningful.
/// - `sleep()`: suspend the caller for the given duration of this clock's time.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Get the current monotonic time.
    fn now(&self) -> Duration;

    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by Tokio's time facilities.
///
/// Built on [`tokio::time::Instant`], so a paused test runtime
/// (`#[tokio::test(start_paused = true)]`) drives it deterministically.
#[derive(Debug, Clone)]
pub struct TokioClock {
    /// Start time for calculating elapsed duration
    start_time: tokio::time::Instant,
}

impl TokioClock {
    /// Create a new Tokio clock starting at zero.
    pub fn new() -> Self {
        Self {
            start_time: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(clock.now(), Duration::from_secs(5));

        clock.sleep(Duration::from_secs(10)).await;
        assert_eq!(clock.now(), Duration::from_secs(15));
    }
}

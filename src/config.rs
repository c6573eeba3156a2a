//! Driver configuration.

use std::time::Duration;

/// Tunables for one driver instance.
///
/// `Default` resolves overrides from the environment (loading a `.env`
/// file if present); explicit construction via the `with_*` builders wins
/// over both.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Tolerance applied when a pipeline does not set its own
    /// (percentage of failed batch instances still acceptable).
    pub default_batch_tolerance: u8,
    /// Minimum interval between throttled (debug-level) progress reports.
    pub progress_throttle: Duration,
    /// Event queue capacity; zero means unbounded.
    pub event_channel_capacity: usize,
    /// Delay before re-dispatching a task whose enqueue failed.
    pub dispatch_retry_delay: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        dotenvy::dotenv().ok();
        let default_batch_tolerance = std::env::var("FLOWLINE_BATCH_TOLERANCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(crate::pipeline::DEFAULT_BATCH_TOLERANCE);
        let progress_throttle = std::env::var("FLOWLINE_PROGRESS_THROTTLE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(1));
        Self {
            default_batch_tolerance,
            progress_throttle,
            event_channel_capacity: 0,
            dispatch_retry_delay: Duration::from_secs(1),
        }
    }
}

impl DriverConfig {
    #[must_use]
    pub fn with_batch_tolerance(mut self, tolerance: u8) -> Self {
        self.default_batch_tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn with_progress_throttle(mut self, throttle: Duration) -> Self {
        self.progress_throttle = throttle;
        self
    }

    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_dispatch_retry_delay(mut self, delay: Duration) -> Self {
        self.dispatch_retry_delay = delay;
        self
    }
}

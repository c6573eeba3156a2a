//! Progress reporting.
//!
//! The driver publishes progress on every meaningful state change. Node
//! completions are reported immediately; noisy per-instance updates
//! (batch elements, in-flight status flips) go through a leading-edge
//! throttle so a thousand-element batch does not produce a thousand
//! notifications a second. Reporting is fire-and-forget: a slow or
//! failing reporter never blocks the event loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::types::{JobId, JobStatus, TaskStatus};

/// One progress notification.
#[derive(Clone, Debug, Serialize)]
pub struct ProgressUpdate {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Completed percentage over nodes, 0.0–100.0.
    pub progress: f64,
    /// Human-readable detail, e.g. `"2/3 nodes done"`.
    pub details: String,
    /// Per-node status breakdown at the time of the update.
    pub nodes: Vec<(String, TaskStatus)>,
}

/// Sink for progress notifications.
///
/// Implementations must be cheap and non-blocking; anything expensive
/// belongs behind a channel on the implementor's side.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Default reporter: structured tracing output.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, update: ProgressUpdate) {
        tracing::info!(
            job = %update.job_id,
            status = %update.status,
            progress = format_args!("{:.0}%", update.progress),
            "{}",
            update.details
        );
    }
}

/// Throttling front-end the driver publishes through.
///
/// `info` updates always pass; `debug` updates pass at most once per
/// throttle window (leading edge, later calls in the window are dropped).
pub struct ProgressPublisher {
    reporter: Arc<dyn ProgressReporter>,
    throttle: Duration,
    last_debug: Option<Instant>,
}

impl ProgressPublisher {
    #[must_use]
    pub fn new(reporter: Arc<dyn ProgressReporter>, throttle: Duration) -> Self {
        Self {
            reporter,
            throttle,
            last_debug: None,
        }
    }

    /// Report a significant change (node completion, job transition).
    pub fn info(&mut self, update: ProgressUpdate) {
        self.reporter.report(update);
    }

    /// Report a noisy change, subject to the throttle window.
    pub fn debug(&mut self, update: ProgressUpdate) {
        let due = self
            .last_debug
            .is_none_or(|last| last.elapsed() >= self.throttle);
        if due {
            self.last_debug = Some(Instant::now());
            self.reporter.report(update);
        }
    }
}

//! The per-job event queue.
//!
//! Every signal a driver reacts to — task status changes from the
//! distribution layer, dispatch acknowledgement failures, external stop
//! requests — arrives through one flume channel consumed by that job's
//! event loop. Serializing everything through a single consumer is what
//! makes the "one owner per job's graph" invariant hold without locks:
//! a stop can never race a completion update.
//!
//! [`DriverHandle`] is the cheap, cloneable sending side handed to the
//! embedding service; the driver keeps the receiver.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{TaskId, TaskStatus};

/// A task status change reported by the external job-distribution layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskEvent {
    #[must_use]
    pub fn new(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            task_id,
            status,
            result: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Everything a driver's event loop consumes.
#[derive(Clone, Debug)]
pub enum DriverEvent {
    /// Status change for one task instance.
    Task(TaskEvent),
    /// A fire-and-forget enqueue did not reach the distribution layer.
    DispatchFailed { task_id: TaskId, reason: String },
    /// External stop/pause request.
    Stop { reason: String },
}

/// Errors from the sending side of the event queue.
#[derive(Debug, Error, Diagnostic)]
pub enum HandleError {
    /// The driver finished (or was dropped) and no longer consumes events.
    #[error("driver is gone; event not delivered")]
    #[diagnostic(
        code(flowline::events::driver_gone),
        help("Terminal jobs stop consuming events; late deliveries are expected and safe to drop.")
    )]
    DriverGone,
}

/// Sending side of a job's event queue.
///
/// Clone freely: one handle per event source (task watcher, stop
/// endpoint, dispatcher acknowledgement path).
#[derive(Clone, Debug)]
pub struct DriverHandle {
    tx: flume::Sender<DriverEvent>,
}

impl DriverHandle {
    /// Deliver a task status change.
    pub fn task_event(&self, event: TaskEvent) -> Result<(), HandleError> {
        self.send(DriverEvent::Task(event))
    }

    /// Request graceful termination of the job.
    pub fn stop(&self, reason: impl Into<String>) -> Result<(), HandleError> {
        self.send(DriverEvent::Stop {
            reason: reason.into(),
        })
    }

    pub(crate) fn send(&self, event: DriverEvent) -> Result<(), HandleError> {
        self.tx.send(event).map_err(|_| HandleError::DriverGone)
    }
}

/// Build a job's event queue.
///
/// `capacity` of zero means unbounded (the default configuration); the
/// driver drains promptly, so bounding is only useful to surface a wedged
/// embedding.
#[must_use]
pub(crate) fn channel(capacity: usize) -> (DriverHandle, flume::Receiver<DriverEvent>) {
    let (tx, rx) = if capacity == 0 {
        flume::unbounded()
    } else {
        flume::bounded(capacity)
    };
    (DriverHandle { tx }, rx)
}

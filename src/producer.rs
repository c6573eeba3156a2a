//! Port to the external job-distribution layer.
//!
//! The engine never talks to workers directly: it enqueues
//! [`TaskDescriptor`]s and best-effort cancels by task id. Delivery,
//! retry, and stall detection are owned by the layer behind this trait.
//! Implementations are injected at driver construction (no module-level
//! singletons).

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{JobId, TaskId};

/// Everything the distribution layer needs to run one task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub node_name: String,
    pub algorithm_name: String,
    #[serde(default)]
    pub batch_index: Option<usize>,
    /// Fully resolved input payload (a JSON array).
    pub input: Value,
}

/// Errors from the distribution layer.
#[derive(Debug, Error, Diagnostic)]
pub enum ProducerError {
    #[error("enqueue of task {task_id} failed: {reason}")]
    #[diagnostic(
        code(flowline::producer::enqueue),
        help("Enqueue failures are transient; the task reverts to `created` and is retried.")
    )]
    Enqueue { task_id: TaskId, reason: String },

    #[error("cancel of task {task_id} failed: {reason}")]
    #[diagnostic(code(flowline::producer::cancel))]
    Cancel { task_id: TaskId, reason: String },
}

/// Submission side of the external job-distribution layer.
#[async_trait]
pub trait TaskProducer: Send + Sync {
    /// Enqueue one task for execution. Returning `Ok` acknowledges that
    /// the layer accepted the descriptor, not that work has started;
    /// progress arrives later as [`TaskEvent`](crate::events::TaskEvent)s.
    async fn enqueue(&self, descriptor: TaskDescriptor) -> Result<(), ProducerError>;

    /// Best-effort cancellation of an already-enqueued task. The engine
    /// logs failures and moves on; it never waits on cancellation.
    async fn cancel(&self, task_id: &TaskId) -> Result<(), ProducerError>;
}

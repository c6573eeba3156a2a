//! Task dispatch: from recorded instances to enqueued descriptors.
//!
//! Dispatch is fire-and-forget from the event loop's perspective: the
//! enqueue call runs on a spawned task, and a failed enqueue comes back
//! into the job's event queue as [`DriverEvent::DispatchFailed`] so the
//! driver can revert the instance and retry. Exactly one enqueue call is
//! made per instance per dispatch.

use std::sync::Arc;
use std::time::Duration;

use crate::events::{DriverEvent, DriverHandle};
use crate::graph::TaskInstance;
use crate::producer::{TaskDescriptor, TaskProducer};
use crate::types::{JobId, TaskId};

/// Hands task instances to the external job-distribution layer.
pub struct TaskDispatcher {
    job_id: JobId,
    producer: Arc<dyn TaskProducer>,
    events: DriverHandle,
}

impl TaskDispatcher {
    #[must_use]
    pub fn new(job_id: JobId, producer: Arc<dyn TaskProducer>, events: DriverHandle) -> Self {
        Self {
            job_id,
            producer,
            events,
        }
    }

    /// Build the wire descriptor for an instance.
    #[must_use]
    pub fn descriptor(&self, task: &TaskInstance) -> TaskDescriptor {
        TaskDescriptor {
            task_id: task.task_id.clone(),
            job_id: self.job_id.clone(),
            node_name: task.node_name.clone(),
            algorithm_name: task.algorithm_name.clone(),
            batch_index: task.batch_index,
            input: task.input.clone(),
        }
    }

    /// Submit an instance without blocking the caller.
    pub fn dispatch(&self, task: &TaskInstance) {
        self.dispatch_after(task, Duration::ZERO);
    }

    /// Submit an instance after a delay (enqueue-failure retry path).
    pub fn dispatch_after(&self, task: &TaskInstance, delay: Duration) {
        let descriptor = self.descriptor(task);
        let producer = Arc::clone(&self.producer);
        let events = self.events.clone();
        let task_id = task.task_id.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(err) = producer.enqueue(descriptor).await {
                tracing::warn!(task = %task_id, error = %err, "task enqueue failed");
                // The driver may already be terminal; a dropped ack is fine.
                let _ = events.send(DriverEvent::DispatchFailed {
                    task_id,
                    reason: err.to_string(),
                });
            }
        });
    }

    /// Best-effort cancellation of in-flight instances.
    ///
    /// Failures are logged and otherwise ignored; the driver never waits
    /// for cancellation acknowledgement.
    pub fn cancel_all(&self, task_ids: Vec<TaskId>) {
        let producer = Arc::clone(&self.producer);
        let job_id = self.job_id.clone();
        tokio::spawn(async move {
            for task_id in task_ids {
                if let Err(err) = producer.cancel(&task_id).await {
                    tracing::warn!(
                        job = %job_id,
                        task = %task_id,
                        error = %err,
                        "task cancellation failed"
                    );
                }
            }
        });
    }
}

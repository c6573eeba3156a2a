#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use flowline::producer::{ProducerError, TaskDescriptor, TaskProducer};
use flowline::progress::{ProgressReporter, ProgressUpdate};
use flowline::types::TaskId;
use parking_lot::Mutex;

/// Test double for the job-distribution layer: records every enqueue and
/// cancel, and can be told to reject the next N enqueues.
#[derive(Default)]
pub struct RecordingProducer {
    enqueued: Mutex<Vec<TaskDescriptor>>,
    cancelled: Mutex<Vec<TaskId>>,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
}

impl RecordingProducer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject the next `n` enqueue calls.
    pub fn fail_next_enqueues(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn enqueued(&self) -> Vec<TaskDescriptor> {
        self.enqueued.lock().clone()
    }

    pub fn enqueue_count(&self) -> usize {
        self.enqueued.lock().len()
    }

    /// Enqueue calls made, including rejected ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        self.cancelled.lock().clone()
    }

    /// Descriptors enqueued for one node, in order.
    pub fn enqueued_for(&self, node: &str) -> Vec<TaskDescriptor> {
        self.enqueued
            .lock()
            .iter()
            .filter(|d| d.node_name == node)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskProducer for RecordingProducer {
    async fn enqueue(&self, descriptor: TaskDescriptor) -> Result<(), ProducerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(ProducerError::Enqueue {
                task_id: descriptor.task_id,
                reason: "injected enqueue failure".to_string(),
            });
        }
        self.enqueued.lock().push(descriptor);
        Ok(())
    }

    async fn cancel(&self, task_id: &TaskId) -> Result<(), ProducerError> {
        self.cancelled.lock().push(task_id.clone());
        Ok(())
    }
}

/// Progress reporter capturing every update for assertions.
#[derive(Default)]
pub struct RecordingReporter {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().clone()
    }

    pub fn last(&self) -> Option<ProgressUpdate> {
        self.updates.lock().last().cloned()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, update: ProgressUpdate) {
        self.updates.lock().push(update);
    }
}

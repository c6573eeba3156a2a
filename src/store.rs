//! Port to the persisted coordination store, plus persisted data shapes.
//!
//! The store is the source of truth across driver restarts: every task
//! state change is written through before the in-memory graph is
//! considered current, and recovery rebuilds the graph from
//! [`JobRecord::tasks`]. The persisted structs are serde-friendly and
//! deliberately decoupled from the in-memory types; conversion lives here
//! so backends stay lean and declarative.
//!
//! This module does no I/O of its own beyond the in-memory reference
//! backend; real backends (etcd, a SQL store) live with the embedding
//! service.

use async_trait::async_trait;
use chrono::Utc;
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::graph::TaskInstance;
use crate::types::{JobId, JobStatus, TaskId, TaskStatus};

/// Persisted shape of one task instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedTask {
    pub task_id: TaskId,
    pub node_name: String,
    pub algorithm_name: String,
    #[serde(default)]
    pub batch_index: Option<usize>,
    pub input: Value,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// RFC3339 string form (keeps chrono::DateTime out of the serialized shape).
    pub created_at: String,
    #[serde(default)]
    pub ended_at: Option<String>,
}

impl From<&TaskInstance> for PersistedTask {
    fn from(task: &TaskInstance) -> Self {
        PersistedTask {
            task_id: task.task_id.clone(),
            node_name: task.node_name.clone(),
            algorithm_name: task.algorithm_name.clone(),
            batch_index: task.batch_index,
            input: task.input.clone(),
            status: task.status,
            result: task.result.clone(),
            error: task.error.clone(),
            created_at: task.created_at.to_rfc3339(),
            ended_at: task.ended_at.map(|t| t.to_rfc3339()),
        }
    }
}

impl From<PersistedTask> for TaskInstance {
    fn from(p: PersistedTask) -> Self {
        let created_at = chrono::DateTime::parse_from_rfc3339(&p.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let ended_at = p.ended_at.as_deref().and_then(|s| {
            chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        });
        TaskInstance {
            task_id: p.task_id,
            node_name: p.node_name,
            algorithm_name: p.algorithm_name,
            batch_index: p.batch_index,
            input: p.input,
            status: p.status,
            result: p.result,
            error: p.error,
            created_at,
            ended_at,
        }
    }
}

/// Final persisted result of a job: output on completion, error on
/// failure, neither on an external stop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Everything persisted under one job id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub tasks: Vec<PersistedTask>,
    #[serde(default)]
    pub result: Option<JobResult>,
}

/// Errors from the persisted store.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("store backend error: {reason}")]
    #[diagnostic(code(flowline::store::backend))]
    Backend { reason: String },

    #[error("persisted state failed to (de)serialize: {source}")]
    #[diagnostic(code(flowline::store::serde))]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

/// Port to the persisted coordination store shared by all drivers.
///
/// Writes must be durable when they return; the driver treats an
/// acknowledged write as the state of record.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load everything persisted for a job, `None` if the job is unknown.
    async fn load_job(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Upsert one task's persisted state, keyed by task id.
    async fn save_task(&self, job_id: &JobId, task: PersistedTask) -> Result<(), StoreError>;

    /// Record the job-level status.
    async fn set_job_status(&self, job_id: &JobId, status: JobStatus) -> Result<(), StoreError>;

    /// Record the job's final result or error.
    async fn set_job_result(&self, job_id: &JobId, result: JobResult) -> Result<(), StoreError>;

    /// Read back the job-level status.
    async fn job_status(&self, job_id: &JobId) -> Result<Option<JobStatus>, StoreError>;

    /// Read back the final result, once terminal.
    async fn job_result(&self, job_id: &JobId) -> Result<Option<JobResult>, StoreError>;
}

/// In-memory [`StateStore`] for tests and single-process embeddings.
#[derive(Default)]
pub struct InMemoryStateStore {
    jobs: RwLock<FxHashMap<JobId, JobRecord>>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a job record, e.g. task history for recovery scenarios.
    pub fn seed(&self, job_id: JobId, record: JobRecord) {
        self.jobs.write().insert(job_id, record);
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load_job(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.jobs.read().get(job_id).cloned())
    }

    async fn save_task(&self, job_id: &JobId, task: PersistedTask) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let record = jobs.entry(job_id.clone()).or_default();
        match record
            .tasks
            .iter_mut()
            .find(|t| t.task_id == task.task_id)
        {
            Some(existing) => *existing = task,
            None => record.tasks.push(task),
        }
        Ok(())
    }

    async fn set_job_status(&self, job_id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        jobs.entry(job_id.clone()).or_default().status = Some(status);
        Ok(())
    }

    async fn set_job_result(&self, job_id: &JobId, result: JobResult) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        jobs.entry(job_id.clone()).or_default().result = Some(result);
        Ok(())
    }

    async fn job_status(&self, job_id: &JobId) -> Result<Option<JobStatus>, StoreError> {
        Ok(self.jobs.read().get(job_id).and_then(|r| r.status))
    }

    async fn job_result(&self, job_id: &JobId) -> Result<Option<JobResult>, StoreError> {
        Ok(self.jobs.read().get(job_id).and_then(|r| r.result.clone()))
    }
}

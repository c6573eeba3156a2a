//! Core types for the flowline execution engine.
//!
//! This module defines the fundamental vocabulary shared across the crate:
//! job and task identifiers, the closed status enums that drive readiness
//! and tolerance calculations, and the node state-type tag.
//!
//! Statuses are deliberately closed enums (not strings) so that the
//! driver's terminal/tolerance logic is exhaustive and statically checked.
//!
//! # Key Types
//!
//! - [`TaskStatus`]: lifecycle of a single dispatchable task instance
//! - [`JobStatus`]: lifecycle of a whole pipeline job
//! - [`StateType`]: stateless vs. stateful node tag
//! - [`JobId`] / [`TaskId`]: newtype identifiers
//!
//! # Examples
//!
//! ```rust
//! use flowline::types::{TaskStatus, JobStatus};
//!
//! assert!(TaskStatus::Succeed.is_terminal());
//! assert!(!TaskStatus::Stalled.is_terminal());
//! assert!(JobStatus::Failed.is_terminal());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a single [`TaskInstance`](crate::graph::TaskInstance).
///
/// Task statuses arrive from the external job-distribution layer
/// at-least-once and possibly out of order; the graph model absorbs
/// duplicate terminal updates, so terminality must be queryable here.
///
/// `Stalled` is a precursor state: the external layer flags a task that
/// stopped reporting progress, and the same task may later resolve to
/// either `Succeed` or `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Instance exists in the graph but has not been handed to the
    /// distribution layer yet (or reverted here after a failed enqueue).
    Created,
    /// Enqueued, waiting for a worker.
    Pending,
    /// Picked up by a worker and running.
    Active,
    /// Finished successfully.
    Succeed,
    /// Finished with an error.
    Failed,
    /// Stopped reporting progress; may still resolve to succeed or failed.
    Stalled,
    /// Cancelled by an external stop.
    Stopped,
}

impl TaskStatus {
    /// Returns `true` for statuses that end an instance's lifecycle.
    ///
    /// A terminal status is absorbing: re-applying any terminal update to
    /// an already-terminal instance is a no-op.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeed | Self::Failed | Self::Stopped)
    }

    /// Returns `true` if the instance has been handed to the distribution
    /// layer and is not yet terminal.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Active | Self::Stalled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Succeed => "succeed",
            Self::Failed => "failed",
            Self::Stalled => "stalled",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle status of a pipeline job.
///
/// `Pending → Active ⇄ Recovering → {Completed | Failed | Stopped}`;
/// the three terminal states are absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Definition loaded, graph not started yet.
    Pending,
    /// Executing: tasks in flight, events being consumed.
    Active,
    /// Rebuilding in-memory state from persisted task history.
    Recovering,
    /// Every node terminal and tolerance satisfied; results persisted.
    Completed,
    /// A fatal error ended the job; reason persisted.
    Failed,
    /// An external stop ended the job.
    Stopped,
}

impl JobStatus {
    /// Returns `true` for absorbing job states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Recovering => "recovering",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Whether a node participates in the graph as plain stateless work or as a
/// long-lived stateful stage.
///
/// Stateful nodes are scheduled at job start regardless of their parents,
/// since they consume their inputs as streams rather than as one-shot
/// resolved values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    #[default]
    Stateless,
    Stateful,
}

/// Identifier of a job: one submitted pipeline execution.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a single dispatchable task instance.
///
/// Formatted as `<algorithm>:<uuid-v4>`, issued exactly once per
/// (node, batch-index) pair per job attempt.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Issue a fresh collision-resistant id for the given algorithm.
    #[must_use]
    pub fn issue(algorithm: &str) -> Self {
        Self(format!("{algorithm}:{}", uuid::Uuid::new_v4()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

//! Graph nodes and their dispatchable task instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::{InputExpr, NodeSpec};
use crate::types::{StateType, TaskId, TaskStatus};

/// One dispatchable unit of work: a node, or one element of a node's
/// batch fan-out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskInstance {
    pub task_id: TaskId,
    pub node_name: String,
    pub algorithm_name: String,
    /// `Some(i)` when this instance is element `i` of a batch fan-out.
    pub batch_index: Option<usize>,
    /// Fully resolved input payload (a JSON array).
    pub input: Value,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskInstance {
    /// Create a fresh instance in `Created` status with a newly issued id.
    #[must_use]
    pub fn new(
        node_name: impl Into<String>,
        algorithm_name: impl Into<String>,
        input: Value,
        batch_index: Option<usize>,
    ) -> Self {
        let algorithm_name = algorithm_name.into();
        Self {
            task_id: TaskId::issue(&algorithm_name),
            node_name: node_name.into(),
            algorithm_name,
            batch_index,
            input,
            status: TaskStatus::Created,
            result: None,
            error: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }
}

/// Mutable per-job state of one declared pipeline node.
///
/// A node has exactly one [`TaskInstance`] unless it fans out into a
/// batch, in which case it has N, indexed `0..N-1`. The aggregated
/// `result` is populated once all instances are terminal and the node's
/// tolerance policy is satisfied.
#[derive(Clone, Debug)]
pub struct GraphNode {
    pub node_name: String,
    pub algorithm_name: String,
    pub state_type: StateType,
    /// Parsed input expressions, produced once at graph build time.
    pub input: Vec<InputExpr>,
    /// Node-level status rollup; terminal only via completion or stop.
    pub status: TaskStatus,
    pub tasks: Vec<TaskInstance>,
    /// Aggregated result: the single task's result, or one element per
    /// batch index (excused failures contribute `null`).
    pub result: Option<Value>,
    /// Non-fatal notes: excused batch failures, cancellation problems.
    pub warnings: Vec<String>,
}

impl GraphNode {
    pub(crate) fn from_spec(spec: &NodeSpec, input: Vec<InputExpr>) -> Self {
        Self {
            node_name: spec.node_name.clone(),
            algorithm_name: spec.algorithm_name.clone(),
            state_type: spec.state_type,
            input,
            status: TaskStatus::Created,
            tasks: Vec::new(),
            result: None,
            warnings: Vec::new(),
        }
    }

    /// True once any task instance has been created for this node.
    ///
    /// Used as the re-trigger guard: wait-any nodes and recovery
    /// scheduling only dispatch nodes that have no instances yet.
    #[must_use]
    pub fn is_dispatched(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// True when the node-level status is absorbing.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when any input position carries the wait-any marker.
    #[must_use]
    pub fn has_wait_any(&self) -> bool {
        self.input.iter().any(InputExpr::is_wait_any)
    }

    /// True when any input position carries the batch marker.
    #[must_use]
    pub fn has_batch(&self) -> bool {
        self.input.iter().any(InputExpr::is_batch)
    }
}

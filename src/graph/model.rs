//! The per-job graph model: nodes, cached adjacency, task state.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use super::node::{GraphNode, TaskInstance};
use crate::pipeline::{ExprParseError, Pipeline};
use crate::types::{TaskId, TaskStatus};
use crate::utils::json_path;

/// Errors raised by graph queries and mutations.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("node not found: {node}")]
    #[diagnostic(code(flowline::graph::node_not_found))]
    NodeNotFound { node: String },

    #[error("task not found: {task_id}")]
    #[diagnostic(code(flowline::graph::task_not_found))]
    TaskNotFound { task_id: TaskId },

    #[error("parents of `{node}` are not all resolved: `{parent}` has no result yet")]
    #[diagnostic(
        code(flowline::graph::incomplete_parents),
        help("parents_results is only valid once every parent is terminal-succeed.")
    )]
    IncompleteParents { node: String, parent: String },

    #[error("node `{node}` batch input must be an array, got {got}")]
    #[diagnostic(code(flowline::graph::invalid_batch_input))]
    InvalidBatchInput { node: String, got: &'static str },

    #[error("node `{node}` batch input is an empty array")]
    #[diagnostic(
        code(flowline::graph::empty_batch),
        help("A batch node with zero elements would never complete.")
    )]
    EmptyBatch { node: String },

    #[error("node `{node}` already has task instances")]
    #[diagnostic(
        code(flowline::graph::already_dispatched),
        help("A task id is issued at most once per (node, batch-index) pair.")
    )]
    AlreadyDispatched { node: String },

    #[error("node `{node}`: {source}")]
    #[diagnostic(code(flowline::graph::expression))]
    Expression {
        node: String,
        #[source]
        source: ExprParseError,
    },
}

/// A status/result/error update for one task instance, as delivered by the
/// external job-distribution layer.
#[derive(Clone, Debug, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl TaskUpdate {
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
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

/// Per-status instance counts for one node, used by the tolerance policy.
#[derive(Clone, Debug, Default)]
pub struct NodeStatesSummary {
    counts: FxHashMap<TaskStatus, usize>,
    total: usize,
}

impl NodeStatesSummary {
    #[must_use]
    pub fn count(&self, status: TaskStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    #[must_use]
    pub fn terminal(&self) -> usize {
        self.counts
            .iter()
            .filter(|(s, _)| s.is_terminal())
            .map(|(_, n)| n)
            .sum()
    }
}

/// Outcome of finalizing a node whose instances are all terminal.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeCompletion {
    /// All instances succeeded, or failures stayed under tolerance.
    Succeed { result: Value, excused: usize },
    /// Failure ratio reached tolerance (batch) or the single task failed.
    Failed { reason: String },
}

/// In-memory representation of one job's graph.
///
/// Holds every [`GraphNode`] keyed by name (declaration order preserved),
/// the parent/child adjacency cached from the pipeline's edge list (edge
/// declaration order preserved), and an index from task id to owning
/// node. Mutated exclusively by the driver that owns the job.
#[derive(Clone, Debug, Default)]
pub struct GraphModel {
    nodes: FxHashMap<String, GraphNode>,
    order: Vec<String>,
    children: FxHashMap<String, Vec<String>>,
    parents: FxHashMap<String, Vec<String>>,
    task_index: FxHashMap<TaskId, String>,
}

impl GraphModel {
    /// Build the model for a validated pipeline.
    ///
    /// Parses every node's input expressions and caches the adjacency in
    /// edge declaration order. Structural problems (cycles, unknown
    /// references) are the validator's job; only expression parsing can
    /// fail here.
    pub fn new(pipeline: &Pipeline) -> Result<Self, GraphError> {
        let mut model = Self::default();
        for spec in &pipeline.nodes {
            model.add_node(spec)?;
        }
        for edge in &pipeline.edges {
            model
                .children
                .entry(edge.source.clone())
                .or_default()
                .push(edge.target.clone());
            model
                .parents
                .entry(edge.target.clone())
                .or_default()
                .push(edge.source.clone());
        }
        Ok(model)
    }

    /// Add one declared node to the model, parsing its input expressions.
    pub fn add_node(&mut self, spec: &crate::pipeline::NodeSpec) -> Result<(), GraphError> {
        let input = spec
            .parsed_input()
            .map_err(|source| GraphError::Expression {
                node: spec.node_name.clone(),
                source,
            })?;
        self.order.push(spec.node_name.clone());
        self.nodes
            .insert(spec.node_name.clone(), GraphNode::from_spec(spec, input));
        Ok(())
    }

    /// Look up a node.
    pub fn node(&self, name: &str) -> Result<&GraphNode, GraphError> {
        self.nodes.get(name).ok_or_else(|| GraphError::NodeNotFound {
            node: name.to_string(),
        })
    }

    fn node_mut(&mut self, name: &str) -> Result<&mut GraphNode, GraphError> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| GraphError::NodeNotFound {
                node: name.to_string(),
            })
    }

    /// Node names in declaration order.
    #[must_use]
    pub fn node_names(&self) -> &[String] {
        &self.order
    }

    /// Children of `name` in edge declaration order.
    #[must_use]
    pub fn children(&self, name: &str) -> &[String] {
        self.children.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parents of `name` in edge declaration order.
    #[must_use]
    pub fn parents(&self, name: &str) -> &[String] {
        self.parents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes with no parents, in declaration order.
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| self.parents(name).is_empty())
            .cloned()
            .collect()
    }

    /// Each parent's aggregated result, in edge declaration order.
    ///
    /// Fails with [`GraphError::IncompleteParents`] if any parent has not
    /// reached terminal success.
    pub fn parents_results(&self, name: &str) -> Result<Vec<Value>, GraphError> {
        self.node(name)?;
        let mut results = Vec::new();
        for parent in self.parents(name) {
            let parent_node = self.node(parent)?;
            match (&parent_node.status, &parent_node.result) {
                (TaskStatus::Succeed, Some(result)) => results.push(result.clone()),
                _ => {
                    return Err(GraphError::IncompleteParents {
                        node: name.to_string(),
                        parent: parent.clone(),
                    });
                }
            }
        }
        Ok(results)
    }

    /// True iff every parent of `name` is terminal.
    pub fn is_all_parents_finished(&self, name: &str) -> Result<bool, GraphError> {
        self.node(name)?;
        for parent in self.parents(name) {
            if !self.node(parent)?.is_terminal() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Record the single task instance of a non-batch node.
    pub fn record_task(&mut self, task: TaskInstance) -> Result<(), GraphError> {
        let name = task.node_name.clone();
        let task_id = task.task_id.clone();
        let node = self.node_mut(&name)?;
        if node.is_dispatched() {
            return Err(GraphError::AlreadyDispatched { node: name });
        }
        node.status = task.status;
        node.tasks.push(task);
        self.task_index.insert(task_id, name);
        Ok(())
    }

    /// Expand a node into one task instance per batch element.
    ///
    /// `batch_inputs` must be an array of per-element input payloads; each
    /// element becomes an instance with its batch index. Fails with
    /// [`GraphError::InvalidBatchInput`] for non-arrays and
    /// [`GraphError::EmptyBatch`] for zero elements (such a node could
    /// never complete).
    pub fn add_batch(
        &mut self,
        name: &str,
        batch_inputs: &Value,
    ) -> Result<Vec<TaskInstance>, GraphError> {
        let node = self.node_mut(name)?;
        if node.is_dispatched() {
            return Err(GraphError::AlreadyDispatched {
                node: name.to_string(),
            });
        }
        let Value::Array(items) = batch_inputs else {
            return Err(GraphError::InvalidBatchInput {
                node: name.to_string(),
                got: json_path::value_type(batch_inputs),
            });
        };
        if items.is_empty() {
            return Err(GraphError::EmptyBatch {
                node: name.to_string(),
            });
        }

        let algorithm = node.algorithm_name.clone();
        let mut created = Vec::with_capacity(items.len());
        for (index, input) in items.iter().enumerate() {
            let task = TaskInstance::new(name, algorithm.clone(), input.clone(), Some(index));
            self.task_index.insert(task.task_id.clone(), name.to_string());
            created.push(task);
        }
        let node = self.node_mut(name)?;
        node.tasks.extend(created.iter().cloned());
        Ok(created)
    }

    /// Re-attach a task instance recovered from persisted history.
    ///
    /// Unlike [`record_task`](Self::record_task) this accepts batch
    /// instances and pre-terminal statuses as-is, and never issues new
    /// ids. Fails with [`GraphError::NodeNotFound`] when the history row
    /// references a node the pipeline no longer declares.
    pub fn restore_task(&mut self, task: TaskInstance) -> Result<(), GraphError> {
        let name = task.node_name.clone();
        let task_id = task.task_id.clone();
        let node = self.node_mut(&name)?;
        if !node.is_terminal() {
            // Terminal node status is only ever assigned by the completion
            // pass (try_complete_node), which also aggregates the result;
            // replayed terminal instances park the node at Active until then.
            node.status = match task.batch_index {
                Some(_) => TaskStatus::Active,
                None if task.status.is_terminal() => TaskStatus::Active,
                None => task.status,
            };
        }
        node.tasks.push(task);
        self.task_index.insert(task_id, name);
        Ok(())
    }

    /// Apply a status update to a task instance.
    ///
    /// Idempotent: once an instance is terminal, any further update is a
    /// no-op and `Ok(false)` is returned. This absorbs at-least-once and
    /// out-of-order delivery from the distribution layer.
    pub fn update_task_state(
        &mut self,
        task_id: &TaskId,
        update: TaskUpdate,
    ) -> Result<bool, GraphError> {
        let node_name = self
            .task_index
            .get(task_id)
            .cloned()
            .ok_or_else(|| GraphError::TaskNotFound {
                task_id: task_id.clone(),
            })?;
        let node = self.node_mut(&node_name)?;
        let is_batch = node
            .tasks
            .iter()
            .any(|t| &t.task_id == task_id && t.batch_index.is_some());
        let task = node
            .tasks
            .iter_mut()
            .find(|t| &t.task_id == task_id)
            .ok_or_else(|| GraphError::TaskNotFound {
                task_id: task_id.clone(),
            })?;

        if task.status.is_terminal() {
            return Ok(false);
        }

        if let Some(status) = update.status {
            task.status = status;
            if status.is_terminal() {
                task.ended_at = Some(chrono::Utc::now());
            }
        }
        if let Some(result) = update.result {
            task.result = Some(result);
        }
        if let Some(error) = update.error {
            task.error = Some(error);
        }

        // Mirror in-flight statuses onto the node rollup. Batch nodes only
        // flip to Active (per-instance churn stays on the instances);
        // terminal node status is assigned by try_complete_node or stop_all.
        if let Some(status) = update.status {
            if !status.is_terminal() && !node.is_terminal() {
                if !is_batch {
                    node.status = status;
                } else if status == TaskStatus::Active {
                    node.status = TaskStatus::Active;
                }
            }
        }
        Ok(true)
    }

    /// Look up a task instance by id.
    #[must_use]
    pub fn task(&self, task_id: &TaskId) -> Option<&TaskInstance> {
        let node_name = self.task_index.get(task_id)?;
        self.nodes
            .get(node_name)?
            .tasks
            .iter()
            .find(|t| &t.task_id == task_id)
    }

    /// Force a node into terminal failure (tolerance breach).
    pub fn fail_node(&mut self, name: &str) -> Result<(), GraphError> {
        self.node_mut(name)?.status = TaskStatus::Failed;
        Ok(())
    }

    /// Per-status instance counts for a node.
    pub fn node_states_summary(&self, name: &str) -> Result<NodeStatesSummary, GraphError> {
        let node = self.node(name)?;
        let mut summary = NodeStatesSummary::default();
        for task in &node.tasks {
            *summary.counts.entry(task.status).or_insert(0) += 1;
            summary.total += 1;
        }
        Ok(summary)
    }

    /// Evaluate the batch failure ratio against `tolerance` (a percentage).
    ///
    /// Returns the failure reason once `failed / total * 100 >= tolerance`
    /// with at least one failure, `None` otherwise. Evaluated on the
    /// current instance set, so a node can fail while siblings are still
    /// in flight.
    pub fn check_batch_tolerance(
        &self,
        name: &str,
        tolerance: u8,
    ) -> Result<Option<String>, GraphError> {
        let summary = self.node_states_summary(name)?;
        let failed = summary.failed();
        let total = summary.total();
        if failed == 0 || total == 0 {
            return Ok(None);
        }
        let percent = failed * 100 / total;
        if percent < tolerance as usize {
            return Ok(None);
        }
        let node = self.node(name)?;
        let last_error = node
            .tasks
            .iter()
            .filter_map(|t| t.error.as_deref())
            .next_back()
            .unwrap_or("unknown error");
        Ok(Some(format!(
            "{failed}/{total} ({percent}%) failed tasks, batch tolerance is {tolerance}%, error: {last_error}"
        )))
    }

    /// Finalize a node whose instances are all terminal.
    ///
    /// Returns `None` while instances are still pending, the node has not
    /// been dispatched, or the node is already terminal (idempotent). On
    /// completion the node's status and aggregated result are written
    /// back: a batch node aggregates per-index results with `null` for
    /// excused failures (each recorded as a warning); a single-instance
    /// node adopts its task's result or error.
    pub fn try_complete_node(
        &mut self,
        name: &str,
        tolerance: u8,
    ) -> Result<Option<NodeCompletion>, GraphError> {
        {
            let node = self.node(name)?;
            if node.is_terminal() || !node.is_dispatched() {
                return Ok(None);
            }
            if node.tasks.iter().any(|t| !t.status.is_terminal()) {
                return Ok(None);
            }
            if node.tasks.iter().any(|t| t.status == TaskStatus::Stopped) {
                // Externally stopped work never aggregates.
                self.node_mut(name)?.status = TaskStatus::Stopped;
                return Ok(None);
            }
        }

        let is_batch = self
            .node(name)?
            .tasks
            .iter()
            .any(|t| t.batch_index.is_some());

        let completion = if is_batch {
            if let Some(reason) = self.check_batch_tolerance(name, tolerance)? {
                NodeCompletion::Failed { reason }
            } else {
                let node = self.node(name)?;
                let mut slots = vec![Value::Null; node.tasks.len()];
                let mut warnings = Vec::new();
                let mut excused = 0;
                for task in &node.tasks {
                    let index = task.batch_index.unwrap_or(0);
                    match task.status {
                        TaskStatus::Succeed => {
                            if let (Some(result), Some(slot)) =
                                (&task.result, slots.get_mut(index))
                            {
                                *slot = result.clone();
                            }
                        }
                        TaskStatus::Failed => {
                            excused += 1;
                            warnings.push(format!(
                                "batch instance {index} failed within tolerance: {}",
                                task.error.as_deref().unwrap_or("unknown error")
                            ));
                        }
                        _ => {}
                    }
                }
                let node = self.node_mut(name)?;
                node.warnings.extend(warnings);
                NodeCompletion::Succeed {
                    result: Value::Array(slots),
                    excused,
                }
            }
        } else {
            let node = self.node(name)?;
            let task = &node.tasks[0];
            match task.status {
                TaskStatus::Failed => NodeCompletion::Failed {
                    reason: task
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("task {} failed", task.task_id)),
                },
                _ => NodeCompletion::Succeed {
                    result: task.result.clone().unwrap_or(Value::Null),
                    excused: 0,
                },
            }
        };

        let node = self.node_mut(name)?;
        match &completion {
            NodeCompletion::Succeed { result, .. } => {
                node.status = TaskStatus::Succeed;
                node.result = Some(result.clone());
            }
            NodeCompletion::Failed { .. } => {
                node.status = TaskStatus::Failed;
            }
        }
        Ok(Some(completion))
    }

    /// True iff every node has reached a terminal status.
    #[must_use]
    pub fn is_all_nodes_done(&self) -> bool {
        self.nodes.values().all(GraphNode::is_terminal)
    }

    /// Aggregated results per node in declaration order.
    #[must_use]
    pub fn all_results(&self) -> Vec<(String, Value)> {
        self.order
            .iter()
            .filter_map(|name| {
                let node = self.nodes.get(name)?;
                Some((
                    name.clone(),
                    node.result.clone().unwrap_or(Value::Null),
                ))
            })
            .collect()
    }

    /// Completed percentage: terminal nodes over all nodes.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.order.is_empty() {
            return 0.0;
        }
        let done = self.nodes.values().filter(|n| n.is_terminal()).count();
        done as f64 / self.order.len() as f64 * 100.0
    }

    /// Counts of nodes per status, for progress detail reporting.
    #[must_use]
    pub fn node_status_breakdown(&self) -> Vec<(String, TaskStatus)> {
        self.order
            .iter()
            .filter_map(|name| self.nodes.get(name).map(|n| (name.clone(), n.status)))
            .collect()
    }

    /// Mark every non-terminal instance and node `Stopped`.
    ///
    /// Returns the ids of instances that were in flight, for best-effort
    /// cancellation against the distribution layer.
    pub fn stop_all(&mut self) -> Vec<TaskId> {
        let mut in_flight = Vec::new();
        for node in self.nodes.values_mut() {
            for task in &mut node.tasks {
                if !task.status.is_terminal() {
                    if task.status.is_in_flight() {
                        in_flight.push(task.task_id.clone());
                    }
                    task.status = TaskStatus::Stopped;
                    task.ended_at = Some(chrono::Utc::now());
                }
            }
            if !node.is_terminal() {
                node.status = TaskStatus::Stopped;
            }
        }
        in_flight
    }

    /// All task instances across the graph, for persistence snapshots.
    #[must_use]
    pub fn all_tasks(&self) -> Vec<&TaskInstance> {
        self.order
            .iter()
            .filter_map(|name| self.nodes.get(name))
            .flat_map(|node| node.tasks.iter())
            .collect()
    }
}

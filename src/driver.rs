//! The per-job driver state machine.
//!
//! One [`PipelineDriver`] owns one job for its whole lifetime: it
//! validates the pipeline, builds the graph model, dispatches runnable
//! nodes, consumes completion events from its serialized queue, applies
//! the batch-tolerance and wait-any policies, and recovers consistent
//! state from the persisted store after a restart.
//!
//! All collaborators are injected at construction — store, producer,
//! progress reporter — so each job gets an isolated instance with a clean
//! teardown, and nothing in this module touches global state.
//!
//! # Lifecycle
//!
//! ```text
//! pending ──▶ active ⇄ recovering ──▶ { completed | failed | stopped }
//! ```
//!
//! Terminal states are absorbing. A fatal error never exits the process;
//! it lands the job in `failed` with a persisted, human-readable reason.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowline::config::DriverConfig;
//! use flowline::driver::{JobDescriptor, PipelineDriver};
//! use flowline::pipeline::{Edge, NodeSpec, Pipeline};
//! use flowline::store::InMemoryStateStore;
//! # use flowline::producer::{TaskDescriptor, TaskProducer, ProducerError};
//! # use flowline::types::TaskId;
//! # struct NullProducer;
//! # #[async_trait::async_trait]
//! # impl TaskProducer for NullProducer {
//! #     async fn enqueue(&self, _: TaskDescriptor) -> Result<(), ProducerError> { Ok(()) }
//! #     async fn cancel(&self, _: &TaskId) -> Result<(), ProducerError> { Ok(()) }
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = Pipeline::new("two-nodes")
//!     .add_node(NodeSpec::new("green", "green-alg"))
//!     .add_node(NodeSpec::new("yellow", "yellow-alg").with_input(vec!["@green".into()]))
//!     .add_edge(Edge::new("green", "yellow"));
//!
//! let (mut driver, handle) = PipelineDriver::new(
//!     JobDescriptor::new("job-1", pipeline),
//!     Arc::new(InMemoryStateStore::new()),
//!     Arc::new(NullProducer),
//!     DriverConfig::default(),
//! );
//!
//! // Wire `handle` into the distribution layer's event feed, then:
//! let outcome = driver.run().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::config::DriverConfig;
use crate::dispatch::TaskDispatcher;
use crate::events::{self, DriverEvent, DriverHandle, TaskEvent};
use crate::graph::{GraphError, GraphModel, NodeCompletion, TaskInstance, TaskUpdate};
use crate::pipeline::{Pipeline, PipelineError};
use crate::producer::TaskProducer;
use crate::progress::{ProgressPublisher, ProgressReporter, ProgressUpdate, TracingReporter};
use crate::resolver::{InputResolver, ResolveError, ResolvedInput};
use crate::store::{JobResult, PersistedTask, StateStore};
use crate::types::{JobId, JobStatus, StateType, TaskId, TaskStatus};

/// What the embedding hands a driver: the job id and its pipeline.
#[derive(Clone, Debug)]
pub struct JobDescriptor {
    pub job_id: JobId,
    pub pipeline: Pipeline,
}

impl JobDescriptor {
    pub fn new(job_id: impl Into<JobId>, pipeline: Pipeline) -> Self {
        Self {
            job_id: job_id.into(),
            pipeline,
        }
    }
}

/// Terminal result of one driver run.
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    /// All nodes finished within tolerance; `result` maps node names to
    /// their aggregated results.
    Completed { result: Value },
    /// A fatal error ended the job.
    Failed { reason: String },
    /// An external stop ended the job.
    Stopped { reason: String },
}

/// Driver errors.
///
/// Pipeline, graph, and resolution variants are fatal to the *job* (the
/// run finalizes into `JobOutcome::Failed` with the message as reason);
/// store and channel variants are infrastructure failures surfaced to the
/// embedding.
#[derive(Debug, Error, Diagnostic)]
pub enum DriverError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error("unable to find entry nodes in pipeline `{pipeline}`")]
    #[diagnostic(
        code(flowline::driver::no_entry_nodes),
        help("Every pipeline needs at least one node without parents (or a stateful node).")
    )]
    NoEntryNodes { pipeline: String },

    #[error(transparent)]
    #[diagnostic(code(flowline::driver::store))]
    Store(#[from] crate::store::StoreError),

    #[error("event channel closed while job {job_id} was still running")]
    #[diagnostic(
        code(flowline::driver::channel_closed),
        help("Keep at least one DriverHandle alive for the lifetime of the job.")
    )]
    ChannelClosed { job_id: JobId },
}

impl DriverError {
    /// True for errors that fail the job rather than the embedding.
    fn is_fatal_to_job(&self) -> bool {
        matches!(
            self,
            DriverError::Pipeline(_)
                | DriverError::Graph(_)
                | DriverError::Resolve(_)
                | DriverError::NoEntryNodes { .. }
        )
    }
}

/// The long-lived state machine owning one job's execution.
pub struct PipelineDriver {
    job_id: JobId,
    pipeline: Pipeline,
    graph: GraphModel,
    status: JobStatus,
    store: Arc<dyn StateStore>,
    dispatcher: TaskDispatcher,
    progress: ProgressPublisher,
    events: flume::Receiver<DriverEvent>,
    config: DriverConfig,
    outcome: Option<JobOutcome>,
}

impl PipelineDriver {
    /// Create a driver and the handle used to feed it events.
    ///
    /// The graph model is built lazily in [`run`](Self::run) so that
    /// definition problems follow the normal fatal-error path (persisted
    /// `failed` status) instead of failing construction.
    #[must_use]
    pub fn new(
        descriptor: JobDescriptor,
        store: Arc<dyn StateStore>,
        producer: Arc<dyn TaskProducer>,
        config: DriverConfig,
    ) -> (Self, DriverHandle) {
        let (handle, receiver) = events::channel(config.event_channel_capacity);
        let dispatcher =
            TaskDispatcher::new(descriptor.job_id.clone(), producer, handle.clone());
        let progress = ProgressPublisher::new(
            Arc::new(TracingReporter) as Arc<dyn ProgressReporter>,
            config.progress_throttle,
        );
        let driver = Self {
            job_id: descriptor.job_id,
            pipeline: descriptor.pipeline,
            graph: GraphModel::default(),
            status: JobStatus::Pending,
            store,
            dispatcher,
            progress,
            events: receiver,
            config,
            outcome: None,
        };
        (driver, handle)
    }

    /// Swap the progress reporter (default: tracing output).
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = ProgressPublisher::new(reporter, self.config.progress_throttle);
        self
    }

    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Current percentage and per-node status breakdown.
    #[must_use]
    pub fn progress(&self) -> ProgressUpdate {
        self.progress_update()
    }

    /// The terminal outcome, once the run has finished.
    #[must_use]
    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.as_ref()
    }

    /// Drive the job to a terminal state.
    ///
    /// Starts fresh or recovers from persisted history, then consumes the
    /// event queue until the graph resolves, a fatal error lands the job
    /// in `failed`, or a stop request arrives. Infrastructure errors
    /// (store write failures, a closed event channel) are returned as
    /// `Err`; everything else ends in an `Ok` outcome with the terminal
    /// state persisted.
    #[instrument(skip(self), fields(job = %self.job_id, pipeline = %self.pipeline.name), err)]
    pub async fn run(&mut self) -> Result<JobOutcome, DriverError> {
        match self.execute().await {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_fatal_to_job() => self.finalize_failed(err.to_string()).await,
            Err(err) => Err(err),
        }
    }

    async fn execute(&mut self) -> Result<JobOutcome, DriverError> {
        self.pipeline.validate()?;
        self.graph = GraphModel::new(&self.pipeline)?;
        tracing::info!("pipeline started");

        let prior = self.store.load_job(&self.job_id).await?;
        let recovered = match prior {
            Some(record) if !record.tasks.is_empty() => self.recover(record).await?,
            _ => {
                self.transition(JobStatus::Active).await?;
                self.publish_info();
                self.start_entry_nodes().await?;
                None
            }
        };
        if let Some(outcome) = recovered {
            return Ok(outcome);
        }
        self.event_loop().await
    }

    async fn event_loop(&mut self) -> Result<JobOutcome, DriverError> {
        loop {
            let event = self.events.recv_async().await.map_err(|_| {
                DriverError::ChannelClosed {
                    job_id: self.job_id.clone(),
                }
            })?;
            let outcome = match event {
                DriverEvent::Task(task_event) => self.on_task_event(task_event).await?,
                DriverEvent::DispatchFailed { task_id, reason } => {
                    self.on_dispatch_failed(task_id, reason).await?;
                    None
                }
                DriverEvent::Stop { reason } => Some(self.finalize_stopped(reason).await?),
            };
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
        }
    }

    /// Compute the starting frontier: nodes without parents plus stateful
    /// nodes, and dispatch each.
    async fn start_entry_nodes(&mut self) -> Result<(), DriverError> {
        let mut entry = self.graph.entry_nodes();
        for name in self.graph.node_names().to_vec() {
            let node = self.graph.node(&name)?;
            if node.state_type == StateType::Stateful && !entry.contains(&name) {
                entry.push(name);
            }
        }
        if entry.is_empty() {
            return Err(DriverError::NoEntryNodes {
                pipeline: self.pipeline.name.clone(),
            });
        }
        tracing::debug!(entry = ?entry, "computed entry nodes");
        for name in entry {
            self.schedule_node(&name).await?;
        }
        Ok(())
    }

    /// Resolve and dispatch one node whose parents are all finished.
    ///
    /// Idempotent: nodes that already have instances (or are terminal)
    /// are left alone, which is what makes recovery and wait-any safe to
    /// re-evaluate after every event.
    async fn schedule_node(&mut self, name: &str) -> Result<(), DriverError> {
        let node = self.graph.node(name)?;
        if node.is_dispatched() || node.is_terminal() {
            return Ok(());
        }
        let algorithm = node.algorithm_name.clone();
        let resolver = InputResolver::new(&self.pipeline.flow_input, &self.graph);
        let resolved = resolver.resolve(node)?;

        match resolved {
            ResolvedInput::Single(payload) => {
                self.launch_single(name, algorithm, payload).await?;
            }
            ResolvedInput::Batch(payloads) => {
                let created = self.graph.add_batch(name, &Value::Array(payloads))?;
                tracing::info!(node = %name, instances = created.len(), "batch fan-out");
                for mut task in created {
                    self.graph
                        .update_task_state(&task.task_id, TaskUpdate::status(TaskStatus::Pending))?;
                    task.status = TaskStatus::Pending;
                    self.persist_task(&task).await?;
                    self.dispatcher.dispatch(&task);
                }
            }
        }
        Ok(())
    }

    /// Dispatch a wait-any node from the first finished parent's result.
    async fn dispatch_wait_any(
        &mut self,
        name: &str,
        parent_result: &Value,
    ) -> Result<(), DriverError> {
        let node = self.graph.node(name)?;
        if node.is_dispatched() || node.is_terminal() {
            return Ok(());
        }
        let algorithm = node.algorithm_name.clone();
        let resolver = InputResolver::new(&self.pipeline.flow_input, &self.graph);
        let resolved = resolver.resolve_wait_any(node, parent_result)?;
        if let ResolvedInput::Single(payload) = resolved {
            self.launch_single(name, algorithm, payload).await?;
        }
        Ok(())
    }

    /// Create, record, persist, and dispatch one single-instance task.
    async fn launch_single(
        &mut self,
        name: &str,
        algorithm: String,
        payload: Value,
    ) -> Result<(), DriverError> {
        let mut task = TaskInstance::new(name, algorithm, payload, None);
        task.status = TaskStatus::Pending;
        self.graph.record_task(task.clone())?;
        self.persist_task(&task).await?;
        self.dispatcher.dispatch(&task);
        tracing::info!(node = %name, task = %task.task_id, "task dispatched");
        Ok(())
    }

    /// Apply one task event; returns the job outcome if it became terminal.
    async fn on_task_event(
        &mut self,
        event: TaskEvent,
    ) -> Result<Option<JobOutcome>, DriverError> {
        let update = TaskUpdate {
            status: Some(event.status),
            result: event.result,
            error: event.error,
        };
        let applied = match self.graph.update_task_state(&event.task_id, update) {
            Ok(applied) => applied,
            Err(GraphError::TaskNotFound { task_id }) => {
                // At-least-once delivery can outlive our interest in a
                // task (e.g. after recovery skipped its node).
                tracing::warn!(task = %task_id, "event for unknown task; ignoring");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        if !applied {
            tracing::debug!(task = %event.task_id, status = %event.status, "duplicate terminal update absorbed");
            return Ok(None);
        }

        let Some(task) = self.graph.task(&event.task_id) else {
            return Ok(None);
        };
        let node_name = task.node_name.clone();
        let batch_index = task.batch_index;
        let task_error = task.error.clone();
        let persisted = PersistedTask::from(task);
        self.store.save_task(&self.job_id, persisted).await?;

        if !event.status.is_terminal() {
            if event.status == TaskStatus::Stalled {
                tracing::warn!(task = %event.task_id, node = %node_name, "task stalled");
            }
            self.publish_debug();
            return Ok(None);
        }

        tracing::info!(task = %event.task_id, node = %node_name, status = %event.status, "task terminal");

        if event.status == TaskStatus::Failed && batch_index.is_some() {
            let tolerance = self.tolerance();
            if let Some(reason) = self.graph.check_batch_tolerance(&node_name, tolerance)? {
                self.graph.fail_node(&node_name)?;
                return Ok(Some(self.finalize_failed(reason).await?));
            }
            tracing::debug!(
                node = %node_name,
                error = task_error.as_deref().unwrap_or("unknown error"),
                "batch instance failed within tolerance"
            );
        }

        self.after_terminal(&node_name).await
    }

    /// Post-terminal bookkeeping for a node: completion, readiness of
    /// children, end-of-graph detection.
    async fn after_terminal(&mut self, node_name: &str) -> Result<Option<JobOutcome>, DriverError> {
        let tolerance = self.tolerance();
        match self.graph.try_complete_node(node_name, tolerance)? {
            Some(NodeCompletion::Failed { reason }) => {
                Ok(Some(self.finalize_failed(reason).await?))
            }
            Some(NodeCompletion::Succeed { excused, .. }) => {
                if excused > 0 {
                    tracing::warn!(node = %node_name, excused, "node succeeded with excused batch failures");
                }
                self.publish_info();
                if self.graph.is_all_nodes_done() {
                    Ok(Some(self.finalize_completed().await?))
                } else {
                    self.run_completed(node_name).await?;
                    Ok(None)
                }
            }
            None => {
                self.publish_debug();
                Ok(None)
            }
        }
    }

    /// Schedule the children of a node that just reached terminal success.
    async fn run_completed(&mut self, node_name: &str) -> Result<(), DriverError> {
        let children = self.graph.children(node_name).to_vec();
        if children.is_empty() {
            return Ok(());
        }
        let parent_result = self
            .graph
            .node(node_name)?
            .result
            .clone()
            .unwrap_or(Value::Null);

        for child in children {
            let child_node = self.graph.node(&child)?;
            if child_node.is_dispatched() || child_node.is_terminal() {
                continue;
            }
            if child_node.has_wait_any() {
                self.dispatch_wait_any(&child, &parent_result).await?;
            } else if self.graph.is_all_parents_finished(&child)? {
                self.schedule_node(&child).await?;
            }
        }
        Ok(())
    }

    /// Revert a task whose enqueue failed and retry after the configured
    /// delay. The instance never reaches a worker twice: this path only
    /// runs when the distribution layer rejected the descriptor outright.
    async fn on_dispatch_failed(
        &mut self,
        task_id: TaskId,
        reason: String,
    ) -> Result<(), DriverError> {
        tracing::warn!(task = %task_id, %reason, "dispatch failed; scheduling retry");
        let reverted = match self
            .graph
            .update_task_state(&task_id, TaskUpdate::status(TaskStatus::Created))
        {
            Ok(applied) => applied,
            Err(GraphError::TaskNotFound { .. }) => false,
            Err(err) => return Err(err.into()),
        };
        if !reverted {
            // Terminal in the meantime (stop or late completion); drop it.
            return Ok(());
        }
        self.graph
            .update_task_state(&task_id, TaskUpdate::status(TaskStatus::Pending))?;
        if let Some(task) = self.graph.task(&task_id) {
            let task = task.clone();
            self.persist_task(&task).await?;
            self.dispatcher
                .dispatch_after(&task, self.config.dispatch_retry_delay);
        }
        Ok(())
    }

    /// Rebuild graph state from persisted task history.
    ///
    /// Replays the last known status of every persisted task without
    /// re-dispatching: instances that were in flight stay owned by the
    /// distribution layer, whose events remain the source of truth for
    /// their outcome. Only nodes whose parents are now fully resolved and
    /// that were never dispatched are newly scheduled. History rows
    /// referencing nodes the pipeline no longer declares are logged and
    /// skipped.
    async fn recover(
        &mut self,
        record: crate::store::JobRecord,
    ) -> Result<Option<JobOutcome>, DriverError> {
        self.transition(JobStatus::Recovering).await?;
        tracing::info!(tasks = record.tasks.len(), "recovering from persisted state");

        for persisted in record.tasks {
            let task = TaskInstance::from(persisted);
            let task_id = task.task_id.clone();
            let status = task.status;
            match self.graph.restore_task(task) {
                Ok(()) => {
                    tracing::info!(task = %task_id, %status, "restored task");
                }
                Err(GraphError::NodeNotFound { node }) => {
                    tracing::warn!(
                        task = %task_id,
                        node = %node,
                        "persisted task references a node missing from the pipeline; skipping"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        // Completion pass: settle node-level statuses from the replayed
        // instances before looking at readiness.
        let names = self.graph.node_names().to_vec();
        let tolerance = self.tolerance();
        for name in &names {
            if let Some(NodeCompletion::Failed { reason }) =
                self.graph.try_complete_node(name, tolerance)?
            {
                return Ok(Some(self.finalize_failed(reason).await?));
            }
        }

        if self.graph.is_all_nodes_done() {
            return Ok(Some(self.finalize_completed().await?));
        }

        // Scheduling pass: children of already-succeeded nodes, then any
        // never-dispatched entry/stateful node (crash before dispatch).
        for name in &names {
            if self.graph.node(name)?.status == TaskStatus::Succeed {
                self.run_completed(name).await?;
            }
        }
        self.start_entry_nodes().await?;

        self.transition(JobStatus::Active).await?;
        self.publish_info();
        Ok(None)
    }

    async fn finalize_completed(&mut self) -> Result<JobOutcome, DriverError> {
        let mut object = serde_json::Map::new();
        for (name, result) in self.graph.all_results() {
            object.insert(name, result);
        }
        let output = Value::Object(object);
        self.store
            .set_job_result(
                &self.job_id,
                JobResult {
                    status: JobStatus::Completed,
                    output: Some(output.clone()),
                    error: None,
                },
            )
            .await?;
        self.transition(JobStatus::Completed).await?;
        self.publish_info();
        tracing::info!("pipeline completed");
        let outcome = JobOutcome::Completed { result: output };
        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    async fn finalize_failed(&mut self, reason: String) -> Result<JobOutcome, DriverError> {
        tracing::error!(%reason, "pipeline failed");
        self.halt_remaining().await?;
        self.store
            .set_job_result(
                &self.job_id,
                JobResult {
                    status: JobStatus::Failed,
                    output: None,
                    error: Some(reason.clone()),
                },
            )
            .await?;
        self.transition(JobStatus::Failed).await?;
        self.publish_info();
        let outcome = JobOutcome::Failed { reason };
        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    async fn finalize_stopped(&mut self, reason: String) -> Result<JobOutcome, DriverError> {
        tracing::info!(%reason, "pipeline stopped");
        self.halt_remaining().await?;
        self.store
            .set_job_result(
                &self.job_id,
                JobResult {
                    status: JobStatus::Stopped,
                    output: None,
                    error: None,
                },
            )
            .await?;
        self.transition(JobStatus::Stopped).await?;
        self.publish_info();
        let outcome = JobOutcome::Stopped { reason };
        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    /// Mark every non-terminal instance stopped, persist the marks, and
    /// best-effort cancel whatever was in flight.
    async fn halt_remaining(&mut self) -> Result<(), DriverError> {
        let in_flight = self.graph.stop_all();
        let snapshot: Vec<PersistedTask> = self
            .graph
            .all_tasks()
            .into_iter()
            .map(PersistedTask::from)
            .collect();
        let writes = snapshot
            .into_iter()
            .map(|persisted| self.store.save_task(&self.job_id, persisted));
        for write in futures_util::future::join_all(writes).await {
            write?;
        }
        if !in_flight.is_empty() {
            tracing::info!(count = in_flight.len(), "cancelling in-flight tasks");
            self.dispatcher.cancel_all(in_flight);
        }
        Ok(())
    }

    async fn transition(&mut self, status: JobStatus) -> Result<(), DriverError> {
        self.status = status;
        self.store.set_job_status(&self.job_id, status).await?;
        Ok(())
    }

    async fn persist_task(&self, task: &TaskInstance) -> Result<(), DriverError> {
        self.store
            .save_task(&self.job_id, PersistedTask::from(task))
            .await?;
        Ok(())
    }

    fn tolerance(&self) -> u8 {
        self.pipeline
            .options
            .batch_tolerance
            .unwrap_or(self.config.default_batch_tolerance)
    }

    fn progress_update(&self) -> ProgressUpdate {
        let nodes = self.graph.node_status_breakdown();
        let done = nodes.iter().filter(|(_, s)| s.is_terminal()).count();
        ProgressUpdate {
            job_id: self.job_id.clone(),
            status: self.status,
            progress: self.graph.progress(),
            details: format!("{done}/{} nodes done", nodes.len()),
            nodes,
        }
    }

    fn publish_info(&mut self) {
        let update = self.progress_update();
        self.progress.info(update);
    }

    fn publish_debug(&mut self) {
        let update = self.progress_update();
        self.progress.debug(update);
    }
}

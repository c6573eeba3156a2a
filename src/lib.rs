//! # Flowline: per-job DAG pipeline execution
//!
//! Flowline is the driver core of a distributed pipeline platform: one
//! [`driver::PipelineDriver`] per job owns that job's graph, decides which
//! nodes are runnable, resolves symbolic input references into concrete
//! payloads, dispatches tasks to an external job-distribution layer,
//! consumes completion events, applies batch failure tolerance, and
//! recovers consistent state from persisted task history after a restart.
//!
//! ## Core Concepts
//!
//! - **Pipeline**: an immutable, validated DAG of algorithm invocations
//! - **GraphModel**: per-job mutable node/task state, pure data
//! - **Input expressions**: parsed references (`@flowInput.x`, `@node.y`)
//!   with batch (`#`) fan-out and wait-any (`*`) join markers
//! - **Driver**: a serialized event loop — one owner per job, no locks
//! - **Ports**: store, producer, and progress reporting are injected
//!   traits; the engine performs no I/O of its own
//!
//! ## Quick Start
//!
//! ### Defining a pipeline
//!
//! ```rust
//! use flowline::pipeline::{Edge, NodeSpec, Pipeline};
//! use serde_json::json;
//!
//! let pipeline = Pipeline::new("simple-flow")
//!     .add_node(NodeSpec::new("green", "green-alg").with_input(vec![json!("@flowInput.files")]))
//!     .add_node(NodeSpec::new("yellow", "yellow-alg").with_input(vec![json!("@green")]))
//!     .add_edge(Edge::new("green", "yellow"))
//!     .with_flow_input(json!({"files": ["a.csv", "b.csv"]}));
//!
//! assert!(pipeline.validate().is_ok());
//! ```
//!
//! ### Running a job
//!
//! A driver is constructed with its collaborators and a
//! [`events::DriverHandle`] for feeding it events; `run` drives the job
//! to a terminal [`driver::JobOutcome`]:
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use flowline::config::DriverConfig;
//! # use flowline::driver::{JobDescriptor, PipelineDriver};
//! # use flowline::events::TaskEvent;
//! # use flowline::pipeline::Pipeline;
//! # use flowline::producer::{ProducerError, TaskDescriptor, TaskProducer};
//! # use flowline::store::InMemoryStateStore;
//! # use flowline::types::{TaskId, TaskStatus};
//! # struct Queue;
//! # #[async_trait::async_trait]
//! # impl TaskProducer for Queue {
//! #     async fn enqueue(&self, _: TaskDescriptor) -> Result<(), ProducerError> { Ok(()) }
//! #     async fn cancel(&self, _: &TaskId) -> Result<(), ProducerError> { Ok(()) }
//! # }
//! # async fn example(pipeline: Pipeline) -> Result<(), Box<dyn std::error::Error>> {
//! let (mut driver, handle) = PipelineDriver::new(
//!     JobDescriptor::new("job-1", pipeline),
//!     Arc::new(InMemoryStateStore::new()),
//!     Arc::new(Queue),
//!     DriverConfig::default(),
//! );
//!
//! // The embedding forwards worker events through the handle:
//! handle.task_event(TaskEvent::new("green-alg:123".into(), TaskStatus::Active))?;
//!
//! let outcome = driver.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! Each job's events — task completions, dispatch acknowledgements, stop
//! requests — flow through a single flume channel into one consumer, so
//! no two mutations of a graph ever race. Jobs are mutually independent;
//! run as many drivers as you like on one runtime. Dispatch and
//! cancellation are fire-and-forget spawned tasks that report back
//! through the same channel.
//!
//! ## Module Guide
//!
//! - [`pipeline`] - Definitions, input-expression parsing, validation
//! - [`graph`] - Per-job graph model: nodes, tasks, readiness queries
//! - [`resolver`] - Input resolution against flow input and parent results
//! - [`dispatch`] - Task creation and fire-and-forget submission
//! - [`driver`] - The per-job state machine and event loop
//! - [`events`] - The serialized event queue and its handle
//! - [`producer`] / [`store`] - Ports to the distribution layer and the
//!   persisted coordination store
//! - [`progress`] - Throttled progress reporting
//! - [`config`] - Driver tunables
//! - [`telemetry`] - Tracing subscriber setup

pub mod config;
pub mod dispatch;
pub mod driver;
pub mod events;
pub mod graph;
pub mod pipeline;
pub mod producer;
pub mod progress;
pub mod resolver;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;

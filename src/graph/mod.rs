//! Per-job in-memory graph state.
//!
//! [`GraphModel`] is pure data plus query/mutation operations: no I/O, no
//! policy. It owns one job's [`GraphNode`]s and their [`TaskInstance`]s,
//! caches the parent/child adjacency derived from the pipeline's edges,
//! and answers the readiness, tolerance, and completion questions the
//! driver asks after every event.
//!
//! The model is rebuilt from persisted task history on recovery; the
//! persisted store, not this cache, is the source of truth across
//! restarts.

mod model;
mod node;

pub use model::{GraphError, GraphModel, NodeCompletion, NodeStatesSummary, TaskUpdate};
pub use node::{GraphNode, TaskInstance};

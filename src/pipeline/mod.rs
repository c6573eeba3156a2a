//! Pipeline definitions: the immutable description of a job's graph.
//!
//! A [`Pipeline`] is wire-shaped data (serde round-trippable) describing a
//! named DAG of algorithm invocations: node specs, edges, a flow-level
//! input object, and execution options. It is validated once before
//! execution ([`Pipeline::validate`]) and never mutated afterwards; all
//! runtime state lives in [`crate::graph::GraphModel`].
//!
//! Input expressions are parsed from their marker-string form into the
//! [`expr::InputExpr`] tagged union at load time, so the resolver and the
//! driver match on variants instead of re-inspecting strings.

pub mod expr;
mod validate;

pub use expr::{ExprParseError, InputExpr};
pub use validate::PipelineError;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::StateType;

/// Default percentage of failed batch instances a node tolerates before the
/// whole job fails.
pub const DEFAULT_BATCH_TOLERANCE: u8 = 80;

/// One declared unit of work in a pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique name within the pipeline.
    pub node_name: String,
    /// Identifier of the algorithm the distribution layer should run.
    pub algorithm_name: String,
    /// Ordered raw input expressions; strings may carry reference and
    /// marker syntax (`@flowInput.x`, `@node.y`, leading `#` for batch,
    /// leading `*` for wait-any), everything else is a literal.
    #[serde(default)]
    pub input: Vec<Value>,
    /// Stateless (default) or stateful; stateful nodes start immediately.
    #[serde(default)]
    pub state_type: StateType,
}

impl NodeSpec {
    pub fn new(node_name: impl Into<String>, algorithm_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            algorithm_name: algorithm_name.into(),
            input: Vec::new(),
            state_type: StateType::Stateless,
        }
    }

    #[must_use]
    pub fn with_input(mut self, input: Vec<Value>) -> Self {
        self.input = input;
        self
    }

    #[must_use]
    pub fn stateful(mut self) -> Self {
        self.state_type = StateType::Stateful;
        self
    }

    /// Parse this node's raw input expressions.
    pub fn parsed_input(&self) -> Result<Vec<InputExpr>, ExprParseError> {
        self.input.iter().map(expr::parse).collect()
    }
}

/// A directed dependency: `source` must finish before `target` may run
/// (subject to the target's wait-any policy).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Execution options attached to a pipeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Percentage (0-100) of failed batch instances still considered an
    /// acceptable node-level success. Falls back to the driver
    /// configuration default when unset.
    #[serde(default)]
    pub batch_tolerance: Option<u8>,
}

impl PipelineOptions {
    #[must_use]
    pub fn with_batch_tolerance(mut self, tolerance: u8) -> Self {
        self.batch_tolerance = Some(tolerance);
        self
    }
}

/// Immutable description of one executable pipeline.
///
/// # Examples
///
/// ```rust
/// use flowline::pipeline::{Edge, NodeSpec, Pipeline};
/// use serde_json::json;
///
/// let pipeline = Pipeline::new("simple-flow")
///     .add_node(NodeSpec::new("green", "green-alg").with_input(vec![json!("@flowInput.x")]))
///     .add_node(NodeSpec::new("yellow", "yellow-alg").with_input(vec![json!("@green")]))
///     .add_edge(Edge::new("green", "yellow"))
///     .with_flow_input(json!({"x": 1}));
///
/// assert!(pipeline.validate().is_ok());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Job-level input object referenced by `@flowInput.<path>` expressions.
    #[serde(default)]
    pub flow_input: Value,
    #[serde(default)]
    pub options: PipelineOptions,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            flow_input: Value::Null,
            options: PipelineOptions::default(),
        }
    }

    #[must_use]
    pub fn add_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn add_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    #[must_use]
    pub fn with_flow_input(mut self, flow_input: Value) -> Self {
        self.flow_input = flow_input;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Look up a node spec by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.node_name == name)
    }
}

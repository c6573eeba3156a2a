#![allow(dead_code)]

use flowline::pipeline::{Edge, NodeSpec, Pipeline, PipelineOptions};
use flowline::store::PersistedTask;
use flowline::types::{TaskId, TaskStatus};
use serde_json::{Value, json};

/// A single node with no inputs.
pub fn one_node() -> Pipeline {
    Pipeline::new("one-node").add_node(NodeSpec::new("green", "green-alg"))
}

/// `green -> yellow`, yellow consuming green's whole result.
pub fn two_nodes() -> Pipeline {
    Pipeline::new("two-nodes")
        .add_node(NodeSpec::new("green", "green-alg"))
        .add_node(NodeSpec::new("yellow", "yellow-alg").with_input(vec![json!("@green")]))
        .add_edge(Edge::new("green", "yellow"))
}

/// `{A -> C, B -> C}` with flow input `{x: 1}`; A and B have no inputs.
pub fn diamond() -> Pipeline {
    Pipeline::new("diamond")
        .add_node(NodeSpec::new("A", "a-alg"))
        .add_node(NodeSpec::new("B", "b-alg"))
        .add_node(NodeSpec::new("C", "c-alg").with_input(vec![json!("@A"), json!("@B")]))
        .add_edge(Edge::new("A", "C"))
        .add_edge(Edge::new("B", "C"))
        .with_flow_input(json!({"x": 1}))
}

/// One node fanning out over `flowInput.nums` (five elements).
pub fn batch_pipeline(tolerance: u8) -> Pipeline {
    Pipeline::new("batch")
        .add_node(NodeSpec::new("green", "green-alg").with_input(vec![json!("#@flowInput.nums")]))
        .with_flow_input(json!({"nums": [1, 2, 3, 4, 5]}))
        .with_options(PipelineOptions::default().with_batch_tolerance(tolerance))
}

/// `green -> black` and `yellow -> black`, black waiting on whichever
/// parent finishes first.
pub fn wait_any_pipeline() -> Pipeline {
    Pipeline::new("wait-any")
        .add_node(NodeSpec::new("green", "green-alg"))
        .add_node(NodeSpec::new("yellow", "yellow-alg"))
        .add_node(NodeSpec::new("black", "black-alg").with_input(vec![json!("*@green")]))
        .add_edge(Edge::new("green", "black"))
        .add_edge(Edge::new("yellow", "black"))
}

/// Persisted history row for recovery scenarios.
pub fn persisted_task(
    node: &str,
    algorithm: &str,
    status: TaskStatus,
    result: Option<Value>,
) -> PersistedTask {
    PersistedTask {
        task_id: TaskId::issue(algorithm),
        node_name: node.to_string(),
        algorithm_name: algorithm.to_string(),
        batch_index: None,
        input: json!([]),
        status,
        result,
        error: None,
        created_at: chrono::Utc::now().to_rfc3339(),
        ended_at: status
            .is_terminal()
            .then(|| chrono::Utc::now().to_rfc3339()),
    }
}

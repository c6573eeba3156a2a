//! Structural validation of pipeline definitions.
//!
//! Runs once before execution begins. The runtime assumes a validated
//! pipeline: the graph model never re-checks acyclicity or name
//! resolution.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use super::expr::{self, InputExpr};
use super::{ExprParseError, Pipeline};

/// Configuration errors detected before any task is dispatched.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("pipeline has no nodes")]
    #[diagnostic(code(flowline::pipeline::empty))]
    Empty,

    #[error("duplicate node name `{node}`")]
    #[diagnostic(
        code(flowline::pipeline::duplicate_node),
        help("Node names must be unique within a pipeline.")
    )]
    DuplicateNode { node: String },

    #[error("edge references unknown node `{node}`")]
    #[diagnostic(code(flowline::pipeline::unknown_edge_node))]
    UnknownEdgeNode { node: String },

    #[error("node `{node}` input references unknown node `{referenced}`")]
    #[diagnostic(code(flowline::pipeline::unknown_input_node))]
    UnknownInputNode { node: String, referenced: String },

    #[error("node `{node}` references parent `{referenced}` without a connecting edge")]
    #[diagnostic(
        code(flowline::pipeline::missing_edge),
        help("Add an edge from the referenced node so execution order is defined.")
    )]
    MissingEdge { node: String, referenced: String },

    #[error("cycle detected through node `{node}`")]
    #[diagnostic(
        code(flowline::pipeline::cycle),
        help("Pipelines must be acyclic; remove the back edge.")
    )]
    Cycle { node: String },

    #[error("node `{node}` input {position}: {source}")]
    #[diagnostic(code(flowline::pipeline::bad_expression))]
    BadExpression {
        node: String,
        position: usize,
        #[source]
        #[diagnostic_source]
        source: ExprParseError,
    },

    #[error("node `{node}` combines batch and wait-any markers")]
    #[diagnostic(
        code(flowline::pipeline::wait_any_batch),
        help("A node fans out over a batch or joins on wait-any, not both.")
    )]
    WaitAnyBatchCombination { node: String },

    #[error("node `{node}` declares more than one batch position")]
    #[diagnostic(code(flowline::pipeline::multiple_batch))]
    MultipleBatch { node: String },

    #[error("node `{node}` declares more than one wait-any position")]
    #[diagnostic(code(flowline::pipeline::multiple_wait_any))]
    MultipleWaitAny { node: String },

    #[error("node `{node}` wait-any marker must reference a parent node")]
    #[diagnostic(
        code(flowline::pipeline::wait_any_target),
        help("Use `*@<node>` or `*@<node>.<path>`; flow input never completes, so waiting on it is meaningless.")
    )]
    WaitAnyTarget { node: String },
}

impl Pipeline {
    /// Validate the pipeline's structure: unique node names, edges and
    /// input references resolving to declared nodes, parseable input
    /// expressions, and an acyclic graph.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.nodes.is_empty() {
            return Err(PipelineError::Empty);
        }

        let mut names = FxHashSet::default();
        for node in &self.nodes {
            if !names.insert(node.node_name.as_str()) {
                return Err(PipelineError::DuplicateNode {
                    node: node.node_name.clone(),
                });
            }
        }

        for edge in &self.edges {
            for end in [&edge.source, &edge.target] {
                if !names.contains(end.as_str()) {
                    return Err(PipelineError::UnknownEdgeNode { node: end.clone() });
                }
            }
        }

        self.check_expressions(&names)?;
        self.check_acyclic()
    }

    fn check_expressions(&self, names: &FxHashSet<&str>) -> Result<(), PipelineError> {
        for node in &self.nodes {
            let mut batch_positions = 0usize;
            let mut wait_any_positions = 0usize;
            for (position, raw) in node.input.iter().enumerate() {
                let parsed =
                    expr::parse(raw).map_err(|source| PipelineError::BadExpression {
                        node: node.node_name.clone(),
                        position,
                        source,
                    })?;
                if let Some(referenced) = parsed.referenced_node() {
                    if !names.contains(referenced) {
                        return Err(PipelineError::UnknownInputNode {
                            node: node.node_name.clone(),
                            referenced: referenced.to_string(),
                        });
                    }
                    let connected = self
                        .edges
                        .iter()
                        .any(|e| e.source == referenced && e.target == node.node_name);
                    if !connected {
                        return Err(PipelineError::MissingEdge {
                            node: node.node_name.clone(),
                            referenced: referenced.to_string(),
                        });
                    }
                }
                match &parsed {
                    InputExpr::Batch(_) => batch_positions += 1,
                    InputExpr::WaitAny(inner) => {
                        wait_any_positions += 1;
                        if !matches!(inner.as_ref(), InputExpr::NodeRef { .. }) {
                            return Err(PipelineError::WaitAnyTarget {
                                node: node.node_name.clone(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            if batch_positions > 0 && wait_any_positions > 0 {
                return Err(PipelineError::WaitAnyBatchCombination {
                    node: node.node_name.clone(),
                });
            }
            if batch_positions > 1 {
                return Err(PipelineError::MultipleBatch {
                    node: node.node_name.clone(),
                });
            }
            if wait_any_positions > 1 {
                return Err(PipelineError::MultipleWaitAny {
                    node: node.node_name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Iterative three-color DFS over the edge list.
    fn check_acyclic(&self) -> Result<(), PipelineError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        for edge in &self.edges {
            adjacency
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }

        let mut marks: FxHashMap<&str, Mark> = self
            .nodes
            .iter()
            .map(|n| (n.node_name.as_str(), Mark::White))
            .collect();

        for start in self.nodes.iter().map(|n| n.node_name.as_str()) {
            if marks[start] != Mark::White {
                continue;
            }
            // Stack of (node, next-child-index) frames.
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            marks.insert(start, Mark::Gray);
            while let Some((node, child_idx)) = stack.pop() {
                let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if child_idx < children.len() {
                    stack.push((node, child_idx + 1));
                    let child = children[child_idx];
                    match marks[child] {
                        Mark::Gray => {
                            return Err(PipelineError::Cycle {
                                node: child.to_string(),
                            });
                        }
                        Mark::White => {
                            marks.insert(child, Mark::Gray);
                            stack.push((child, 0));
                        }
                        Mark::Black => {}
                    }
                } else {
                    marks.insert(node, Mark::Black);
                }
            }
        }
        Ok(())
    }
}

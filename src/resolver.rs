//! Input resolution: from parsed expressions to concrete task payloads.
//!
//! The resolver turns a node's declared input positions into the JSON
//! payload(s) its task instance(s) will carry, reading from the job's
//! flow input and from already-completed parents' aggregated results.
//!
//! A node with a batch position resolves to one payload per array
//! element, each payload carrying the shared non-batch positions plus its
//! own element. A node with a wait-any position is resolved through
//! [`InputResolver::resolve_wait_any`] with the first parent result that
//! becomes available.
//!
//! Lookup failures and malformed references are reported as errors,
//! never silently coerced to `null`.

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::graph::{GraphModel, GraphNode};
use crate::pipeline::InputExpr;
use crate::types::TaskStatus;
use crate::utils::json_path;

/// Errors raised while resolving a node's inputs. All of them are fatal to
/// the job and surface as its persisted failure reason.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("flow input has no value at path `{path}`")]
    #[diagnostic(
        code(flowline::resolve::missing_flow_input),
        help("Check the job's flow input object against the `@flowInput` references.")
    )]
    MissingFlowInputPath { path: String },

    #[error("node `{node}` result has no value at path `{path}`")]
    #[diagnostic(code(flowline::resolve::missing_result_path))]
    MissingResultPath { node: String, path: String },

    #[error("referenced node `{node}` has not produced a result yet")]
    #[diagnostic(
        code(flowline::resolve::parent_not_resolved),
        help("An `@node` reference is only valid once that parent is terminal-succeed.")
    )]
    ParentNotResolved { node: String },

    #[error("node `{node}` batch position resolved to {got}, expected an array")]
    #[diagnostic(code(flowline::resolve::batch_not_array))]
    BatchNotArray { node: String, got: &'static str },

    #[error("node `{node}` declares more than one batch position")]
    #[diagnostic(code(flowline::resolve::multiple_batch))]
    MultipleBatch { node: String },

    #[error("node `{node}` wait-any position used outside a wait-any dispatch")]
    #[diagnostic(code(flowline::resolve::wait_any_context))]
    WaitAnyContext { node: String },
}

/// Resolved inputs, tagged by dispatch path.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedInput {
    /// One payload for the node's single task instance.
    Single(Value),
    /// One complete payload per batch element, index-aligned.
    Batch(Vec<Value>),
}

/// Resolves node inputs against flow input and completed parent results.
///
/// Borrowing view over the driver's state; constructed per resolution
/// pass, holds nothing across events.
pub struct InputResolver<'a> {
    flow_input: &'a Value,
    graph: &'a GraphModel,
}

impl<'a> InputResolver<'a> {
    #[must_use]
    pub fn new(flow_input: &'a Value, graph: &'a GraphModel) -> Self {
        Self { flow_input, graph }
    }

    /// Resolve all input positions of a node whose parents are finished.
    pub fn resolve(&self, node: &GraphNode) -> Result<ResolvedInput, ResolveError> {
        let mut values = Vec::with_capacity(node.input.len());
        let mut batch: Option<(usize, Vec<Value>)> = None;

        for (position, expr) in node.input.iter().enumerate() {
            match expr {
                InputExpr::Batch(inner) => {
                    if batch.is_some() {
                        return Err(ResolveError::MultipleBatch {
                            node: node.node_name.clone(),
                        });
                    }
                    let resolved = self.eval(inner)?;
                    let Value::Array(elements) = resolved else {
                        return Err(ResolveError::BatchNotArray {
                            node: node.node_name.clone(),
                            got: json_path::value_type(&resolved),
                        });
                    };
                    batch = Some((position, elements));
                    values.push(Value::Null); // placeholder, replaced per element
                }
                InputExpr::WaitAny(_) => {
                    return Err(ResolveError::WaitAnyContext {
                        node: node.node_name.clone(),
                    });
                }
                _ => values.push(self.eval(expr)?),
            }
        }

        match batch {
            None => Ok(ResolvedInput::Single(Value::Array(values))),
            Some((position, elements)) => {
                let payloads = elements
                    .into_iter()
                    .map(|element| {
                        let mut payload = values.clone();
                        payload[position] = element;
                        Value::Array(payload)
                    })
                    .collect();
                Ok(ResolvedInput::Batch(payloads))
            }
        }
    }

    /// Resolve a wait-any node using the first finished parent's result.
    ///
    /// The wait-any position takes `parent_result` (with the reference's
    /// path applied); all other positions resolve as usual.
    pub fn resolve_wait_any(
        &self,
        node: &GraphNode,
        parent_result: &Value,
    ) -> Result<ResolvedInput, ResolveError> {
        let mut values = Vec::with_capacity(node.input.len());
        let mut saw_wait_any = false;

        for expr in &node.input {
            match expr {
                InputExpr::WaitAny(inner) => {
                    saw_wait_any = true;
                    let path = match inner.as_ref() {
                        InputExpr::NodeRef { path, .. } => path.as_str(),
                        _ => "",
                    };
                    let value = json_path::get_path(parent_result, path).ok_or_else(|| {
                        ResolveError::MissingResultPath {
                            node: node.node_name.clone(),
                            path: path.to_string(),
                        }
                    })?;
                    values.push(value.clone());
                }
                InputExpr::Batch(_) => {
                    // Validation rejects batch + wait-any on one node.
                    return Err(ResolveError::WaitAnyContext {
                        node: node.node_name.clone(),
                    });
                }
                _ => values.push(self.eval(expr)?),
            }
        }

        if !saw_wait_any {
            return Err(ResolveError::WaitAnyContext {
                node: node.node_name.clone(),
            });
        }
        Ok(ResolvedInput::Single(Value::Array(values)))
    }

    /// Resolve a single non-marker expression to its value.
    fn eval(&self, expr: &InputExpr) -> Result<Value, ResolveError> {
        match expr {
            InputExpr::Literal(value) => Ok(value.clone()),
            InputExpr::FlowInput { path } => json_path::get_path(self.flow_input, path)
                .cloned()
                .ok_or_else(|| ResolveError::MissingFlowInputPath { path: path.clone() }),
            InputExpr::NodeRef { node, path } => {
                let parent = self
                    .graph
                    .node(node)
                    .map_err(|_| ResolveError::ParentNotResolved { node: node.clone() })?;
                let result = match (&parent.status, &parent.result) {
                    (TaskStatus::Succeed, Some(result)) => result,
                    _ => {
                        return Err(ResolveError::ParentNotResolved { node: node.clone() });
                    }
                };
                json_path::get_path(result, path).cloned().ok_or_else(|| {
                    ResolveError::MissingResultPath {
                        node: node.clone(),
                        path: path.clone(),
                    }
                })
            }
            InputExpr::Batch(_) | InputExpr::WaitAny(_) => {
                // Markers never nest (the parser strips them all up front),
                // so reaching here is a caller bug handled upstream.
                Err(ResolveError::WaitAnyContext {
                    node: String::new(),
                })
            }
        }
    }
}

//! Parsed input expressions.
//!
//! Raw pipeline input positions are JSON values whose string form may
//! carry marker syntax:
//!
//! - `@flowInput.<path>` — reference into the job's flow input
//! - `@<node>` / `@<node>.<path>` — reference into a parent's result
//! - leading `#` — batch marker: the referenced value must be an array and
//!   the node fans out into one task per element
//! - leading `*` — wait-any marker: the node runs as soon as any one of
//!   the marked parents finishes
//!
//! Parsing happens once at pipeline-load time and produces this tagged
//! union, so resolution and readiness checks are exhaustive matches
//! instead of repeated string inspection.

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

/// Prefix of every reference expression.
const REF_MARKER: char = '@';
/// Marks a batch fan-out position.
const BATCH_MARKER: char = '#';
/// Marks a wait-any position.
const WAIT_ANY_MARKER: char = '*';
/// Reference root naming the job-level input object.
const FLOW_INPUT_ROOT: &str = "flowInput";

/// One parsed input position of a node.
#[derive(Clone, Debug, PartialEq)]
pub enum InputExpr {
    /// Plain value, passed through unchanged.
    Literal(Value),
    /// Dotted-path reference into the flow input object. An empty path
    /// refers to the whole object.
    FlowInput { path: String },
    /// Dotted-path reference into a parent node's aggregated result.
    NodeRef { node: String, path: String },
    /// Batch fan-out over the wrapped reference.
    Batch(Box<InputExpr>),
    /// Wait-any join over the wrapped reference.
    WaitAny(Box<InputExpr>),
}

impl InputExpr {
    /// The parent node this expression references, if any (looks through
    /// batch and wait-any wrappers).
    #[must_use]
    pub fn referenced_node(&self) -> Option<&str> {
        match self {
            InputExpr::NodeRef { node, .. } => Some(node),
            InputExpr::Batch(inner) | InputExpr::WaitAny(inner) => inner.referenced_node(),
            _ => None,
        }
    }

    /// True for `Batch(..)` positions.
    #[must_use]
    pub fn is_batch(&self) -> bool {
        matches!(self, InputExpr::Batch(_))
    }

    /// True for `WaitAny(..)` positions.
    #[must_use]
    pub fn is_wait_any(&self) -> bool {
        matches!(self, InputExpr::WaitAny(_))
    }
}

/// Errors produced while parsing a raw input expression.
#[derive(Debug, Error, Diagnostic)]
pub enum ExprParseError {
    #[error("empty reference expression `{raw}`")]
    #[diagnostic(
        code(flowline::expr::empty_reference),
        help("A `@` reference must name flowInput or a node, e.g. `@flowInput.x`.")
    )]
    EmptyReference { raw: String },

    #[error("marker `{marker}` must wrap a reference, got literal `{raw}`")]
    #[diagnostic(
        code(flowline::expr::marker_on_literal),
        help("Batch (`#`) and wait-any (`*`) markers only apply to `@` references.")
    )]
    MarkerOnLiteral { marker: char, raw: String },

    #[error("conflicting markers in `{raw}`: wait-any cannot be combined with batch")]
    #[diagnostic(
        code(flowline::expr::conflicting_markers),
        help("Split the position into a wait-any reference and a separate batch reference.")
    )]
    ConflictingMarkers { raw: String },
}

/// Parse one raw input position into its tagged form.
///
/// Non-string values are always literals. Strings are literals unless they
/// start with a marker or the `@` reference prefix.
pub fn parse(raw: &Value) -> Result<InputExpr, ExprParseError> {
    let Value::String(s) = raw else {
        return Ok(InputExpr::Literal(raw.clone()));
    };

    let mut rest = s.as_str();
    let mut batch = false;
    let mut wait_any = false;

    loop {
        if let Some(r) = rest.strip_prefix(BATCH_MARKER) {
            batch = true;
            rest = r;
        } else if let Some(r) = rest.strip_prefix(WAIT_ANY_MARKER) {
            wait_any = true;
            rest = r;
        } else {
            break;
        }
    }

    if batch && wait_any {
        return Err(ExprParseError::ConflictingMarkers { raw: s.clone() });
    }

    let Some(reference) = rest.strip_prefix(REF_MARKER) else {
        if batch || wait_any {
            let marker = if batch { BATCH_MARKER } else { WAIT_ANY_MARKER };
            return Err(ExprParseError::MarkerOnLiteral {
                marker,
                raw: s.clone(),
            });
        }
        return Ok(InputExpr::Literal(raw.clone()));
    };

    if reference.is_empty() {
        return Err(ExprParseError::EmptyReference { raw: s.clone() });
    }

    let (root, path) = match reference.split_once('.') {
        Some((root, path)) => (root, path.to_string()),
        None => (reference, String::new()),
    };

    let inner = if root == FLOW_INPUT_ROOT {
        InputExpr::FlowInput { path }
    } else {
        InputExpr::NodeRef {
            node: root.to_string(),
            path,
        }
    };

    Ok(if batch {
        InputExpr::Batch(Box::new(inner))
    } else if wait_any {
        InputExpr::WaitAny(Box::new(inner))
    } else {
        inner
    })
}

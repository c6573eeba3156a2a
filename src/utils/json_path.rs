//! Dotted-path lookups over [`serde_json::Value`].
//!
//! Input expressions reference flow input and parent results with dotted
//! paths (`files.links.2.name`). Object keys and numeric array indices are
//! both valid path segments.

use serde_json::Value;

/// Look up a value by dot-separated path.
///
/// An empty path refers to the value itself. Returns `None` when any
/// segment is missing, a numeric segment indexes past the end of an array,
/// or the path descends into a primitive.
///
/// # Examples
///
/// ```rust
/// use flowline::utils::json_path::get_path;
/// use serde_json::json;
///
/// let data = json!({"files": {"links": [{"name": "a.csv"}]}});
/// assert_eq!(get_path(&data, "files.links.0.name"), Some(&json!("a.csv")));
/// assert_eq!(get_path(&data, "files.missing"), None);
/// ```
#[must_use]
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }

    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => {
                current = obj.get(part)?;
            }
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

/// Human-readable name of a JSON value's type, for error messages.
#[must_use]
pub fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// Tests live in tests/utils.rs

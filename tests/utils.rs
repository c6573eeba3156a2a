use flowline::utils::json_path::{get_path, value_type};
use serde_json::json;

#[test]
fn empty_path_returns_root() {
    let v = json!({"a": 1});
    assert_eq!(get_path(&v, ""), Some(&v));
}

#[test]
fn nested_objects_and_arrays() {
    let v = json!({"a": {"b": [10, {"c": true}]}});
    assert_eq!(get_path(&v, "a.b.0"), Some(&json!(10)));
    assert_eq!(get_path(&v, "a.b.1.c"), Some(&json!(true)));
}

#[test]
fn missing_segments_return_none() {
    let v = json!({"a": {"b": 1}});
    assert_eq!(get_path(&v, "a.c"), None);
    assert_eq!(get_path(&v, "a.b.c"), None);
    assert_eq!(get_path(&v, "a.b.0"), None);
}

#[test]
fn non_numeric_array_index_returns_none() {
    let v = json!({"a": [1, 2]});
    assert_eq!(get_path(&v, "a.x"), None);
}

#[test]
fn value_types_are_named() {
    assert_eq!(value_type(&json!(null)), "null");
    assert_eq!(value_type(&json!(1)), "number");
    assert_eq!(value_type(&json!([1])), "array");
    assert_eq!(value_type(&json!({})), "object");
}

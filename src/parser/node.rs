//! Safe indexed descent into untyped nested-array documents.
//!
//! The upstream payload has no schema: every field lives at a positional
//! index path that changes over time. Every lookup here degrades to the
//! target type's zero value instead of failing, so schema drift shows up as
//! empty fields, never as errors.

use serde_json::Value;

/// Walk `path` one level at a time. Returns `None` when an index is out of
/// range, an intermediate node is not an array, or the target is null.
pub fn descend<'a>(node: &'a Value, path: &[usize]) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    path.iter()
        .try_fold(node, |current, &idx| current.as_array()?.get(idx))
        .filter(|value| !value.is_null())
}

/// Conversion from a document node into a typed value
pub trait FromNode: Sized + Default {
    fn from_node(node: &Value) -> Option<Self>;
}

impl FromNode for String {
    fn from_node(node: &Value) -> Option<Self> {
        node.as_str().map(str::to_string)
    }
}

impl FromNode for f64 {
    fn from_node(node: &Value) -> Option<Self> {
        node.as_f64()
    }
}

// Numbers arrive as JSON doubles; integer fields truncate like a cast would.
impl FromNode for i64 {
    fn from_node(node: &Value) -> Option<Self> {
        node.as_f64().map(|n| n as i64)
    }
}

impl FromNode for bool {
    fn from_node(node: &Value) -> Option<Self> {
        node.as_bool()
    }
}

/// Typed lookup; zero value on any step failure or type mismatch
pub fn get<T: FromNode>(node: &Value, path: &[usize]) -> T {
    descend(node, path)
        .and_then(T::from_node)
        .unwrap_or_default()
}

/// Array lookup; empty slice on any step failure or type mismatch
pub fn array_at<'a>(node: &'a Value, path: &[usize]) -> &'a [Value] {
    descend(node, path)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

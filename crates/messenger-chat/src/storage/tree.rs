//! JSON tree addressed by `/`-separated paths.

use messenger_core::BackendError;
use serde_json::{Map, Value};

/// Split `path` into segments, rejecting empty ones.
pub(crate) fn segments(path: &str) -> Result<Vec<&str>, BackendError> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.iter().any(|s| s.is_empty()) {
        return Err(BackendError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

/// Value at `segments`, if any.
pub(crate) fn get<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(*segment))
}

/// Whether `value` counts as absent.
pub(crate) fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Store `value` at `segments`, or remove the path when `value` is `None`
/// or empty. Parents left empty by a removal are pruned; non-object
/// parents on the way to a store are replaced.
pub(crate) fn set(root: &mut Value, segments: &[&str], value: Option<Value>) {
    let value = value.filter(|v| !is_empty(v));
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    if let Value::Object(map) = root {
        set_in(map, segments, value);
    }
}

fn set_in(node: &mut Map<String, Value>, segments: &[&str], value: Option<Value>) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        match value {
            Some(v) => {
                node.insert((*first).to_string(), v);
            }
            None => {
                node.remove(*first);
            }
        }
        return;
    }

    if value.is_none() && !node.get(*first).is_some_and(Value::is_object) {
        return;
    }

    let child = node
        .entry((*first).to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        *child = Value::Object(Map::new());
    }
    let now_empty = match child {
        Value::Object(map) => {
            set_in(map, rest, value);
            map.is_empty()
        }
        _ => false,
    };
    if now_empty {
        node.remove(*first);
    }
}

//! Path addressing over a JSON document tree.
//!
//! Paths are slash separated and relative to the root; empty segments are
//! ignored, so `"/users/ada/"` and `"users/ada"` address the same node.
//! Writing `null` removes a node and prunes parents left empty.

use serde_json::{Map, Value};

use crate::reconciler::Timestamp;

pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub fn join(parent: &str, child: &str) -> String {
    let parent = parent.trim_matches('/');
    let child = child.trim_matches('/');
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => parent.to_string(),
        _ => format!("{parent}/{child}"),
    }
}

pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments(path) {
        node = node.as_object()?.get(segment)?;
    }
    if node.is_null() { None } else { Some(node) }
}

pub fn set(root: &mut Value, path: &str, value: Value) {
    let segs = segments(path);
    if value.is_null() {
        remove(root, &segs);
    } else {
        insert(root, &segs, value);
    }
}

/// Sets each child of `patch` under `path`, leaving siblings untouched.
pub fn merge(root: &mut Value, path: &str, patch: &Map<String, Value>) {
    for (key, value) in patch {
        set(root, &join(path, key), value.clone());
    }
}

/// Replaces `{".sv": "timestamp"}` placeholders with `now`.
pub fn resolve_server_values(value: &mut Value, now: Timestamp) {
    match value {
        Value::Object(map) => {
            if is_server_timestamp(map) {
                *value = Value::from(now);
                return;
            }
            for child in map.values_mut() {
                resolve_server_values(child, now);
            }
        }
        Value::Array(items) => {
            for child in items {
                resolve_server_values(child, now);
            }
        }
        _ => {}
    }
}

fn is_server_timestamp(map: &Map<String, Value>) -> bool {
    map.len() == 1 && map.get(".sv").and_then(Value::as_str) == Some("timestamp")
}

fn insert(node: &mut Value, segs: &[&str], value: Value) {
    let Some((first, rest)) = segs.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.to_string()).or_insert(Value::Null);
        insert(child, rest, value);
    }
}

// Returns true when `node` ended up empty and should be pruned by its parent.
fn remove(node: &mut Value, segs: &[&str]) -> bool {
    let Some((first, rest)) = segs.split_first() else {
        *node = Value::Null;
        return true;
    };
    let Value::Object(map) = node else {
        return false;
    };
    let prune = match map.get_mut(*first) {
        Some(child) => remove(child, rest),
        None => false,
    };
    if prune {
        map.remove(*first);
    }
    if map.is_empty() {
        *node = Value::Null;
        return true;
    }
    false
}

//! Flattened object paths.
//!
//! A nested record is stored in a flat map keyed by dot-joined paths:
//!
//! - `{a: {b: 1}}` is stored as `{"a.b": 1}`
//! - an empty object is a single key holding [`Value::Absent`]
//! - an empty array is a single key holding `Value::Array(vec![])`
//! - a non-empty array becomes `"a.0"`, `"a.1"`, ...
//!
//! On the way back a subtree whose immediate children are all numeric is read
//! as an array, anything else as an object. Object keys must therefore not
//! contain `.`, and an object whose keys are all numeric reads back as an
//! array.

use crate::error::{BindError, Result};
use std::collections::BTreeMap;
use weft_store::Value;

pub const SEPARATOR: char = '.';

/// Join a prefix and a segment.
pub fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}{}{}", prefix, SEPARATOR, segment)
    }
}

/// Check that `path` is a non-empty dot-joined path with non-empty segments.
pub fn validate(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(BindError::invalid_path(path, "empty path"));
    }
    if path.split(SEPARATOR).any(str::is_empty) {
        return Err(BindError::invalid_path(path, "empty segment"));
    }
    Ok(())
}

fn validate_key(prefix: &str, key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(BindError::invalid_path(join(prefix, key), "empty key"));
    }
    if key.contains(SEPARATOR) {
        return Err(BindError::invalid_path(
            join(prefix, key),
            format!("key '{}' contains '{}'", key, SEPARATOR),
        ));
    }
    Ok(())
}

/// Whether `key` is `path` itself or lies below it.
pub fn is_within(key: &str, path: &str) -> bool {
    key == path || is_below(key, path)
}

/// Whether `key` lies strictly below `path`.
pub fn is_below(key: &str, path: &str) -> bool {
    key.len() > path.len()
        && key.starts_with(path)
        && key[path.len()..].starts_with(SEPARATOR)
}

/// Every proper ancestor of `path`, shortest first.
pub fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices(SEPARATOR)
        .map(|(i, _)| &path[..i])
        .collect()
}

/// Flatten `value` stored at `prefix` into `(path, leaf)` pairs.
pub fn flatten(prefix: &str, value: &Value) -> Result<Vec<(String, Value)>> {
    let mut out = Vec::new();
    flatten_into(prefix, value, &mut out)?;
    Ok(out)
}

/// Flatten a whole record. The root must be an object (or `Absent`, which
/// flattens to nothing).
pub fn flatten_root(value: &Value) -> Result<Vec<(String, Value)>> {
    match value {
        Value::Absent => Ok(Vec::new()),
        Value::Object(fields) => {
            let mut out = Vec::new();
            for (key, child) in fields {
                validate_key("", key)?;
                flatten_into(key, child, &mut out)?;
            }
            Ok(out)
        }
        _ => Err(BindError::invalid_path("", "record root must be an object")),
    }
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) -> Result<()> {
    match value {
        Value::Object(fields) if fields.is_empty() => out.push((prefix.to_string(), Value::Absent)),
        Value::Object(fields) => {
            for (key, child) in fields {
                validate_key(prefix, key)?;
                flatten_into(&join(prefix, key), child, out)?;
            }
        }
        Value::Array(items) if items.is_empty() => {
            out.push((prefix.to_string(), Value::Array(Vec::new())))
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(&join(prefix, &index.to_string()), child, out)?;
            }
        }
        leaf => out.push((prefix.to_string(), leaf.clone())),
    }
    Ok(())
}

enum Node {
    Leaf(Value),
    Branch(BTreeMap<String, Node>),
}

impl Node {
    fn insert(&mut self, segments: &[&str], value: Value) {
        let Some((first, rest)) = segments.split_first() else {
            // A leaf never replaces an existing subtree
            if !matches!(self, Node::Branch(children) if !children.is_empty()) {
                *self = Node::Leaf(value);
            }
            return;
        };
        if !matches!(self, Node::Branch(_)) {
            *self = Node::Branch(BTreeMap::new());
        }
        if let Node::Branch(children) = self {
            children
                .entry(first.to_string())
                .or_insert_with(|| Node::Branch(BTreeMap::new()))
                .insert(rest, value);
        }
    }

    fn into_value(self) -> Value {
        match self {
            Node::Leaf(Value::Absent) => Value::Object(BTreeMap::new()),
            Node::Leaf(value) => value,
            Node::Branch(children) => {
                let numeric = !children.is_empty()
                    && children.keys().all(|k| k.parse::<usize>().is_ok());
                if numeric {
                    let mut items: Vec<(usize, Value)> = children
                        .into_iter()
                        .filter_map(|(k, node)| k.parse().ok().map(|i| (i, node.into_value())))
                        .collect();
                    items.sort_by_key(|(i, _)| *i);
                    Value::Array(items.into_iter().map(|(_, v)| v).collect())
                } else {
                    Value::Object(
                        children
                            .into_iter()
                            .map(|(k, node)| (k, node.into_value()))
                            .collect(),
                    )
                }
            }
        }
    }
}

/// Rebuild a record from flattened pairs. Paths are relative to the record
/// root.
pub fn unflatten<I>(entries: I) -> Value
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut root = Node::Branch(BTreeMap::new());
    for (path, value) in entries {
        let segments: Vec<&str> = path.split(SEPARATOR).collect();
        root.insert(&segments, value);
    }
    match root {
        // The root is always an object, even with numeric keys
        Node::Branch(children) => Value::Object(
            children
                .into_iter()
                .map(|(k, node)| (k, node.into_value()))
                .collect(),
        ),
        Node::Leaf(value) => value,
    }
}

/// The value at `path`, synthesised from every pair at or below it. `None`
/// when nothing is stored there.
pub fn subtree<I>(entries: I, path: &str) -> Option<Value>
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut root = Node::Branch(BTreeMap::new());
    let mut found = false;
    for (key, value) in entries {
        if key == path {
            found = true;
            root.insert(&[], value);
        } else if is_below(&key, path) {
            found = true;
            let rest: Vec<&str> = key[path.len() + 1..].split(SEPARATOR).collect();
            root.insert(&rest, value);
        }
    }
    found.then(|| root.into_value())
}

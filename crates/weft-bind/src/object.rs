//! Nested records bound to a flat map.
//!
//! A [`CrdtObject`] owns a whole map and stores the record in it by
//! flattened path (see [`crate::path`]). Writes touch only the leaves that
//! actually change, so concurrent edits of different fields merge.

use crate::error::{BindError, Result};
use crate::follow::Follow;
use crate::path;
use crate::watchable::Watchable;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tracing::trace;
use weft_store::{CrdtMap, Entry, Listeners, MapEvent, MapHandle, Subscription, TransactExt, Value};

/// Every `(path, value)` pair stored in `map`.
fn leaves(map: &dyn CrdtMap) -> Vec<(String, Value)> {
    map.entries()
        .into_iter()
        .filter_map(|(key, entry)| entry.into_value().map(|v| (key, v)))
        .collect()
}

/// The value at `at`. Concurrent writes can leave both a leaf at `at` and
/// keys below it; the keys below win, matching [`path::unflatten`].
fn read(map: &dyn CrdtMap, at: &str) -> Option<Value> {
    let below: Vec<(String, Value)> = leaves(map)
        .into_iter()
        .filter(|(key, _)| path::is_below(key, at))
        .collect();
    if !below.is_empty() {
        return path::subtree(below, at);
    }
    match map.get(at) {
        Some(Entry::Value(Value::Absent)) => Some(Value::Object(Default::default())),
        Some(Entry::Value(value)) => Some(value),
        _ => None,
    }
}

/// Make the pairs under `prefix` (or the whole map when `prefix` is `None`)
/// equal to `wanted`, writing only what differs.
fn reconcile(map: &dyn CrdtMap, prefix: Option<&str>, wanted: Vec<(String, Value)>) -> Result<()> {
    let keep: BTreeSet<&str> = wanted.iter().map(|(k, _)| k.as_str()).collect();
    for key in map.keys() {
        let in_scope = prefix.map_or(true, |p| path::is_within(&key, p));
        if in_scope && !keep.contains(key.as_str()) {
            map.delete(&key);
        }
    }
    for (key, value) in wanted {
        let unchanged = matches!(map.get(&key), Some(Entry::Value(ref current)) if *current == value);
        if !unchanged {
            map.set(&key, Entry::Value(value))?;
        }
    }
    Ok(())
}

/// Write access to a record, handed to [`CrdtObject::update`].
pub struct ObjectWriter<'a> {
    map: &'a dyn CrdtMap,
}

impl<'a> ObjectWriter<'a> {
    fn new(map: &'a dyn CrdtMap) -> Self {
        Self { map }
    }

    pub fn get(&self, at: &str) -> Option<Value> {
        read(self.map, at)
    }

    /// Store `value` at `at`, replacing whatever was there.
    pub fn set(&mut self, at: &str, value: impl Into<Value>) -> Result<()> {
        path::validate(at)?;
        let value = value.into();
        for ancestor in path::ancestors(at) {
            if let Some(Entry::Value(_)) = self.map.get(ancestor) {
                self.map.delete(ancestor);
            }
        }
        let wanted = path::flatten(at, &value)?;
        reconcile(self.map, Some(at), wanted)
    }

    /// Store a serialisable value at `at`.
    pub fn set_serde<V: Serialize + ?Sized>(&mut self, at: &str, value: &V) -> Result<()> {
        let value = Value::from_serde(value)?;
        self.set(at, value)
    }

    /// Delete `at` and everything below it. Returns whether anything was
    /// removed.
    pub fn delete(&mut self, at: &str) -> Result<bool> {
        path::validate(at)?;
        let mut removed = false;
        for key in self.map.keys() {
            if path::is_within(&key, at) {
                removed |= self.map.delete(&key);
            }
        }
        Ok(removed)
    }
}

struct ObjectShared {
    dirty: Mutex<bool>,
    listeners: Listeners<()>,
}

/// A nested record of type `T` stored flattened in a map.
pub struct CrdtObject<T> {
    source: Watchable<MapHandle>,
    shared: Arc<ObjectShared>,
    _follow: Arc<Follow>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for CrdtObject<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            shared: self.shared.clone(),
            _follow: self._follow.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> CrdtObject<T> {
    pub fn new(source: impl Into<Watchable<MapHandle>>) -> Self {
        let source = source.into();
        let shared = Arc::new(ObjectShared {
            dirty: Mutex::new(false),
            listeners: Listeners::new(),
        });

        let weak: Weak<ObjectShared> = Arc::downgrade(&shared);
        let follow = Follow::new(
            &source,
            move |event: &MapEvent| {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                match event {
                    MapEvent::RemoteBeforeTransaction => {}
                    MapEvent::RemoteAfterTransaction => {
                        if std::mem::take(&mut *shared.dirty.lock()) {
                            shared.listeners.emit(&());
                        }
                    }
                    _ => *shared.dirty.lock() = true,
                }
            },
            |_: &MapHandle| {},
        );

        Self {
            source,
            shared,
            _follow: Arc::new(follow),
            _marker: PhantomData,
        }
    }

    /// The backing map.
    pub fn map(&self) -> MapHandle {
        self.source.get()
    }

    /// Read the value at a dotted path. Subtrees are synthesised from the
    /// leaves below the path.
    pub fn get(&self, at: &str) -> Option<Value> {
        read(self.source.get().as_ref(), at)
    }

    /// Run `f` against the record inside one transaction.
    pub fn update<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut ObjectWriter<'_>) -> Result<R>,
    {
        let map = self.source.get();
        map.transact_with(|| {
            let mut writer = ObjectWriter::new(map.as_ref());
            f(&mut writer)
        })
    }

    /// Replace the whole record.
    pub fn set(&self, record: &T) -> Result<()> {
        let wanted = path::flatten_root(&Value::from_serde(record)?)?;
        let map = self.source.get();
        map.transact_with(|| reconcile(map.as_ref(), None, wanted))
    }

    /// Seed the record only if the map is still empty. Returns whether it
    /// wrote.
    pub fn init(&self, record: &T) -> Result<bool> {
        if !self.source.get().is_empty() {
            return Ok(false);
        }
        self.set(record)?;
        Ok(true)
    }

    /// A detached snapshot of the whole record as a [`Value`].
    pub fn get_clone_value(&self) -> Value {
        path::unflatten(leaves(self.source.get().as_ref()))
    }

    /// A detached, fully materialised copy of the record.
    pub fn get_clone(&self) -> Result<T> {
        let value = self.get_clone_value();
        trace!(fields = value.as_object().map_or(0, |o| o.len()), "Materialising record");
        value
            .to_serde()
            .map_err(|e| BindError::decode(self.source.get().id().to_string(), e))
    }

    /// Called once per remote transaction that touched the record.
    pub fn on_remote_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(move |_: &()| listener())
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.get_clone_value().to_json()
    }
}

impl<T> std::fmt::Debug for CrdtObject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrdtObject")
            .field("map", &self.source.get().id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use weft_store::{CrdtRoot, NoopRoot};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Shape {
        kind: String,
        pos: Pos,
        tags: Vec<String>,
        style: serde_json::Map<String, serde_json::Value>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pos {
        x: i64,
        y: i64,
    }

    fn shape() -> Shape {
        Shape {
            kind: "rect".into(),
            pos: Pos { x: 1, y: 2 },
            tags: vec!["a".into(), "b".into()],
            style: serde_json::Map::new(),
        }
    }

    fn object() -> (NoopRoot, CrdtObject<Shape>) {
        let root = NoopRoot::new();
        let obj = CrdtObject::new(root.get_map("shape").unwrap());
        (root, obj)
    }

    #[test]
    fn test_set_stores_flat_paths() {
        let (_root, obj) = object();
        obj.set(&shape()).unwrap();

        let mut keys = obj.map().keys();
        keys.sort();
        assert_eq!(keys, vec!["kind", "pos.x", "pos.y", "style", "tags.0", "tags.1"]);
        assert_eq!(obj.get("style"), Some(Value::Object(Default::default())));
        assert_eq!(obj.get_clone().unwrap(), shape());
    }

    #[test]
    fn test_path_reads() {
        let (_root, obj) = object();
        obj.set(&shape()).unwrap();

        assert_eq!(obj.get("pos.x"), Some(Value::Int(1)));
        assert_eq!(obj.get("pos").map(|v| v.to_json()), Some(json!({"x": 1, "y": 2})));
        assert_eq!(obj.get("tags").map(|v| v.to_json()), Some(json!(["a", "b"])));
        assert_eq!(obj.get("missing"), None);
    }

    #[test]
    fn test_update_replaces_subtrees() {
        let (_root, obj) = object();
        obj.set(&shape()).unwrap();

        obj.update(|w| {
            w.set("tags", Value::Array(vec![Value::from("only")]))?;
            // Primitive over a subtree drops the subtree
            w.set("pos", 5)?;
            Ok(())
        })
        .unwrap();

        let keys = obj.map().keys();
        assert!(!keys.iter().any(|k| k.starts_with("pos.")));
        assert!(!keys.contains(&"tags.1".to_string()));
        assert_eq!(obj.get("pos"), Some(Value::Int(5)));

        // Subtree over a primitive drops the leaf
        obj.update(|w| w.set("pos.x", 3)).unwrap();
        assert!(!obj.map().has("pos"));
        assert_eq!(obj.get("pos").map(|v| v.to_json()), Some(json!({"x": 3})));
    }

    #[test]
    fn test_delete_is_deep() {
        let (_root, obj) = object();
        obj.set(&shape()).unwrap();

        assert!(obj.update(|w| w.delete("pos")).unwrap());
        assert!(obj.map().keys().iter().all(|k| !path::is_within(k, "pos")));
        assert!(!obj.update(|w| w.delete("pos")).unwrap());
    }

    #[test]
    fn test_empty_object_differs_from_missing() {
        let (_root, obj) = object();
        obj.update(|w| w.set("meta", Value::Object(Default::default())))
            .unwrap();

        assert_eq!(obj.get("meta"), Some(Value::Object(Default::default())));
        assert_eq!(obj.get("other"), None);
        assert_eq!(obj.to_json(), json!({"meta": {}}));
    }

    #[test]
    fn test_init_only_seeds_empty() {
        let (_root, obj) = object();
        assert!(obj.init(&shape()).unwrap());

        let mut other = shape();
        other.kind = "circle".into();
        assert!(!obj.init(&other).unwrap());
        assert_eq!(obj.get("kind"), Some(Value::from("rect")));
    }

    #[test]
    fn test_invalid_paths() {
        let (_root, obj) = object();
        let err = obj.update(|w| w.set("a..b", 1)).unwrap_err();
        assert!(matches!(err, BindError::InvalidPath { .. }));
    }
}

//! The primitive store contract.
//!
//! Everything above this crate talks to a document through these traits only,
//! so the in-memory and the replicated backends are interchangeable.

use crate::error::{CollectionKind, Result};
use crate::event::{ListListener, MapListener, Subscription};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use ulid::Ulid;

pub type MapHandle = Arc<dyn CrdtMap>;
pub type ListHandle = Arc<dyn CrdtList>;
pub type FactoryHandle = Arc<dyn CrdtFactory>;
pub type RootHandle = Arc<dyn CrdtRoot>;

/// Stable identity of a map or list within a document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId(String);

impl CollectionId {
    /// A fresh id for a detached collection.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// The id of the root collection registered under `name`.
    pub fn root(name: &str) -> Self {
        Self(format!("root:{}", name))
    }

    /// The id of a collection nested somewhere inside a document.
    pub fn nested(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn is_root(&self) -> bool {
        self.0.starts_with("root:")
    }

    /// Root name, if this is a root collection.
    pub fn root_name(&self) -> Option<&str> {
        self.0.strip_prefix("root:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a map slot or list element holds.
#[derive(Clone)]
pub enum Entry {
    Value(Value),
    Map(MapHandle),
    List(ListHandle),
}

impl Entry {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Entry::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Entry::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapHandle> {
        match self {
            Entry::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListHandle> {
        match self {
            Entry::List(l) => Some(l),
            _ => None,
        }
    }

    /// Snapshot of this entry and everything nested below it.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Entry::Value(v) => v.to_json(),
            Entry::Map(m) => m.to_json(),
            Entry::List(l) => l.to_json(),
        }
    }

    /// Deep copy into detached collections.
    pub fn deep_clone(&self) -> Result<Entry> {
        Ok(match self {
            Entry::Value(v) => Entry::Value(v.clone()),
            Entry::Map(m) => Entry::Map(m.clone_map()?),
            Entry::List(l) => Entry::List(l.clone_list()?),
        })
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Entry::Map(m) => f.debug_tuple("Map").field(&m.id()).finish(),
            Entry::List(l) => f.debug_tuple("List").field(&l.id()).finish(),
        }
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Entry::Value(a), Entry::Value(b)) => a == b,
            (Entry::Map(a), Entry::Map(b)) => a.id() == b.id(),
            (Entry::List(a), Entry::List(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl From<Value> for Entry {
    fn from(value: Value) -> Self {
        Entry::Value(value)
    }
}

impl From<MapHandle> for Entry {
    fn from(map: MapHandle) -> Self {
        Entry::Map(map)
    }
}

impl From<ListHandle> for Entry {
    fn from(list: ListHandle) -> Self {
        Entry::List(list)
    }
}

/// Atomic grouping of mutations.
///
/// Everything `f` does is committed as one unit. Nested calls coalesce into
/// the outermost one.
pub trait Transactional {
    fn transact(&self, f: &mut dyn FnMut());
}

/// Generic convenience over [`Transactional`].
pub trait TransactExt: Transactional {
    /// Run `f` in a transaction and hand back its result.
    fn transact_with<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut body = Some(f);
        let mut out = None;
        self.transact(&mut || {
            if let Some(body) = body.take() {
                out = Some(body());
            }
        });
        match (out, body) {
            (Some(result), _) => result,
            // Backend skipped the body; run it bare
            (None, Some(body)) => body(),
            (None, None) => unreachable!("transaction body ran without producing a result"),
        }
    }
}

impl<T: Transactional + ?Sized> TransactExt for T {}

/// Creates detached collections for later insertion into a document.
pub trait CrdtFactory: Send + Sync {
    fn make_map(&self, initial: Vec<(String, Entry)>) -> Result<MapHandle>;
    fn make_list(&self, initial: Vec<Entry>) -> Result<ListHandle>;
}

/// A replicated key/value map.
pub trait CrdtMap: Transactional + Send + Sync {
    fn id(&self) -> CollectionId;

    /// The factory of the document this map belongs to.
    fn factory(&self) -> FactoryHandle;

    fn as_any(&self) -> &dyn Any;

    fn get(&self, key: &str) -> Option<Entry>;

    /// Set `key`. Nested collections must be detached and from the same
    /// document.
    fn set(&self, key: &str, entry: Entry) -> Result<()>;

    /// Delete `key`. Returns whether it existed.
    fn delete(&self, key: &str) -> bool;

    fn clear(&self);

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Keys in ascending order.
    fn keys(&self) -> Vec<String>;

    /// Entries in ascending key order.
    fn entries(&self) -> Vec<(String, Entry)>;

    /// Listen for remote mutations of this map.
    fn subscribe(&self, listener: MapListener) -> Subscription;

    fn values(&self) -> Vec<Entry> {
        self.entries().into_iter().map(|(_, e)| e).collect()
    }

    fn len(&self) -> usize {
        self.keys().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries()
                .into_iter()
                .map(|(k, e)| (k, e.to_json()))
                .collect(),
        )
    }

    /// Deep copy into a new detached map.
    fn clone_map(&self) -> Result<MapHandle> {
        let mut copied = Vec::new();
        for (key, entry) in self.entries() {
            copied.push((key, entry.deep_clone()?));
        }
        self.factory().make_map(copied)
    }
}

/// Generic helpers for any [`CrdtMap`].
pub trait MapExt: CrdtMap {
    fn get_value(&self, key: &str) -> Option<Value> {
        self.get(key).and_then(Entry::into_value)
    }

    fn set_value(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.set(key, Entry::Value(value.into()))
    }

    fn get_nested_map(&self, key: &str) -> Option<MapHandle> {
        match self.get(key) {
            Some(Entry::Map(m)) => Some(m),
            _ => None,
        }
    }

    fn get_nested_list(&self, key: &str) -> Option<ListHandle> {
        match self.get(key) {
            Some(Entry::List(l)) => Some(l),
            _ => None,
        }
    }

    /// Return the entry at `key`, creating it with `make` first if missing.
    fn get_or_insert_with<F>(&self, key: &str, make: F) -> Result<Entry>
    where
        F: FnOnce() -> Result<Entry>,
    {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }
        let entry = make()?;
        self.set(key, entry.clone())?;
        Ok(entry)
    }
}

impl<T: CrdtMap + ?Sized> MapExt for T {}

/// A replicated ordered sequence.
pub trait CrdtList: Transactional + Send + Sync {
    fn id(&self) -> CollectionId;

    fn factory(&self) -> FactoryHandle;

    fn as_any(&self) -> &dyn Any;

    fn get(&self, index: usize) -> Option<Entry>;

    /// Insert `entries` so that the first lands at `index`.
    fn insert(&self, index: usize, entries: Vec<Entry>) -> Result<()>;

    /// Remove `count` elements starting at `index`.
    fn delete(&self, index: usize, count: usize) -> Result<()>;

    fn len(&self) -> usize;

    fn to_vec(&self) -> Vec<Entry>;

    fn subscribe(&self, listener: ListListener) -> Subscription;

    fn push(&self, entry: Entry) -> Result<()> {
        self.insert(self.len(), vec![entry])
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.to_vec().iter().map(Entry::to_json).collect())
    }

    fn clone_list(&self) -> Result<ListHandle> {
        let mut copied = Vec::new();
        for entry in self.to_vec() {
            copied.push(entry.deep_clone()?);
        }
        self.factory().make_list(copied)
    }
}

/// A document: named root collections plus a factory for detached ones.
pub trait CrdtRoot: Transactional + Send + Sync {
    fn factory(&self) -> FactoryHandle;

    /// The root map called `name`, created on first use.
    fn get_map(&self, name: &str) -> Result<MapHandle>;

    /// The root list called `name`, created on first use.
    fn get_list(&self, name: &str) -> Result<ListHandle>;

    /// Names and kinds of every root collection, sorted by name.
    fn roots(&self) -> Vec<(String, CollectionKind)>;

    /// Remove all root-level data.
    fn clear(&self);

    /// Whether any root collection holds data.
    fn has_data(&self) -> bool;

    fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (name, kind) in self.roots() {
            let json = match kind {
                CollectionKind::Map => self.get_map(&name).map(|m| m.to_json()),
                CollectionKind::List => self.get_list(&name).map(|l| l.to_json()),
            };
            if let Ok(json) = json {
                out.insert(name, json);
            }
        }
        serde_json::Value::Object(out)
    }
}

//! Keyed collections with an explicit, replicated order.
//!
//! Each element is stored as a small wrapper map:
//!
//! ```text
//! key -> { "index": Int, "value": <entry from the mapper> }
//! ```
//!
//! Local operations keep the indices dense (`0..n`). Concurrent inserts on
//! different replicas may produce equal indices; those are ordered by key,
//! not by insertion sequence. Each replica sees remote inserts arrive in its
//! own sequence, while key order is the same everywhere.

use crate::error::{BindError, Result};
use crate::follow::Follow;
use crate::mapper::{CollectionEvent, CrdtMapper};
use crate::watchable::Watchable;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use weft_store::{
    CrdtMap, Entry, Listeners, MapEvent, MapHandle, Subscription, TransactExt, Value,
};

const INDEX: &str = "index";
const VALUE: &str = "value";

struct Slot<T> {
    index: i64,
    value: T,
    wrapper: MapHandle,
    _watch: Subscription,
}

struct Shared<T> {
    mapper: Arc<dyn CrdtMapper<T>>,
    allow_updates: bool,
    slots: Mutex<BTreeMap<String, Slot<T>>>,
    reordered: Mutex<bool>,
    listeners: Listeners<CollectionEvent<T>>,
}

fn read_index(wrapper: &dyn CrdtMap) -> i64 {
    wrapper
        .get(INDEX)
        .and_then(|e| e.as_value().and_then(Value::as_int))
        .unwrap_or(0)
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    fn decode(&self, key: &str, wrapper: &dyn CrdtMap) -> Option<T> {
        let Some(entry) = wrapper.get(VALUE) else {
            warn!(key, "Ordered entry has no value");
            return None;
        };
        match self.mapper.from_crdt(&entry) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "Skipping undecodable entry");
                None
            }
        }
    }

    /// Build a cache slot for `key`, watching its wrapper for remote index
    /// and value changes.
    fn slot(self: &Arc<Self>, key: &str, entry: &Entry) -> Option<Slot<T>> {
        let Some(wrapper) = entry.as_map().cloned() else {
            warn!(key, "Ordered entry is not a wrapper map");
            return None;
        };
        let value = self.decode(key, wrapper.as_ref())?;

        let weak: Weak<Shared<T>> = Arc::downgrade(self);
        let owner = key.to_string();
        let watch = wrapper.subscribe(Box::new(move |event: &MapEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.on_wrapper_event(&owner, event);
            }
        }));

        Some(Slot {
            index: read_index(wrapper.as_ref()),
            value,
            wrapper,
            _watch: watch,
        })
    }

    fn rebuild(self: &Arc<Self>, map: &MapHandle) {
        let fresh: BTreeMap<String, Slot<T>> = map
            .entries()
            .into_iter()
            .filter_map(|(key, entry)| self.slot(&key, &entry).map(|s| (key, s)))
            .collect();
        let stale = std::mem::replace(&mut *self.slots.lock(), fresh);
        drop(stale);
    }

    fn on_event(self: &Arc<Self>, event: &MapEvent) {
        let change = match event {
            MapEvent::RemoteInsert { key, entry } | MapEvent::RemoteUpdate { key, entry } => {
                let updated = matches!(event, MapEvent::RemoteUpdate { .. });
                if updated && !self.allow_updates {
                    panic!(
                        "remote in-place update of '{}' in an ordered collection that does not allow updates",
                        key
                    );
                }
                let Some(slot) = self.slot(key, entry) else {
                    return;
                };
                let value = slot.value.clone();
                let stale = self.slots.lock().insert(key.clone(), slot);
                drop(stale);
                if updated {
                    CollectionEvent::Updated {
                        key: key.clone(),
                        value,
                    }
                } else {
                    CollectionEvent::Added {
                        key: key.clone(),
                        value,
                    }
                }
            }
            MapEvent::RemoteDelete { key } => {
                let removed = self.slots.lock().remove(key);
                if removed.is_none() {
                    return;
                }
                drop(removed);
                CollectionEvent::Removed { key: key.clone() }
            }
            MapEvent::RemoteBeforeTransaction | MapEvent::RemoteAfterTransaction => return,
        };
        self.listeners.emit(&change);
    }

    fn on_wrapper_event(&self, key: &str, event: &MapEvent) {
        match event {
            MapEvent::RemoteInsert { key: field, entry }
            | MapEvent::RemoteUpdate { key: field, entry }
                if field == INDEX =>
            {
                let index = entry.as_value().and_then(Value::as_int).unwrap_or(0);
                if let Some(slot) = self.slots.lock().get_mut(key) {
                    slot.index = index;
                }
                *self.reordered.lock() = true;
            }
            MapEvent::RemoteUpdate { key: field, .. } if field == VALUE => {
                if !self.allow_updates {
                    panic!(
                        "remote in-place update of '{}' in an ordered collection that does not allow updates",
                        key
                    );
                }
                let wrapper = self.slots.lock().get(key).map(|s| s.wrapper.clone());
                let Some(wrapper) = wrapper else {
                    return;
                };
                let Some(value) = self.decode(key, wrapper.as_ref()) else {
                    return;
                };
                if let Some(slot) = self.slots.lock().get_mut(key) {
                    slot.value = value.clone();
                }
                self.listeners.emit(&CollectionEvent::Updated {
                    key: key.to_string(),
                    value,
                });
            }
            MapEvent::RemoteAfterTransaction => {
                if std::mem::take(&mut *self.reordered.lock()) {
                    self.listeners.emit(&CollectionEvent::Reordered);
                }
            }
            _ => {}
        }
    }

    /// Keys sorted by `(index, key)`.
    fn order(&self) -> Vec<String> {
        let slots = self.slots.lock();
        let mut keyed: Vec<(i64, &String)> = slots.iter().map(|(k, s)| (s.index, k)).collect();
        keyed.sort();
        keyed.into_iter().map(|(_, k)| k.clone()).collect()
    }

    /// Rewrite indices so that `order` reads back densely. Only wrappers whose
    /// index actually moves are written.
    fn write_order(&self, order: &[String]) -> Result<()> {
        let moves: Vec<(MapHandle, String, i64)> = {
            let slots = self.slots.lock();
            order
                .iter()
                .enumerate()
                .filter_map(|(position, key)| {
                    let slot = slots.get(key)?;
                    let position = position as i64;
                    (slot.index != position).then(|| (slot.wrapper.clone(), key.clone(), position))
                })
                .collect()
        };
        for (wrapper, key, position) in moves {
            wrapper.set(INDEX, Entry::Value(Value::Int(position)))?;
            if let Some(slot) = self.slots.lock().get_mut(&key) {
                slot.index = position;
            }
        }
        Ok(())
    }
}

/// A keyed collection of domain objects that also keeps an order.
///
/// Keys are unique as in [`MappedCrdtMap`](crate::MappedCrdtMap); iteration
/// follows the stored indices instead of key order.
pub struct MappedCrdtOrderedMap<T> {
    source: Watchable<MapHandle>,
    shared: Arc<Shared<T>>,
    _follow: Arc<Follow>,
}

impl<T> Clone for MappedCrdtOrderedMap<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            shared: self.shared.clone(),
            _follow: self._follow.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> MappedCrdtOrderedMap<T> {
    pub fn new(
        source: impl Into<Watchable<MapHandle>>,
        mapper: Arc<dyn CrdtMapper<T>>,
        allow_updates: bool,
    ) -> Self {
        let source = source.into();
        let shared = Arc::new(Shared {
            mapper,
            allow_updates,
            slots: Mutex::new(BTreeMap::new()),
            reordered: Mutex::new(false),
            listeners: Listeners::new(),
        });
        shared.rebuild(&source.get());

        let on_event: Weak<Shared<T>> = Arc::downgrade(&shared);
        let on_swap = on_event.clone();
        let follow = Follow::new(
            &source,
            move |event: &MapEvent| {
                if let Some(shared) = on_event.upgrade() {
                    shared.on_event(event);
                }
            },
            move |map: &MapHandle| {
                if let Some(shared) = on_swap.upgrade() {
                    shared.rebuild(map);
                    shared.listeners.emit(&CollectionEvent::Reset);
                }
            },
        );

        Self {
            source,
            shared,
            _follow: Arc::new(follow),
        }
    }

    pub fn map(&self) -> MapHandle {
        self.source.get()
    }

    /// Append a new element.
    pub fn add(&self, key: &str, value: T) -> Result<()> {
        let end = self.len();
        self.add_at(key, value, end)
    }

    /// Insert a new element at `position` (clamped to the end), shifting the
    /// ones after it.
    pub fn add_at(&self, key: &str, value: T, position: usize) -> Result<()> {
        let map = self.source.get();
        if map.has(key) {
            return Err(BindError::DuplicateKey(key.to_string()));
        }
        let entry = self.shared.mapper.to_crdt(&value, map.factory().as_ref())?;

        map.transact_with(|| -> Result<()> {
            let mut order = self.shared.order();
            let position = position.min(order.len());
            let wrapper = map.factory().make_map(vec![
                (INDEX.to_string(), Entry::Value(Value::Int(position as i64))),
                (VALUE.to_string(), entry),
            ])?;
            map.set(key, Entry::Map(wrapper))?;

            let live = map.get(key).ok_or_else(|| BindError::UnknownKey(key.to_string()))?;
            if let Some(slot) = self.shared.slot(key, &live) {
                self.shared.slots.lock().insert(key.to_string(), slot);
            }
            order.insert(position, key.to_string());
            self.shared.write_order(&order)
        })?;
        debug!(key, position, "Added ordered entry");
        Ok(())
    }

    /// Replace an element's value, keeping its position.
    pub fn update(&self, key: &str, value: T) -> Result<()> {
        let wrapper = self.wrapper(key)?;
        let entry = self
            .shared
            .mapper
            .to_crdt(&value, wrapper.factory().as_ref())?;
        wrapper.set(VALUE, entry)?;
        if let Some(slot) = self.shared.slots.lock().get_mut(key) {
            slot.value = value;
        }
        Ok(())
    }

    /// Remove an element and close the gap it leaves. Returns whether there
    /// was one.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let map = self.source.get();
        map.transact_with(|| -> Result<bool> {
            let stored = map.delete(key);
            let cached = self.shared.slots.lock().remove(key);
            let removed = stored || cached.is_some();
            drop(cached);
            if removed {
                self.shared.write_order(&self.shared.order())?;
            }
            Ok(removed)
        })
    }

    /// Move `key` to `position` (clamped to the end).
    pub fn set_index(&self, key: &str, position: usize) -> Result<()> {
        let mut order = self.shared.order();
        let Some(current) = order.iter().position(|k| k == key) else {
            return Err(BindError::UnknownKey(key.to_string()));
        };
        let moved = order.remove(current);
        order.insert(position.min(order.len()), moved);
        let map = self.source.get();
        map.transact_with(|| self.shared.write_order(&order))
    }

    /// Put the listed keys first, in the given order. Keys not listed keep
    /// their relative order after them.
    pub fn set_order<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        let current = self.shared.order();
        let mut order: Vec<String> = Vec::with_capacity(current.len());
        for key in keys {
            let key = key.as_ref();
            if !current.iter().any(|k| k == key) {
                return Err(BindError::UnknownKey(key.to_string()));
            }
            if !order.iter().any(|k| k == key) {
                order.push(key.to_string());
            }
        }
        for key in current {
            if !order.contains(&key) {
                order.push(key);
            }
        }
        let map = self.source.get();
        map.transact_with(|| self.shared.write_order(&order))
    }

    /// Current position of `key`.
    pub fn get_index(&self, key: &str) -> Option<usize> {
        self.shared.order().iter().position(|k| k == key)
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.shared.slots.lock().get(key).map(|s| s.value.clone())
    }

    pub fn has(&self, key: &str) -> bool {
        self.shared.slots.lock().contains_key(key)
    }

    /// Keys in collection order.
    pub fn keys(&self) -> Vec<String> {
        self.shared.order()
    }

    /// Values in collection order.
    pub fn values(&self) -> Vec<T> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// `(key, value)` pairs in collection order.
    pub fn entries(&self) -> Vec<(String, T)> {
        let order = self.shared.order();
        let slots = self.shared.slots.lock();
        order
            .into_iter()
            .filter_map(|key| {
                let value = slots.get(&key)?.value.clone();
                Some((key, value))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the stored wrappers.
    pub fn to_json(&self) -> serde_json::Value {
        self.source.get().to_json()
    }

    /// Called for every remote change, after the cache reflects it. Remote
    /// index changes arrive as `Reordered`, at most once per wrapper per
    /// transaction.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CollectionEvent<T>) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(listener)
    }

    fn wrapper(&self, key: &str) -> Result<MapHandle> {
        self.shared
            .slots
            .lock()
            .get(key)
            .map(|s| s.wrapper.clone())
            .ok_or_else(|| BindError::UnknownKey(key.to_string()))
    }
}

//! Keyed collections of domain objects.

use crate::error::{BindError, Result};
use crate::follow::Follow;
use crate::mapper::{CollectionEvent, CrdtMapper};
use crate::watchable::Watchable;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::warn;
use weft_store::{Entry, Listeners, MapEvent, MapHandle, Subscription};

struct Shared<T> {
    mapper: Arc<dyn CrdtMapper<T>>,
    allow_updates: bool,
    cache: Mutex<BTreeMap<String, T>>,
    listeners: Listeners<CollectionEvent<T>>,
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    fn decode(&self, key: &str, entry: &Entry) -> Option<T> {
        match self.mapper.from_crdt(entry) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "Skipping undecodable entry");
                None
            }
        }
    }

    fn rebuild(&self, map: &MapHandle) {
        let fresh: BTreeMap<String, T> = map
            .entries()
            .into_iter()
            .filter_map(|(key, entry)| self.decode(&key, &entry).map(|v| (key, v)))
            .collect();
        *self.cache.lock() = fresh;
    }

    fn on_event(&self, event: &MapEvent) {
        let change = match event {
            MapEvent::RemoteInsert { key, entry } => {
                let Some(value) = self.decode(key, entry) else {
                    return;
                };
                self.cache.lock().insert(key.clone(), value.clone());
                CollectionEvent::Added {
                    key: key.clone(),
                    value,
                }
            }
            MapEvent::RemoteUpdate { key, entry } => {
                if !self.allow_updates {
                    panic!(
                        "remote in-place update of '{}' in a collection that does not allow updates",
                        key
                    );
                }
                let Some(value) = self.decode(key, entry) else {
                    return;
                };
                self.cache.lock().insert(key.clone(), value.clone());
                CollectionEvent::Updated {
                    key: key.clone(),
                    value,
                }
            }
            MapEvent::RemoteDelete { key } => {
                if self.cache.lock().remove(key).is_none() {
                    return;
                }
                CollectionEvent::Removed { key: key.clone() }
            }
            MapEvent::RemoteBeforeTransaction | MapEvent::RemoteAfterTransaction => return,
        };
        self.listeners.emit(&change);
    }
}

/// A map of domain objects, each stored under its key through a
/// [`CrdtMapper`].
///
/// Reads come from a local cache of decoded objects that is kept in step with
/// remote changes; writes go to the store first and then to the cache.
pub struct MappedCrdtMap<T> {
    source: Watchable<MapHandle>,
    shared: Arc<Shared<T>>,
    _follow: Arc<Follow>,
}

impl<T> Clone for MappedCrdtMap<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            shared: self.shared.clone(),
            _follow: self._follow.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> MappedCrdtMap<T> {
    /// Bind to `source`. With `allow_updates` off, a remote overwrite of an
    /// existing key is treated as a bug and panics.
    pub fn new(
        source: impl Into<Watchable<MapHandle>>,
        mapper: Arc<dyn CrdtMapper<T>>,
        allow_updates: bool,
    ) -> Self {
        let source = source.into();
        let shared = Arc::new(Shared {
            mapper,
            allow_updates,
            cache: Mutex::new(BTreeMap::new()),
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

    /// Store a new element. Fails with `DuplicateKey` if `key` is taken.
    pub fn add(&self, key: &str, value: T) -> Result<()> {
        let map = self.source.get();
        if map.has(key) {
            return Err(BindError::DuplicateKey(key.to_string()));
        }
        let entry = self.shared.mapper.to_crdt(&value, map.factory().as_ref())?;
        map.set(key, entry)?;
        self.shared.cache.lock().insert(key.to_string(), value);
        Ok(())
    }

    /// Replace an existing element.
    pub fn update(&self, key: &str, value: T) -> Result<()> {
        let map = self.source.get();
        if !map.has(key) {
            return Err(BindError::UnknownKey(key.to_string()));
        }
        let entry = self.shared.mapper.to_crdt(&value, map.factory().as_ref())?;
        map.set(key, entry)?;
        self.shared.cache.lock().insert(key.to_string(), value);
        Ok(())
    }

    /// Remove an element. Returns whether there was one.
    pub fn remove(&self, key: &str) -> bool {
        let stored = self.source.get().delete(key);
        let cached = self.shared.cache.lock().remove(key).is_some();
        stored || cached
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.shared.cache.lock().get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.shared.cache.lock().contains_key(key)
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> Vec<String> {
        self.shared.cache.lock().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<T> {
        self.shared.cache.lock().values().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, T)> {
        self.shared
            .cache
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the stored representation.
    pub fn to_json(&self) -> serde_json::Value {
        self.source.get().to_json()
    }

    /// Called for every remote change, after the cache reflects it.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CollectionEvent<T>) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::ValueMapper;
    use weft_store::{CrdtRoot, NoopRoot};

    fn tags(root: &NoopRoot) -> MappedCrdtMap<String> {
        MappedCrdtMap::new(
            root.get_map("tags").unwrap(),
            Arc::new(ValueMapper::<String>::new()),
            true,
        )
    }

    #[test]
    fn test_add_get_remove() {
        let root = NoopRoot::new();
        let map = tags(&root);

        map.add("red", "#f00".into()).unwrap();
        map.add("blue", "#00f".into()).unwrap();
        assert_eq!(map.get("red").as_deref(), Some("#f00"));
        assert_eq!(map.keys(), vec!["blue", "red"]);

        assert!(map.remove("red"));
        assert!(!map.remove("red"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_duplicate_add_is_rejected() {
        let root = NoopRoot::new();
        let map = tags(&root);
        map.add("red", "#f00".into()).unwrap();
        assert_eq!(
            map.add("red", "#e00".into()),
            Err(BindError::DuplicateKey("red".into()))
        );
        assert_eq!(map.get("red").as_deref(), Some("#f00"));
    }

    #[test]
    fn test_update_requires_existing_key() {
        let root = NoopRoot::new();
        let map = tags(&root);
        assert!(matches!(
            map.update("red", "#f00".into()),
            Err(BindError::UnknownKey(_))
        ));
        map.add("red", "#f00".into()).unwrap();
        map.update("red", "#e00".into()).unwrap();
        assert_eq!(map.get("red").as_deref(), Some("#e00"));
    }

    #[test]
    fn test_cache_starts_from_store_and_follows_swaps() {
        let root = NoopRoot::new();
        let other = root.get_map("other").unwrap();
        other
            .set("k", Entry::Value(weft_store::Value::from("v")))
            .unwrap();

        let source = Watchable::new(root.get_map("tags").unwrap());
        let map = MappedCrdtMap::new(source.clone(), Arc::new(ValueMapper::<String>::new()), true);
        assert!(map.is_empty());

        let resets = Arc::new(Mutex::new(0));
        let counter = resets.clone();
        let _sub = map.on_change(move |event| {
            if matches!(event, CollectionEvent::Reset) {
                *counter.lock() += 1;
            }
        });

        source.set(other);
        assert_eq!(map.get("k").as_deref(), Some("v"));
        assert_eq!(*resets.lock(), 1);
    }
}

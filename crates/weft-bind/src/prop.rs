//! A single map key bound to a typed value.

use crate::error::{BindError, Result};
use crate::follow::Follow;
use crate::watchable::Watchable;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use weft_store::{Entry, Listeners, MapEvent, MapHandle, Subscription, Value};

struct PropShared {
    key: String,
    dirty: Mutex<bool>,
    listeners: Listeners<()>,
}

impl PropShared {
    fn on_event(&self, event: &MapEvent) {
        match event {
            MapEvent::RemoteInsert { key, .. }
            | MapEvent::RemoteUpdate { key, .. }
            | MapEvent::RemoteDelete { key }
                if key == &self.key =>
            {
                *self.dirty.lock() = true;
            }
            MapEvent::RemoteAfterTransaction => {
                let fire = std::mem::take(&mut *self.dirty.lock());
                if fire {
                    self.listeners.emit(&());
                }
            }
            _ => {}
        }
    }
}

/// Binds one key of a map to a value of type `T`.
///
/// `T` crosses into the store through serde, so any record works as long as
/// it serialises to something other than a map with dotted keys.
pub struct CrdtProp<T> {
    source: Watchable<MapHandle>,
    shared: Arc<PropShared>,
    _follow: Arc<Follow>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for CrdtProp<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            shared: self.shared.clone(),
            _follow: self._follow.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> CrdtProp<T> {
    pub fn new(source: impl Into<Watchable<MapHandle>>, key: impl Into<String>) -> Self {
        let source = source.into();
        let shared = Arc::new(PropShared {
            key: key.into(),
            dirty: Mutex::new(false),
            listeners: Listeners::new(),
        });

        let weak: Weak<PropShared> = Arc::downgrade(&shared);
        let follow = Follow::new(
            &source,
            move |event: &MapEvent| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_event(event);
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

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// The stored value, `None` when the key is absent.
    pub fn get(&self) -> Result<Option<T>> {
        match self.source.get().get(&self.shared.key) {
            None | Some(Entry::Value(Value::Absent)) => Ok(None),
            Some(Entry::Value(value)) => value
                .to_serde()
                .map(Some)
                .map_err(|e| BindError::decode(&self.shared.key, e)),
            Some(_) => Err(BindError::decode(
                &self.shared.key,
                "expected a value, found a nested collection",
            )),
        }
    }

    /// The stored value, failing with `MissingValue` when absent.
    pub fn get_non_null(&self) -> Result<T> {
        self.get()?
            .ok_or_else(|| BindError::MissingValue(self.shared.key.clone()))
    }

    pub fn set(&self, value: &T) -> Result<()> {
        let value = Value::from_serde(value)?;
        self.source
            .get()
            .set(&self.shared.key, Entry::Value(value))?;
        Ok(())
    }

    /// Write `value` only if nothing is stored yet. Returns whether it wrote.
    pub fn init(&self, value: &T) -> Result<bool> {
        if self.source.get().has(&self.shared.key) {
            return Ok(false);
        }
        self.set(value)?;
        Ok(true)
    }

    /// Delete the key. Returns whether it existed.
    pub fn clear(&self) -> bool {
        self.source.get().delete(&self.shared.key)
    }

    /// Called once per remote transaction that touched this key.
    pub fn on_remote_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(move |_: &()| listener())
    }
}

impl<T> std::fmt::Debug for CrdtProp<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrdtProp")
            .field("key", &self.shared.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_store::{CrdtRoot, MapExt, NoopRoot};

    #[test]
    fn test_get_set_clear() {
        let root = NoopRoot::new();
        let prop: CrdtProp<String> = CrdtProp::new(root.get_map("meta").unwrap(), "title");

        assert_eq!(prop.get().unwrap(), None);
        assert_eq!(
            prop.get_non_null(),
            Err(BindError::MissingValue("title".into()))
        );

        prop.set(&"Checkout flow".to_string()).unwrap();
        assert_eq!(prop.get_non_null().unwrap(), "Checkout flow");

        assert!(prop.clear());
        assert_eq!(prop.get().unwrap(), None);
    }

    #[test]
    fn test_init_is_idempotent() {
        let root = NoopRoot::new();
        let prop: CrdtProp<u32> = CrdtProp::new(root.get_map("meta").unwrap(), "zoom");

        assert!(prop.init(&1).unwrap());
        assert!(!prop.init(&2).unwrap());
        assert_eq!(prop.get().unwrap(), Some(1));
    }

    #[test]
    fn test_decode_error() {
        let root = NoopRoot::new();
        let map = root.get_map("meta").unwrap();
        map.set_value("zoom", "not a number").unwrap();

        let prop: CrdtProp<u32> = CrdtProp::new(map, "zoom");
        assert!(matches!(prop.get(), Err(BindError::Decode { .. })));
    }

    #[test]
    fn test_follows_swaps() {
        let root = NoopRoot::new();
        let first = root.get_map("a").unwrap();
        let second = root.get_map("b").unwrap();
        second.set_value("title", "from b").unwrap();

        let source = Watchable::new(first);
        let prop: CrdtProp<String> = CrdtProp::new(source.clone(), "title");
        assert_eq!(prop.get().unwrap(), None);

        source.set(second);
        assert_eq!(prop.get().unwrap().as_deref(), Some("from b"));
    }
}

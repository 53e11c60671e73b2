//! In-memory single-process backend.
//!
//! Nothing here replicates, so no remote event is ever emitted. Transactions
//! simply run their body. Useful for single-user sessions and deterministic
//! tests.

use crate::error::{CollectionKind, Result, StoreError};
use crate::event::{ListListener, MapListener, Subscription};
use crate::traits::{
    CollectionId, CrdtFactory, CrdtList, CrdtMap, CrdtRoot, Entry, FactoryHandle, ListHandle,
    MapHandle, Transactional,
};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Factory for detached in-memory collections.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFactory;

impl NoopFactory {
    pub fn handle() -> FactoryHandle {
        Arc::new(NoopFactory)
    }
}

impl CrdtFactory for NoopFactory {
    fn make_map(&self, initial: Vec<(String, Entry)>) -> Result<MapHandle> {
        let map = NoopMap::new(CollectionId::generate(), false);
        for (key, entry) in initial {
            map.set(&key, entry)?;
        }
        Ok(Arc::new(map))
    }

    fn make_list(&self, initial: Vec<Entry>) -> Result<ListHandle> {
        let list = NoopList::new(CollectionId::generate(), false);
        list.insert(0, initial)?;
        Ok(Arc::new(list))
    }
}

/// Mark a nested collection as owned by its new parent.
fn adopt(entry: &Entry) -> Result<()> {
    let claimed = match entry {
        Entry::Value(_) => return Ok(()),
        Entry::Map(map) => map
            .as_any()
            .downcast_ref::<NoopMap>()
            .map(|m| m.attached.swap(true, Ordering::SeqCst)),
        Entry::List(list) => list
            .as_any()
            .downcast_ref::<NoopList>()
            .map(|l| l.attached.swap(true, Ordering::SeqCst)),
    };
    let id = match entry {
        Entry::Map(m) => m.id(),
        Entry::List(l) => l.id(),
        Entry::Value(_) => return Ok(()),
    };
    match claimed {
        None => Err(StoreError::ForeignCollection(id.to_string())),
        Some(true) => Err(StoreError::AlreadyAttached(id.to_string())),
        Some(false) => Ok(()),
    }
}

/// An in-memory map.
pub struct NoopMap {
    id: CollectionId,
    entries: Mutex<BTreeMap<String, Entry>>,
    attached: AtomicBool,
}

impl NoopMap {
    fn new(id: CollectionId, attached: bool) -> Self {
        Self {
            id,
            entries: Mutex::new(BTreeMap::new()),
            attached: AtomicBool::new(attached),
        }
    }
}

impl Transactional for NoopMap {
    fn transact(&self, f: &mut dyn FnMut()) {
        f()
    }
}

impl CrdtMap for NoopMap {
    fn id(&self) -> CollectionId {
        self.id.clone()
    }

    fn factory(&self) -> FactoryHandle {
        NoopFactory::handle()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get(&self, key: &str) -> Option<Entry> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, entry: Entry) -> Result<()> {
        adopt(&entry)?;
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn has(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    fn entries(&self) -> Vec<(String, Entry)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }

    fn subscribe(&self, _listener: MapListener) -> Subscription {
        Subscription::noop()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// An in-memory list.
pub struct NoopList {
    id: CollectionId,
    items: Mutex<Vec<Entry>>,
    attached: AtomicBool,
}

impl NoopList {
    fn new(id: CollectionId, attached: bool) -> Self {
        Self {
            id,
            items: Mutex::new(Vec::new()),
            attached: AtomicBool::new(attached),
        }
    }
}

impl Transactional for NoopList {
    fn transact(&self, f: &mut dyn FnMut()) {
        f()
    }
}

impl CrdtList for NoopList {
    fn id(&self) -> CollectionId {
        self.id.clone()
    }

    fn factory(&self) -> FactoryHandle {
        NoopFactory::handle()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get(&self, index: usize) -> Option<Entry> {
        self.items.lock().get(index).cloned()
    }

    fn insert(&self, index: usize, entries: Vec<Entry>) -> Result<()> {
        let length = self.items.lock().len();
        if index > length {
            return Err(StoreError::IndexOutOfBounds { index, length });
        }
        for entry in &entries {
            adopt(entry)?;
        }
        let mut items = self.items.lock();
        let tail = items.split_off(index);
        items.extend(entries);
        items.extend(tail);
        Ok(())
    }

    fn delete(&self, index: usize, count: usize) -> Result<()> {
        let mut items = self.items.lock();
        let length = items.len();
        if index + count > length {
            return Err(StoreError::IndexOutOfBounds {
                index: index + count,
                length,
            });
        }
        items.drain(index..index + count);
        Ok(())
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }

    fn to_vec(&self) -> Vec<Entry> {
        self.items.lock().clone()
    }

    fn subscribe(&self, _listener: ListListener) -> Subscription {
        Subscription::noop()
    }
}

enum RootSlot {
    Map(Arc<NoopMap>),
    List(Arc<NoopList>),
}

/// An in-memory document.
#[derive(Default)]
pub struct NoopRoot {
    roots: Mutex<BTreeMap<String, RootSlot>>,
}

impl NoopRoot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transactional for NoopRoot {
    fn transact(&self, f: &mut dyn FnMut()) {
        f()
    }
}

impl CrdtRoot for NoopRoot {
    fn factory(&self) -> FactoryHandle {
        NoopFactory::handle()
    }

    fn get_map(&self, name: &str) -> Result<MapHandle> {
        let mut roots = self.roots.lock();
        let slot = roots.entry(name.to_string()).or_insert_with(|| {
            RootSlot::Map(Arc::new(NoopMap::new(CollectionId::root(name), true)))
        });
        match slot {
            RootSlot::Map(map) => Ok(map.clone()),
            RootSlot::List(_) => Err(StoreError::KindMismatch {
                name: name.to_string(),
                existing: CollectionKind::List,
            }),
        }
    }

    fn get_list(&self, name: &str) -> Result<ListHandle> {
        let mut roots = self.roots.lock();
        let slot = roots.entry(name.to_string()).or_insert_with(|| {
            RootSlot::List(Arc::new(NoopList::new(CollectionId::root(name), true)))
        });
        match slot {
            RootSlot::List(list) => Ok(list.clone()),
            RootSlot::Map(_) => Err(StoreError::KindMismatch {
                name: name.to_string(),
                existing: CollectionKind::Map,
            }),
        }
    }

    fn roots(&self) -> Vec<(String, CollectionKind)> {
        self.roots
            .lock()
            .iter()
            .map(|(name, slot)| {
                let kind = match slot {
                    RootSlot::Map(_) => CollectionKind::Map,
                    RootSlot::List(_) => CollectionKind::List,
                };
                (name.clone(), kind)
            })
            .collect()
    }

    fn clear(&self) {
        for slot in self.roots.lock().values() {
            match slot {
                RootSlot::Map(map) => map.clear(),
                RootSlot::List(list) => list.items.lock().clear(),
            }
        }
    }

    fn has_data(&self) -> bool {
        self.roots.lock().values().any(|slot| match slot {
            RootSlot::Map(map) => !map.is_empty(),
            RootSlot::List(list) => !list.is_empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MapExt;
    use crate::value::Value;
    use serde_json::json;

    #[test]
    fn test_root_collections_are_stable() {
        let root = NoopRoot::new();
        let a = root.get_map("tags").unwrap();
        a.set_value("x", 1).unwrap();

        let b = root.get_map("tags").unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(b.get_value("x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_kind_mismatch() {
        let root = NoopRoot::new();
        root.get_list("palette").unwrap();
        let err = root.get_map("palette").err().unwrap();
        assert_eq!(
            err,
            StoreError::KindMismatch {
                name: "palette".into(),
                existing: CollectionKind::List
            }
        );
    }

    #[test]
    fn test_nested_collections_and_json() {
        let root = NoopRoot::new();
        let doc = root.get_map("doc").unwrap();
        let factory = root.factory();

        let inner = factory
            .make_map(vec![("a".into(), Entry::Value(Value::Int(1)))])
            .unwrap();
        let list = factory
            .make_list(vec![Entry::Value("x".into()), Entry::Value("y".into())])
            .unwrap();
        doc.set("inner", Entry::Map(inner)).unwrap();
        doc.set("list", Entry::List(list)).unwrap();
        doc.set("empty", Entry::Value(Value::Absent)).unwrap();

        assert_eq!(
            root.to_json(),
            json!({"doc": {"empty": null, "inner": {"a": 1}, "list": ["x", "y"]}})
        );
    }

    #[test]
    fn test_attach_twice_fails() {
        let root = NoopRoot::new();
        let doc = root.get_map("doc").unwrap();
        let child = root.factory().make_map(Vec::new()).unwrap();

        doc.set("a", Entry::Map(child.clone())).unwrap();
        assert!(matches!(
            doc.set("b", Entry::Map(child)),
            Err(StoreError::AlreadyAttached(_))
        ));
    }

    #[test]
    fn test_list_bounds() {
        let list = NoopFactory.make_list(Vec::new()).unwrap();
        list.push(Entry::Value(Value::Int(1))).unwrap();
        assert_eq!(
            list.insert(3, vec![Entry::Value(Value::Int(2))]),
            Err(StoreError::IndexOutOfBounds {
                index: 3,
                length: 1
            })
        );
        assert!(list.delete(0, 2).is_err());
        list.delete(0, 1).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_clone_map_is_independent() {
        let root = NoopRoot::new();
        let doc = root.get_map("doc").unwrap();
        doc.set_value("k", "v").unwrap();

        let copy = doc.clone_map().unwrap();
        doc.set_value("k", "changed").unwrap();
        assert_eq!(copy.get_value("k"), Some(Value::String("v".into())));
        assert_ne!(copy.id(), doc.id());
    }

    #[test]
    fn test_clear_and_has_data() {
        let root = NoopRoot::new();
        assert!(!root.has_data());
        root.get_list("l")
            .unwrap()
            .push(Entry::Value(Value::Null))
            .unwrap();
        assert!(root.has_data());
        root.clear();
        assert!(!root.has_data());
    }
}

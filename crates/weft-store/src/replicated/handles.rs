//! Handles onto collections of a [`ReplicatedDoc`](super::ReplicatedDoc).
//!
//! A collection made by the factory starts out *detached*: its content lives
//! in the handle until it is placed into the document. At that point the
//! content is written as one yrs prelim and the handle (plus every detached
//! handle nested inside it) switches over to the integrated `MapRef` or
//! `ArrayRef`, so handles taken before attaching keep working afterwards.

use super::convert::to_any;
use super::DocShared;
use crate::error::{Result, StoreError};
use crate::event::{ListEvent, ListListener, Listeners, MapEvent, MapListener, Subscription};
use crate::traits::{
    CollectionId, CrdtFactory, CrdtList, CrdtMap, Entry, FactoryHandle, ListHandle, MapHandle,
    Transactional,
};
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use yrs::branch::{Branch, BranchID};
use yrs::{Array, ArrayPrelim, ArrayRef, In, Map, MapPrelim, MapRef, Out, ReadTxn, Transact};

/// Content of a map or list before or after it joined the document.
pub(crate) enum Body<D, L> {
    /// Not part of the document yet. `claimed` once placed inside another
    /// detached collection.
    Detached { content: D, claimed: bool },
    Live(L),
}

/// Shared state behind every handle created for one detached collection.
pub(crate) struct Core<D, L, E> {
    detached_id: CollectionId,
    pub(crate) body: RwLock<Body<D, L>>,
    pub(crate) listeners: Listeners<E>,
    pub(crate) observer: Mutex<Option<yrs::Subscription>>,
}

pub(crate) type MapCore = Core<BTreeMap<String, Slot>, MapRef, MapEvent>;
pub(crate) type ListCore = Core<Vec<Slot>, ArrayRef, ListEvent>;

impl<D, L, E: 'static> Core<D, L, E> {
    fn detached(content: D) -> Arc<Self> {
        Arc::new(Self {
            detached_id: CollectionId::generate(),
            body: RwLock::new(Body::Detached {
                content,
                claimed: false,
            }),
            listeners: Listeners::new(),
            observer: Mutex::new(None),
        })
    }

    fn live(shared: L) -> Arc<Self> {
        Arc::new(Self {
            detached_id: CollectionId::generate(),
            body: RwLock::new(Body::Live(shared)),
            listeners: Listeners::new(),
            observer: Mutex::new(None),
        })
    }

    /// Take ownership for a new parent. Fails unless still detached and
    /// unowned.
    pub(crate) fn claim(&self) -> Result<()> {
        match &mut *self.body.write() {
            Body::Detached { claimed, .. } if !*claimed => {
                *claimed = true;
                Ok(())
            }
            _ => Err(StoreError::AlreadyAttached(self.detached_id.to_string())),
        }
    }
}

/// A map slot or list element as held by a detached collection.
#[derive(Clone)]
pub(crate) enum Slot {
    Value(Value),
    Map(Arc<MapCore>),
    List(Arc<ListCore>),
}

impl Slot {
    /// The yrs prelim writing this slot with all its detached content.
    pub(crate) fn prelim(&self) -> In {
        match self {
            Slot::Value(v) => In::Any(to_any(v)),
            Slot::Map(core) => match &*core.body.read() {
                Body::Detached { content, .. } => In::Map(
                    content
                        .iter()
                        .map(|(k, s)| (k.clone(), s.prelim()))
                        .collect::<MapPrelim>(),
                ),
                // Claimed slots are always detached
                Body::Live(_) => In::Any(yrs::Any::Null),
            },
            Slot::List(core) => match &*core.body.read() {
                Body::Detached { content, .. } => {
                    In::Array(content.iter().map(Slot::prelim).collect::<ArrayPrelim>())
                }
                Body::Live(_) => In::Any(yrs::Any::Null),
            },
        }
    }
}

/// A collection that has just joined the document and may need an observer.
pub(crate) enum Joined {
    Map(Arc<MapCore>, MapRef),
    List(Arc<ListCore>, ArrayRef),
}

/// Switch `slot` (and everything detached below it) over to `out`, the
/// content yrs integrated for it.
pub(crate) fn go_live<T: ReadTxn>(slot: &Slot, out: Out, txn: &T, joined: &mut Vec<Joined>) {
    match (slot, out) {
        (Slot::Map(core), Out::YMap(map)) => {
            let previous = std::mem::replace(&mut *core.body.write(), Body::Live(map.clone()));
            if let Body::Detached { content, .. } = previous {
                for (key, child) in &content {
                    if let Some(out) = map.get(txn, key) {
                        go_live(child, out, txn, joined);
                    }
                }
            }
            joined.push(Joined::Map(core.clone(), map));
        }
        (Slot::List(core), Out::YArray(array)) => {
            let previous = std::mem::replace(&mut *core.body.write(), Body::Live(array.clone()));
            if let Body::Detached { content, .. } = previous {
                for (index, child) in content.iter().enumerate() {
                    if let Some(out) = array.get(txn, index as u32) {
                        go_live(child, out, txn, joined);
                    }
                }
            }
            joined.push(Joined::List(core.clone(), array));
        }
        _ => {}
    }
}

fn branch_id(branch: &Branch) -> CollectionId {
    match branch.id() {
        BranchID::Root(name) => CollectionId::root(&name),
        BranchID::Nested(id) => CollectionId::nested(format!("{:?}", id)),
    }
}

/// Creates detached collections inside one replica.
pub struct ReplicatedFactory {
    doc: Arc<DocShared>,
}

impl ReplicatedFactory {
    pub(crate) fn new(doc: Arc<DocShared>) -> Self {
        Self { doc }
    }
}

impl CrdtFactory for ReplicatedFactory {
    fn make_map(&self, initial: Vec<(String, Entry)>) -> Result<MapHandle> {
        let mut content = BTreeMap::new();
        for (key, entry) in initial {
            content.insert(key, self.doc.claim(entry)?);
        }
        Ok(Arc::new(ReplicatedMap {
            doc: self.doc.clone(),
            core: MapCore::detached(content),
        }))
    }

    fn make_list(&self, initial: Vec<Entry>) -> Result<ListHandle> {
        let content = initial
            .into_iter()
            .map(|entry| self.doc.claim(entry))
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(ReplicatedList {
            doc: self.doc.clone(),
            core: ListCore::detached(content),
        }))
    }
}

/// A map inside a replicated document.
pub struct ReplicatedMap {
    pub(crate) doc: Arc<DocShared>,
    pub(crate) core: Arc<MapCore>,
}

impl ReplicatedMap {
    pub(crate) fn live(doc: Arc<DocShared>, map: MapRef) -> Self {
        Self {
            doc,
            core: MapCore::live(map),
        }
    }

    pub(crate) fn belongs_to(&self, doc: &Arc<DocShared>) -> bool {
        Arc::ptr_eq(&self.doc, doc)
    }

    fn live_ref(&self) -> Option<MapRef> {
        match &*self.core.body.read() {
            Body::Live(map) => Some(map.clone()),
            Body::Detached { .. } => None,
        }
    }
}

impl Transactional for ReplicatedMap {
    fn transact(&self, f: &mut dyn FnMut()) {
        self.doc.transact(f)
    }
}

impl CrdtMap for ReplicatedMap {
    fn id(&self) -> CollectionId {
        match &*self.core.body.read() {
            Body::Live(map) => branch_id(map.as_ref()),
            Body::Detached { .. } => self.core.detached_id.clone(),
        }
    }

    fn factory(&self) -> FactoryHandle {
        Arc::new(ReplicatedFactory::new(self.doc.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get(&self, key: &str) -> Option<Entry> {
        let Some(map) = self.live_ref() else {
            return match &*self.core.body.read() {
                Body::Detached { content, .. } => {
                    content.get(key).map(|slot| self.doc.slot_entry(slot))
                }
                Body::Live(_) => None,
            };
        };
        let out = {
            let txn = self.doc.doc.transact();
            map.get(&txn, key)
        };
        out.map(|out| self.doc.entry(out))
    }

    fn set(&self, key: &str, entry: Entry) -> Result<()> {
        let slot = self.doc.claim(entry)?;
        let map = {
            let mut body = self.core.body.write();
            match &mut *body {
                Body::Detached { content, .. } => {
                    content.insert(key.to_string(), slot);
                    return Ok(());
                }
                Body::Live(map) => map.clone(),
            }
        };
        let prelim = slot.prelim();
        self.doc.mutate(|txn| {
            map.insert(txn, key, prelim);
        });
        self.doc
            .go_live(vec![slot], |txn, _| map.get(txn, key));
        Ok(())
    }

    fn delete(&self, key: &str) -> bool {
        let Some(map) = self.live_ref() else {
            return match &mut *self.core.body.write() {
                Body::Detached { content, .. } => content.remove(key).is_some(),
                Body::Live(_) => false,
            };
        };
        self.doc.mutate(|txn| map.remove(txn, key).is_some())
    }

    fn clear(&self) {
        let Some(map) = self.live_ref() else {
            if let Body::Detached { content, .. } = &mut *self.core.body.write() {
                content.clear();
            }
            return;
        };
        self.doc.mutate(|txn| map.clear(txn));
    }

    fn has(&self, key: &str) -> bool {
        match self.live_ref() {
            Some(map) => {
                let txn = self.doc.doc.transact();
                map.contains_key(&txn, key)
            }
            None => self.get(key).is_some(),
        }
    }

    fn keys(&self) -> Vec<String> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    fn entries(&self) -> Vec<(String, Entry)> {
        let Some(map) = self.live_ref() else {
            return match &*self.core.body.read() {
                Body::Detached { content, .. } => content
                    .iter()
                    .map(|(k, slot)| (k.clone(), self.doc.slot_entry(slot)))
                    .collect(),
                Body::Live(_) => Vec::new(),
            };
        };
        let mut outs: Vec<(String, Out)> = {
            let txn = self.doc.doc.transact();
            map.iter(&txn).map(|(k, out)| (k.to_string(), out)).collect()
        };
        outs.sort_by(|a, b| a.0.cmp(&b.0));
        outs.into_iter()
            .map(|(k, out)| (k, self.doc.entry(out)))
            .collect()
    }

    fn subscribe(&self, listener: MapListener) -> Subscription {
        let subscription = self.core.listeners.subscribe_boxed(listener);
        if let Some(map) = self.live_ref() {
            self.doc.watch(Joined::Map(self.core.clone(), map));
        }
        subscription
    }

    fn len(&self) -> usize {
        match self.live_ref() {
            Some(map) => {
                let txn = self.doc.doc.transact();
                map.len(&txn) as usize
            }
            None => match &*self.core.body.read() {
                Body::Detached { content, .. } => content.len(),
                Body::Live(_) => 0,
            },
        }
    }
}

/// A list inside a replicated document.
pub struct ReplicatedList {
    pub(crate) doc: Arc<DocShared>,
    pub(crate) core: Arc<ListCore>,
}

impl ReplicatedList {
    pub(crate) fn live(doc: Arc<DocShared>, array: ArrayRef) -> Self {
        Self {
            doc,
            core: ListCore::live(array),
        }
    }

    pub(crate) fn belongs_to(&self, doc: &Arc<DocShared>) -> bool {
        Arc::ptr_eq(&self.doc, doc)
    }

    fn live_ref(&self) -> Option<ArrayRef> {
        match &*self.core.body.read() {
            Body::Live(array) => Some(array.clone()),
            Body::Detached { .. } => None,
        }
    }
}

impl Transactional for ReplicatedList {
    fn transact(&self, f: &mut dyn FnMut()) {
        self.doc.transact(f)
    }
}

impl CrdtList for ReplicatedList {
    fn id(&self) -> CollectionId {
        match &*self.core.body.read() {
            Body::Live(array) => branch_id(array.as_ref()),
            Body::Detached { .. } => self.core.detached_id.clone(),
        }
    }

    fn factory(&self) -> FactoryHandle {
        Arc::new(ReplicatedFactory::new(self.doc.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get(&self, index: usize) -> Option<Entry> {
        let Some(array) = self.live_ref() else {
            return match &*self.core.body.read() {
                Body::Detached { content, .. } => {
                    content.get(index).map(|slot| self.doc.slot_entry(slot))
                }
                Body::Live(_) => None,
            };
        };
        let out = {
            let txn = self.doc.doc.transact();
            array.get(&txn, index as u32)
        };
        out.map(|out| self.doc.entry(out))
    }

    fn insert(&self, index: usize, entries: Vec<Entry>) -> Result<()> {
        let length = self.len();
        if index > length {
            return Err(StoreError::IndexOutOfBounds { index, length });
        }
        let slots = entries
            .into_iter()
            .map(|entry| self.doc.claim(entry))
            .collect::<Result<Vec<_>>>()?;
        let array = {
            let mut body = self.core.body.write();
            match &mut *body {
                Body::Detached { content, .. } => {
                    drop(content.splice(index..index, slots));
                    return Ok(());
                }
                Body::Live(array) => array.clone(),
            }
        };
        let prelims: Vec<In> = slots.iter().map(Slot::prelim).collect();
        self.doc.mutate(|txn| {
            for (offset, prelim) in prelims.into_iter().enumerate() {
                array.insert(txn, (index + offset) as u32, prelim);
            }
        });
        self.doc
            .go_live(slots, |txn, offset| array.get(txn, (index + offset) as u32));
        Ok(())
    }

    fn delete(&self, index: usize, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let length = self.len();
        if index + count > length {
            return Err(StoreError::IndexOutOfBounds {
                index: index + count - 1,
                length,
            });
        }
        match self.live_ref() {
            Some(array) => self
                .doc
                .mutate(|txn| array.remove_range(txn, index as u32, count as u32)),
            None => {
                if let Body::Detached { content, .. } = &mut *self.core.body.write() {
                    content.drain(index..index + count);
                }
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        match self.live_ref() {
            Some(array) => {
                let txn = self.doc.doc.transact();
                array.len(&txn) as usize
            }
            None => match &*self.core.body.read() {
                Body::Detached { content, .. } => content.len(),
                Body::Live(_) => 0,
            },
        }
    }

    fn to_vec(&self) -> Vec<Entry> {
        let Some(array) = self.live_ref() else {
            return match &*self.core.body.read() {
                Body::Detached { content, .. } => {
                    content.iter().map(|slot| self.doc.slot_entry(slot)).collect()
                }
                Body::Live(_) => Vec::new(),
            };
        };
        let outs: Vec<Out> = {
            let txn = self.doc.doc.transact();
            array.iter(&txn).collect()
        };
        outs.into_iter().map(|out| self.doc.entry(out)).collect()
    }

    fn subscribe(&self, listener: ListListener) -> Subscription {
        let subscription = self.core.listeners.subscribe_boxed(listener);
        if let Some(array) = self.live_ref() {
            self.doc.watch(Joined::List(self.core.clone(), array));
        }
        subscription
    }
}

impl std::fmt::Debug for ReplicatedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReplicatedMap({})", self.id())
    }
}

impl std::fmt::Debug for ReplicatedList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReplicatedList({})", self.id())
    }
}

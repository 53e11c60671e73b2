//! Replicated backend on top of a yrs document.
//!
//! A [`ReplicatedDoc`] is one replica. Maps and lists are yrs `MapRef`s and
//! `ArrayRef`s; local mutations are committed as one encoded yrs update per
//! outermost transaction and handed to [`ReplicatedDoc::on_update`]
//! listeners. Updates from other replicas go through
//! [`ReplicatedDoc::apply_update`], whose changes reach collection listeners
//! as remote events once the yrs transaction has been committed.
//!
//! Sync follows the usual state-vector handshake: a peer sends
//! [`state_vector`](ReplicatedDoc::state_vector), the other answers with
//! [`encode_diff`](ReplicatedDoc::encode_diff).

mod convert;
mod handles;

pub use handles::{ReplicatedFactory, ReplicatedList, ReplicatedMap};

use crate::error::{CollectionKind, Result, StoreError};
use crate::event::{ListEvent, Listeners, MapEvent, Subscription};
use crate::traits::{
    CrdtRoot, Entry, FactoryHandle, ListHandle, MapHandle, RootHandle, Transactional,
};
use crate::value::Value;
use convert::from_any;
use handles::{go_live, Joined, Slot};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};
use yrs::types::{Change, EntryChange};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Doc, Map, MapRef, Observable, Origin, Out, ReadTxn, StateVector, Transact,
    Transaction, TransactionMut, Update,
};

/// Origin attached to transactions that integrate remote updates.
const REMOTE_ORIGIN: &str = "weft:remote";

/// Root map recording the kind of every named root collection.
const ROOTS: &str = "weft:roots";

fn is_remote(txn: &TransactionMut) -> bool {
    txn.origin() == Some(&Origin::from(REMOTE_ORIGIN))
}

/// yrs client id for a replica name. Kept within the 53 bits other yrs
/// implementations can represent.
fn client_id(replica: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    replica.hash(&mut hasher);
    hasher.finish() & 0x001F_FFFF_FFFF_FFFF
}

fn kind_name(kind: CollectionKind) -> &'static str {
    match kind {
        CollectionKind::Map => "map",
        CollectionKind::List => "list",
    }
}

fn parse_kind(out: &Out) -> Option<CollectionKind> {
    match out {
        Out::Any(Any::String(s)) if &**s == "map" => Some(CollectionKind::Map),
        Out::Any(Any::String(s)) if &**s == "list" => Some(CollectionKind::List),
        _ => None,
    }
}

/// Remote events of one collection, waiting for the transaction to end.
enum Pending {
    Map(Listeners<MapEvent>, Vec<MapEvent>),
    List(Listeners<ListEvent>, Vec<ListEvent>),
}

/// State shared by every handle of one replica.
pub(crate) struct DocShared {
    replica: String,
    pub(crate) doc: Doc,
    roots: MapRef,
    depth: Mutex<usize>,
    /// Encoded local updates of the open transaction.
    local: Arc<Mutex<Vec<Vec<u8>>>>,
    remote_changed: Arc<AtomicBool>,
    pending: Mutex<Vec<Pending>>,
    update_listeners: Listeners<Vec<u8>>,
    _updates: Option<yrs::Subscription>,
}

impl DocShared {
    fn new(replica: String) -> Self {
        let doc = Doc::with_client_id(client_id(&replica));
        let roots = doc.get_or_insert_map(ROOTS);
        let local: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let remote_changed = Arc::new(AtomicBool::new(false));

        let sink = local.clone();
        let changed = remote_changed.clone();
        let updates = doc.observe_update_v1(move |txn, event| {
            if is_remote(txn) {
                changed.store(true, Ordering::SeqCst);
            } else {
                sink.lock().push(event.update.clone());
            }
        });
        let updates = match updates {
            Ok(subscription) => Some(subscription),
            Err(err) => {
                error!(replica = %replica, error = ?err, "Could not observe document updates");
                None
            }
        };

        Self {
            replica,
            doc,
            roots,
            depth: Mutex::new(0),
            local,
            remote_changed,
            pending: Mutex::new(Vec::new()),
            update_listeners: Listeners::new(),
            _updates: updates,
        }
    }

    fn begin(&self) {
        *self.depth.lock() += 1;
    }

    /// Close one transaction level. The outermost one publishes everything
    /// committed inside it as a single update.
    fn end(&self) {
        {
            let mut depth = self.depth.lock();
            *depth = depth.saturating_sub(1);
            if *depth > 0 {
                return;
            }
        }
        let updates = std::mem::take(&mut *self.local.lock());
        let merged = match updates.len() {
            0 => return,
            1 => updates,
            _ => {
                let parts: Vec<&[u8]> = updates.iter().map(Vec::as_slice).collect();
                match yrs::merge_updates_v1(&parts) {
                    Ok(merged) => vec![merged],
                    Err(err) => {
                        warn!(error = ?err, "Could not merge transaction updates; sending them one by one");
                        updates
                    }
                }
            }
        };
        for update in merged {
            debug!(replica = %self.replica, bytes = update.len(), "Committed local update");
            self.update_listeners.emit(&update);
        }
    }

    /// Run one local yrs transaction as its own transaction level.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut TransactionMut) -> R) -> R {
        self.begin();
        let _level = Level(self);
        let mut txn = self.doc.transact_mut();
        f(&mut txn)
    }

    pub(crate) fn transact(&self, f: &mut dyn FnMut()) {
        self.begin();
        let _level = Level(self);
        f();
    }

    fn defer(&self, batch: Pending) {
        self.pending.lock().push(batch);
    }

    /// Deliver remote events collected while a remote transaction ran.
    fn dispatch(&self) {
        let batches = std::mem::take(&mut *self.pending.lock());
        for batch in batches {
            match batch {
                Pending::Map(listeners, events) => {
                    listeners.emit(&MapEvent::RemoteBeforeTransaction);
                    for event in &events {
                        listeners.emit(event);
                    }
                    listeners.emit(&MapEvent::RemoteAfterTransaction);
                }
                Pending::List(listeners, events) => {
                    listeners.emit(&ListEvent::RemoteBeforeTransaction);
                    for event in &events {
                        listeners.emit(event);
                    }
                    listeners.emit(&ListEvent::RemoteAfterTransaction);
                }
            }
        }
    }

    /// Public view of yrs content.
    pub(crate) fn entry(self: &Arc<Self>, out: Out) -> Entry {
        match out {
            Out::Any(any) => Entry::Value(from_any(&any)),
            Out::YMap(map) => Entry::Map(Arc::new(ReplicatedMap::live(self.clone(), map))),
            Out::YArray(array) => Entry::List(Arc::new(ReplicatedList::live(self.clone(), array))),
            // Text and XML types are never written by this store
            _ => Entry::Value(Value::Null),
        }
    }

    /// Public view of a detached slot.
    pub(crate) fn slot_entry(self: &Arc<Self>, slot: &Slot) -> Entry {
        match slot {
            Slot::Value(v) => Entry::Value(v.clone()),
            Slot::Map(core) => Entry::Map(Arc::new(ReplicatedMap {
                doc: self.clone(),
                core: core.clone(),
            })),
            Slot::List(core) => Entry::List(Arc::new(ReplicatedList {
                doc: self.clone(),
                core: core.clone(),
            })),
        }
    }

    /// Take ownership of an entry about to be stored. Nested collections must
    /// be detached handles of this very replica.
    pub(crate) fn claim(self: &Arc<Self>, entry: Entry) -> Result<Slot> {
        match entry {
            Entry::Value(v) => Ok(Slot::Value(v)),
            Entry::Map(map) => match map.as_any().downcast_ref::<ReplicatedMap>() {
                Some(handle) if handle.belongs_to(self) => {
                    handle.core.claim()?;
                    Ok(Slot::Map(handle.core.clone()))
                }
                _ => Err(StoreError::ForeignCollection(map.id().to_string())),
            },
            Entry::List(list) => match list.as_any().downcast_ref::<ReplicatedList>() {
                Some(handle) if handle.belongs_to(self) => {
                    handle.core.claim()?;
                    Ok(Slot::List(handle.core.clone()))
                }
                _ => Err(StoreError::ForeignCollection(list.id().to_string())),
            },
        }
    }

    /// Switch freshly written slots over to their integrated content.
    /// `lookup` finds the content of the n-th slot.
    pub(crate) fn go_live(
        self: &Arc<Self>,
        slots: Vec<Slot>,
        lookup: impl Fn(&Transaction<'_>, usize) -> Option<Out>,
    ) {
        if slots.iter().all(|s| matches!(s, Slot::Value(_))) {
            return;
        }
        let mut joined = Vec::new();
        {
            let txn = self.doc.transact();
            for (offset, slot) in slots.iter().enumerate() {
                if let Some(out) = lookup(&txn, offset) {
                    go_live(slot, out, &txn, &mut joined);
                }
            }
        }
        for collection in joined {
            self.watch(collection);
        }
    }

    /// Forward remote yrs events of a live collection to its listeners.
    /// Installed once per collection, and only when someone listens.
    pub(crate) fn watch(self: &Arc<Self>, collection: Joined) {
        let weak: Weak<DocShared> = Arc::downgrade(self);
        match collection {
            Joined::Map(core, map) => {
                if core.listeners.is_empty() {
                    return;
                }
                let mut observer = core.observer.lock();
                if observer.is_some() {
                    return;
                }
                let listeners = core.listeners.clone();
                *observer = Some(map.observe(move |txn, event| {
                    if !is_remote(txn) {
                        return;
                    }
                    let Some(doc) = weak.upgrade() else {
                        return;
                    };
                    let mut changes: Vec<(String, &EntryChange)> = event
                        .keys(txn)
                        .iter()
                        .map(|(key, change)| (key.to_string(), change))
                        .collect();
                    changes.sort_by(|a, b| a.0.cmp(&b.0));
                    let events: Vec<MapEvent> = changes
                        .into_iter()
                        .map(|(key, change)| match change {
                            EntryChange::Inserted(out) => MapEvent::RemoteInsert {
                                key,
                                entry: doc.entry(out.clone()),
                            },
                            EntryChange::Updated(_, out) => MapEvent::RemoteUpdate {
                                key,
                                entry: doc.entry(out.clone()),
                            },
                            EntryChange::Removed(_) => MapEvent::RemoteDelete { key },
                        })
                        .collect();
                    if !events.is_empty() {
                        doc.defer(Pending::Map(listeners.clone(), events));
                    }
                }));
            }
            Joined::List(core, array) => {
                if core.listeners.is_empty() {
                    return;
                }
                let mut observer = core.observer.lock();
                if observer.is_some() {
                    return;
                }
                let listeners = core.listeners.clone();
                *observer = Some(array.observe(move |txn, event| {
                    if !is_remote(txn) {
                        return;
                    }
                    let Some(doc) = weak.upgrade() else {
                        return;
                    };
                    let mut index = 0usize;
                    let mut events = Vec::new();
                    for change in event.delta(txn) {
                        match change {
                            Change::Retain(n) => index += *n as usize,
                            Change::Added(items) => {
                                let entries: Vec<Entry> =
                                    items.iter().map(|out| doc.entry(out.clone())).collect();
                                let count = entries.len();
                                events.push(ListEvent::RemoteInsert { index, entries });
                                index += count;
                            }
                            Change::Removed(n) => events.push(ListEvent::RemoteDelete {
                                index,
                                count: *n as usize,
                            }),
                        }
                    }
                    if !events.is_empty() {
                        doc.defer(Pending::List(listeners.clone(), events));
                    }
                }));
            }
        }
    }

    fn root_kind(&self, name: &str) -> Option<CollectionKind> {
        let txn = self.doc.transact();
        self.roots.get(&txn, name).as_ref().and_then(parse_kind)
    }

    /// Record `name` as a root of `kind`, failing if it already is the other
    /// kind.
    fn register_root(&self, name: &str, kind: CollectionKind) -> Result<()> {
        match self.root_kind(name) {
            Some(existing) if existing != kind => Err(StoreError::KindMismatch {
                name: name.to_string(),
                existing,
            }),
            Some(_) => Ok(()),
            None => {
                self.mutate(|txn| {
                    self.roots
                        .insert(txn, name, Any::String(Arc::from(kind_name(kind))));
                });
                Ok(())
            }
        }
    }
}

/// Closes a transaction level even if the body panics.
struct Level<'a>(&'a DocShared);

impl Drop for Level<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// One replica of a replicated document.
#[derive(Clone)]
pub struct ReplicatedDoc {
    shared: Arc<DocShared>,
}

impl ReplicatedDoc {
    pub fn new(replica: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(DocShared::new(replica.into())),
        }
    }

    pub fn replica_id(&self) -> &str {
        &self.shared.replica
    }

    /// The yrs client id this replica writes with.
    pub fn client_id(&self) -> u64 {
        self.shared.doc.client_id()
    }

    /// This document as a shareable root handle.
    pub fn handle(&self) -> RootHandle {
        Arc::new(self.clone())
    }

    /// Integrate an encoded update from another replica. Returns whether it
    /// changed anything; an update seen before changes nothing.
    pub fn apply_update(&self, update: &[u8]) -> Result<bool> {
        let update = Update::decode_v1(update).map_err(|e| StoreError::Decode(e.to_string()))?;
        self.shared.remote_changed.store(false, Ordering::SeqCst);
        let applied = {
            let mut txn = self.shared.doc.transact_mut_with(REMOTE_ORIGIN);
            txn.apply_update(update)
        };
        self.shared.dispatch();
        applied.map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(self.shared.remote_changed.swap(false, Ordering::SeqCst))
    }

    /// Listen for updates committed locally, one per outermost transaction.
    pub fn on_update<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.shared
            .update_listeners
            .subscribe(move |update: &Vec<u8>| listener(update))
    }

    /// Encoded state vector, for asking a peer what we miss.
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.shared.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// The whole document as one update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.shared.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Everything a peer with `remote_state_vector` has not seen.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        let vector = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let txn = self.shared.doc.transact();
        Ok(txn.encode_diff_v1(&vector))
    }
}

impl std::fmt::Debug for ReplicatedDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedDoc")
            .field("replica", &self.shared.replica)
            .field("client_id", &self.client_id())
            .finish()
    }
}

impl Transactional for ReplicatedDoc {
    fn transact(&self, f: &mut dyn FnMut()) {
        self.shared.transact(f)
    }
}

impl CrdtRoot for ReplicatedDoc {
    fn factory(&self) -> FactoryHandle {
        Arc::new(ReplicatedFactory::new(self.shared.clone()))
    }

    fn get_map(&self, name: &str) -> Result<MapHandle> {
        self.shared.register_root(name, CollectionKind::Map)?;
        let map = self.shared.doc.get_or_insert_map(name);
        Ok(Arc::new(ReplicatedMap::live(self.shared.clone(), map)))
    }

    fn get_list(&self, name: &str) -> Result<ListHandle> {
        self.shared.register_root(name, CollectionKind::List)?;
        let array = self.shared.doc.get_or_insert_array(name);
        Ok(Arc::new(ReplicatedList::live(self.shared.clone(), array)))
    }

    fn roots(&self) -> Vec<(String, CollectionKind)> {
        let txn = self.shared.doc.transact();
        let mut roots: Vec<(String, CollectionKind)> = self
            .shared
            .roots
            .iter(&txn)
            .filter_map(|(name, out)| parse_kind(&out).map(|kind| (name.to_string(), kind)))
            .collect();
        roots.sort_by(|a, b| a.0.cmp(&b.0));
        roots
    }

    fn clear(&self) {
        let roots = self.roots();
        self.transact(&mut || {
            for (name, kind) in &roots {
                match kind {
                    CollectionKind::Map => {
                        if let Ok(map) = self.get_map(name) {
                            map.clear();
                        }
                    }
                    CollectionKind::List => {
                        if let Ok(list) = self.get_list(name) {
                            let _ = list.delete(0, list.len());
                        }
                    }
                }
            }
        });
    }

    fn has_data(&self) -> bool {
        self.roots().into_iter().any(|(name, kind)| match kind {
            CollectionKind::Map => self.get_map(&name).map_or(false, |m| !m.is_empty()),
            CollectionKind::List => self.get_list(&name).map_or(false, |l| !l.is_empty()),
        })
    }
}

//! Index-ordered sequences of domain objects.

use crate::error::Result;
use crate::follow::Follow;
use crate::mapper::{CrdtMapper, SequenceEvent};
use crate::watchable::Watchable;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::warn;
use weft_store::{Entry, ListEvent, ListHandle, Listeners, StoreError, Subscription, TransactExt};

struct Shared<T> {
    mapper: Arc<dyn CrdtMapper<T>>,
    // Positions mirror the store; undecodable entries hold `None`
    cache: Mutex<Vec<Option<T>>>,
    listeners: Listeners<SequenceEvent<T>>,
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    fn decode(&self, entry: &Entry) -> Option<T> {
        match self.mapper.from_crdt(entry) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(error = %err, "Skipping undecodable list element");
                None
            }
        }
    }

    fn rebuild(&self, list: &ListHandle) {
        let fresh: Vec<Option<T>> = list.to_vec().iter().map(|e| self.decode(e)).collect();
        *self.cache.lock() = fresh;
    }

    fn on_event(&self, event: &ListEvent) {
        let change = match event {
            ListEvent::RemoteInsert { index, entries } => {
                let decoded: Vec<Option<T>> = entries.iter().map(|e| self.decode(e)).collect();
                {
                    let mut cache = self.cache.lock();
                    let at = (*index).min(cache.len());
                    cache.splice(at..at, decoded.iter().cloned());
                }
                SequenceEvent::Inserted {
                    index: *index,
                    values: decoded.into_iter().flatten().collect(),
                }
            }
            ListEvent::RemoteDelete { index, count } => {
                {
                    let mut cache = self.cache.lock();
                    let start = (*index).min(cache.len());
                    let end = (start + count).min(cache.len());
                    cache.drain(start..end);
                }
                SequenceEvent::Removed {
                    index: *index,
                    count: *count,
                }
            }
            ListEvent::RemoteBeforeTransaction | ListEvent::RemoteAfterTransaction => return,
        };
        self.listeners.emit(&change);
    }
}

/// A list of domain objects kept in a replicated sequence.
pub struct CrdtMappedList<T> {
    source: Watchable<ListHandle>,
    shared: Arc<Shared<T>>,
    _follow: Arc<Follow>,
}

impl<T> Clone for CrdtMappedList<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            shared: self.shared.clone(),
            _follow: self._follow.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> CrdtMappedList<T> {
    pub fn new(source: impl Into<Watchable<ListHandle>>, mapper: Arc<dyn CrdtMapper<T>>) -> Self {
        let source = source.into();
        let shared = Arc::new(Shared {
            mapper,
            cache: Mutex::new(Vec::new()),
            listeners: Listeners::new(),
        });
        shared.rebuild(&source.get());

        let on_event: Weak<Shared<T>> = Arc::downgrade(&shared);
        let on_swap = on_event.clone();
        let follow = Follow::new(
            &source,
            move |event: &ListEvent| {
                if let Some(shared) = on_event.upgrade() {
                    shared.on_event(event);
                }
            },
            move |list: &ListHandle| {
                if let Some(shared) = on_swap.upgrade() {
                    shared.rebuild(list);
                    shared.listeners.emit(&SequenceEvent::Reset);
                }
            },
        );

        Self {
            source,
            shared,
            _follow: Arc::new(follow),
        }
    }

    pub fn list(&self) -> ListHandle {
        self.source.get()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.shared.cache.lock().get(index).cloned().flatten()
    }

    pub fn len(&self) -> usize {
        self.shared.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.shared.cache.lock().iter().flatten().cloned().collect()
    }

    fn encode(&self, list: &ListHandle, values: &[T]) -> Result<Vec<Entry>> {
        let factory = list.factory();
        values
            .iter()
            .map(|v| self.shared.mapper.to_crdt(v, factory.as_ref()))
            .collect()
    }

    pub fn push(&self, value: T) -> Result<()> {
        let end = self.len();
        self.insert(end, vec![value])
    }

    /// Insert `values` so the first lands at `index`.
    pub fn insert(&self, index: usize, values: Vec<T>) -> Result<()> {
        let list = self.source.get();
        let entries = self.encode(&list, &values)?;
        list.insert(index, entries)?;
        let mut cache = self.shared.cache.lock();
        let at = index.min(cache.len());
        cache.splice(at..at, values.into_iter().map(Some));
        Ok(())
    }

    /// Replace the element at `index`.
    pub fn set(&self, index: usize, value: T) -> Result<()> {
        let list = self.source.get();
        let length = list.len();
        if index >= length {
            return Err(StoreError::IndexOutOfBounds { index, length }.into());
        }
        let entries = self.encode(&list, std::slice::from_ref(&value))?;
        list.transact_with(|| -> Result<()> {
            list.delete(index, 1)?;
            list.insert(index, entries)?;
            Ok(())
        })?;
        if let Some(slot) = self.shared.cache.lock().get_mut(index) {
            *slot = Some(value);
        }
        Ok(())
    }

    /// Remove and return the element at `index`.
    pub fn remove(&self, index: usize) -> Result<Option<T>> {
        self.source.get().delete(index, 1)?;
        let mut cache = self.shared.cache.lock();
        if index < cache.len() {
            Ok(cache.remove(index))
        } else {
            Ok(None)
        }
    }

    pub fn clear(&self) -> Result<()> {
        let list = self.source.get();
        let length = list.len();
        if length > 0 {
            list.delete(0, length)?;
        }
        self.shared.cache.lock().clear();
        Ok(())
    }

    /// Replace the whole sequence in one transaction.
    pub fn set_all(&self, values: Vec<T>) -> Result<()> {
        let list = self.source.get();
        let entries = self.encode(&list, &values)?;
        list.transact_with(|| -> Result<()> {
            let length = list.len();
            if length > 0 {
                list.delete(0, length)?;
            }
            list.insert(0, entries)?;
            Ok(())
        })?;
        *self.shared.cache.lock() = values.into_iter().map(Some).collect();
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.source.get().to_json()
    }

    /// Called for every remote insert or delete, after the cache reflects it.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SequenceEvent<T>) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(listener)
    }
}

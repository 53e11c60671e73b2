//! Typed remote-change events and subscription handling.
//!
//! Each collection kind has its own event enum. Listeners are plain closures
//! registered on a [`Listeners`] set; registration hands back a
//! [`Subscription`] that unsubscribes when disposed or dropped.

use crate::traits::Entry;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Remote mutations observed on a map.
#[derive(Clone, Debug)]
pub enum MapEvent {
    /// A remote transaction touching this map is about to be reported.
    RemoteBeforeTransaction,
    /// A key that did not exist was set.
    RemoteInsert { key: String, entry: Entry },
    /// An existing key was overwritten.
    RemoteUpdate { key: String, entry: Entry },
    /// A key was deleted.
    RemoteDelete { key: String },
    /// All events of the remote transaction have been reported.
    RemoteAfterTransaction,
}

/// Remote mutations observed on a list.
#[derive(Clone, Debug)]
pub enum ListEvent {
    RemoteBeforeTransaction,
    /// `entries` now occupy `index..index + entries.len()`.
    RemoteInsert { index: usize, entries: Vec<Entry> },
    /// `count` elements starting at `index` were removed.
    RemoteDelete { index: usize, count: usize },
    RemoteAfterTransaction,
}

pub type MapListener = Box<dyn Fn(&MapEvent) + Send + Sync>;
pub type ListListener = Box<dyn Fn(&ListEvent) + Send + Sync>;

type SharedListener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct ListenerSet<E> {
    next_id: u64,
    entries: Vec<(u64, SharedListener<E>)>,
}

/// A set of listeners for one event type.
pub struct Listeners<E> {
    inner: Arc<Mutex<ListenerSet<E>>>,
}

impl<E> Clone for Listeners<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: 'static> Listeners<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a listener.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_shared(Arc::new(listener))
    }

    /// Register an already boxed listener.
    pub fn subscribe_boxed(&self, listener: Box<dyn Fn(&E) + Send + Sync>) -> Subscription {
        self.subscribe_shared(Arc::from(listener))
    }

    fn subscribe_shared(&self, listener: SharedListener<E>) -> Subscription {
        let id = {
            let mut set = self.inner.lock();
            let id = set.next_id;
            set.next_id += 1;
            set.entries.push((id, listener));
            id
        };

        let weak: Weak<Mutex<ListenerSet<E>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Deliver `event` to every listener.
    ///
    /// No lock is held while listeners run, so they may subscribe,
    /// unsubscribe or emit again. A listener removed during delivery is not
    /// called afterwards.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<(u64, SharedListener<E>)> = self.inner.lock().entries.clone();
        for (id, listener) in snapshot {
            let still_registered = self.inner.lock().entries.iter().any(|(e, _)| *e == id);
            if still_registered {
                listener(event);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposer returned by every `subscribe`. Unsubscribes exactly once, either
/// through [`Subscription::dispose`] or on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(dispose: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn noop() -> Self {
        Self { dispose: None }
    }

    pub fn dispose(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_subscribers() {
        let listeners: Listeners<u32> = Listeners::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t = total.clone();
        let _sub = listeners.subscribe(move |n| {
            t.fetch_add(*n as usize, Ordering::SeqCst);
        });

        listeners.emit(&3);
        listeners.emit(&4);
        assert_eq!(total.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let listeners: Listeners<u32> = Listeners::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let sub = listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(listeners.len(), 1);

        drop(sub);
        listeners.emit(&1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_listener_may_unsubscribe_another_during_emit() {
        let listeners: Listeners<u32> = Listeners::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let v = victim.clone();
        let _killer = listeners.subscribe(move |_| {
            if let Some(sub) = v.lock().take() {
                sub.dispose();
            }
        });

        let c = calls.clone();
        *victim.lock() = Some(listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

//! Keeping a store subscription attached to whatever a [`Watchable`] points
//! at.

use crate::watchable::Watchable;
use parking_lot::Mutex;
use std::sync::Arc;
use weft_store::{ListEvent, ListHandle, MapEvent, MapHandle, Subscription};

/// A collection handle that reports remote events.
pub(crate) trait Observable: Clone + Send + Sync + 'static {
    type Event: 'static;

    fn observe(&self, listener: Box<dyn Fn(&Self::Event) + Send + Sync>) -> Subscription;
}

impl Observable for MapHandle {
    type Event = MapEvent;

    fn observe(&self, listener: Box<dyn Fn(&MapEvent) + Send + Sync>) -> Subscription {
        self.subscribe(listener)
    }
}

impl Observable for ListHandle {
    type Event = ListEvent;

    fn observe(&self, listener: Box<dyn Fn(&ListEvent) + Send + Sync>) -> Subscription {
        self.subscribe(listener)
    }
}

/// Subscription that moves along with its source.
///
/// On a swap the subscription on the old collection is dropped first, then
/// `on_swap` runs with the new collection, then `listener` is installed on it.
pub(crate) struct Follow {
    _swap: Subscription,
    _current: Arc<Mutex<Option<Subscription>>>,
}

impl Follow {
    pub fn new<H, L, S>(source: &Watchable<H>, listener: L, on_swap: S) -> Self
    where
        H: Observable,
        L: Fn(&H::Event) + Send + Sync + 'static,
        S: Fn(&H) + Send + Sync + 'static,
    {
        let listener: Arc<dyn Fn(&H::Event) + Send + Sync> = Arc::new(listener);
        let install = move |handle: &H| {
            let listener = listener.clone();
            handle.observe(Box::new(move |event: &H::Event| listener(event)))
        };

        let current = Arc::new(Mutex::new(Some(install(&source.get()))));
        let slot = current.clone();
        let swap = source.on_change(move |handle: &H| {
            let stale = slot.lock().take();
            drop(stale);
            on_swap(handle);
            let fresh = install(handle);
            *slot.lock() = Some(fresh);
        });

        Self {
            _swap: swap,
            _current: current,
        }
    }
}

//! Swappable references.

use parking_lot::Mutex;
use std::sync::Arc;
use weft_store::{Listeners, Subscription};

/// A shared reference that can be replaced wholesale.
///
/// Bindings hold a `Watchable<MapHandle>` (or `ListHandle`) instead of the
/// handle itself; when the reference swaps they tear down their subscription
/// on the old collection and subscribe to the new one.
pub struct Watchable<T> {
    current: Arc<Mutex<T>>,
    listeners: Listeners<T>,
}

impl<T> Clone for Watchable<T> {
    fn clone(&self) -> Self {
        Self {
            current: self.current.clone(),
            listeners: self.listeners.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Watchable<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: Arc::new(Mutex::new(value)),
            listeners: Listeners::new(),
        }
    }

    /// The current reference.
    pub fn get(&self) -> T {
        self.current.lock().clone()
    }

    /// Replace the reference and notify every listener once, synchronously.
    pub fn set(&self, value: T) {
        *self.current.lock() = value.clone();
        self.listeners.emit(&value);
    }

    /// Called with the new reference after each swap.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }
}

impl<T: Clone + Send + Sync + 'static> From<T> for Watchable<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

//! Presence and awareness for collaborative editing.
//!
//! Awareness is ephemeral: it is never written to the document and is not
//! part of any sync history. Each user owns exactly one state, versioned by a
//! counter only that user increments.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

/// Who a user is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    pub user_id: String,
    pub name: String,
    pub color: String,
}

impl UserState {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            color: color.into(),
        }
    }
}

/// Where a user is pointing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CursorState {
    pub user_id: String,
    pub x: f64,
    pub y: f64,
    /// Ids of the elements the user has selected.
    pub selection: Vec<String>,
}

impl CursorState {
    pub fn at(user_id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            user_id: user_id.into(),
            x,
            y,
            selection: Vec::new(),
        }
    }

    pub fn with_selection(mut self, selection: Vec<String>) -> Self {
        self.selection = selection;
        self
    }
}

/// Everything one user shares, as sent over the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AwarenessState {
    pub user: UserState,
    pub cursor: Option<CursorState>,
    pub clock: u64,
}

/// Events for presence changes.
#[derive(Clone, Debug)]
pub enum AwarenessEvent {
    /// A user's presence was updated.
    UserUpdated(UserState),
    /// Cursor moved.
    CursorMoved(CursorState),
    /// A user went away.
    UserLeft(String),
}

/// Awareness manager for a session.
pub struct Awareness {
    local_user_id: String,
    states: RwLock<BTreeMap<String, AwarenessState>>,
    dirty: AtomicBool,
    event_tx: broadcast::Sender<AwarenessEvent>,
}

impl Awareness {
    /// Create a new awareness manager.
    pub fn new(local: UserState) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let local_user_id = local.user_id.clone();
        let mut states = BTreeMap::new();
        states.insert(
            local_user_id.clone(),
            AwarenessState {
                user: local,
                cursor: None,
                clock: 0,
            },
        );

        Self {
            local_user_id,
            states: RwLock::new(states),
            dirty: AtomicBool::new(true),
            event_tx,
        }
    }

    /// Get the local user ID.
    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    fn update_local(&self, f: impl FnOnce(&mut AwarenessState)) {
        let mut states = self.states.write();
        if let Some(state) = states.get_mut(&self.local_user_id) {
            f(state);
            state.clock += 1;
        }
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Replace the local user's identity. The user id stays fixed.
    pub fn update_user(&self, user: UserState) {
        let user = UserState {
            user_id: self.local_user_id.clone(),
            ..user
        };
        self.update_local(|state| state.user = user.clone());
        let _ = self.event_tx.send(AwarenessEvent::UserUpdated(user));
    }

    /// Move the local user's cursor.
    pub fn update_cursor(&self, cursor: CursorState) {
        let cursor = CursorState {
            user_id: self.local_user_id.clone(),
            ..cursor
        };
        self.update_local(|state| state.cursor = Some(cursor.clone()));
        let _ = self.event_tx.send(AwarenessEvent::CursorMoved(cursor));
    }

    /// Every known user, local first.
    pub fn get_user_states(&self) -> Vec<UserState> {
        let states = self.states.read();
        let mut users: Vec<UserState> = Vec::with_capacity(states.len());
        if let Some(local) = states.get(&self.local_user_id) {
            users.push(local.user.clone());
        }
        users.extend(
            states
                .values()
                .filter(|s| s.user.user_id != self.local_user_id)
                .map(|s| s.user.clone()),
        );
        users
    }

    /// Every known cursor.
    pub fn get_cursor_states(&self) -> Vec<CursorState> {
        self.states
            .read()
            .values()
            .filter_map(|s| s.cursor.clone())
            .collect()
    }

    /// The local user's state as it should be broadcast.
    pub fn local_state(&self) -> Option<AwarenessState> {
        self.states.read().get(&self.local_user_id).cloned()
    }

    /// Whether the local state changed since the last call.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    /// Merge a state received from another user. Stale or looped-back
    /// states are ignored. Returns whether anything changed.
    pub fn apply_remote(&self, incoming: AwarenessState) -> bool {
        if incoming.user.user_id == self.local_user_id {
            return false;
        }
        let mut states = self.states.write();
        let previous = states.get(&incoming.user.user_id);
        if previous.map_or(false, |p| p.clock >= incoming.clock) {
            trace!(user = %incoming.user.user_id, "Ignoring stale awareness");
            return false;
        }
        let cursor_moved = previous.map(|p| &p.cursor) != Some(&incoming.cursor);
        let user_changed = previous.map(|p| &p.user) != Some(&incoming.user);
        states.insert(incoming.user.user_id.clone(), incoming.clone());
        drop(states);

        if user_changed {
            let _ = self
                .event_tx
                .send(AwarenessEvent::UserUpdated(incoming.user));
        }
        if cursor_moved {
            if let Some(cursor) = incoming.cursor {
                let _ = self.event_tx.send(AwarenessEvent::CursorMoved(cursor));
            }
        }
        true
    }

    /// Forget a remote user.
    pub fn remove(&self, user_id: &str) -> bool {
        if user_id == self.local_user_id {
            return false;
        }
        let removed = self.states.write().remove(user_id).is_some();
        if removed {
            let _ = self
                .event_tx
                .send(AwarenessEvent::UserLeft(user_id.to_string()));
        }
        removed
    }

    /// Subscribe to awareness events.
    pub fn subscribe(&self) -> broadcast::Receiver<AwarenessEvent> {
        self.event_tx.subscribe()
    }
}

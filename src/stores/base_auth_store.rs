//! Base Auth Store

use crate::stores::auth_store::{AuthStore, OnStoreChangeFunc, RemoveListenerFunc};
use crate::tools::dtos::AuthModel;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type SharedCallback = Arc<dyn Fn(&str, Option<&AuthModel>) + Send + Sync>;

/// Registered change callbacks, keyed by a registration id so that
/// removing one registration never affects another (even of the same closure).
#[derive(Default)]
struct Observers {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, SharedCallback)>>,
}

#[derive(Default)]
struct Shared {
    state: RwLock<(String, Option<AuthModel>)>,
    observers: Observers,
}

/// Base AuthStore that stores the auth state in memory.
///
/// Clones share the same state and observers.
#[derive(Default, Clone)]
pub struct BaseAuthStore {
    shared: Arc<Shared>,
}

impl BaseAuthStore {
    /// Creates a new empty BaseAuthStore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Invokes every callback with the given state, in registration order.
    ///
    /// The callback list is snapshotted so callbacks may (un)register freely.
    fn trigger_change(&self, token: &str, model: Option<&AuthModel>) {
        let callbacks: Vec<SharedCallback> = self
            .shared
            .observers
            .entries
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(token, model);
        }
    }
}

impl AuthStore for BaseAuthStore {
    fn token(&self) -> String {
        self.shared.state.read().0.clone()
    }

    fn model(&self) -> Option<AuthModel> {
        self.shared.state.read().1.clone()
    }

    fn save(&self, token: &str, model: Option<AuthModel>) {
        *self.shared.state.write() = (token.to_string(), model.clone());
        self.trigger_change(token, model.as_ref());
    }

    fn on_change(&self, callback: OnStoreChangeFunc, fire_immediately: bool) -> RemoveListenerFunc {
        let callback: SharedCallback = Arc::from(callback);
        let id = self.shared.observers.next_id.fetch_add(1, Ordering::Relaxed);

        self.shared
            .observers
            .entries
            .lock()
            .push((id, Arc::clone(&callback)));

        if fire_immediately {
            let (token, model) = self.shared.state.read().clone();
            callback(&token, model.as_ref());
        }

        let shared = Arc::downgrade(&self.shared);
        Box::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.observers.entries.lock().retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }
}

impl std::fmt::Debug for BaseAuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseAuthStore")
            .field("token", &self.token())
            .field("model", &self.model())
            .finish()
    }
}

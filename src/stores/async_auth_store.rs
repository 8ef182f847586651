//! Async Auth Store
//!
//! AsyncAuthStore is a helper auth store implementation that can be used with
//! any external async persistent layer (key-value db, local file, etc.).
//!
//! # Example
//!
//! ```rust,ignore
//! use coddyspace_sdk::stores::AsyncAuthStore;
//!
//! # async fn run() {
//! let initial = tokio::fs::read_to_string("pb_auth.json").await.ok();
//!
//! let store = AsyncAuthStore::new(
//!     Box::new(|serialized| {
//!         Box::pin(async move {
//!             tokio::fs::write("pb_auth.json", serialized).await?;
//!             Ok(())
//!         })
//!     }),
//!     Some(Box::new(|| {
//!         Box::pin(async move {
//!             tokio::fs::remove_file("pb_auth.json").await.ok();
//!             Ok(())
//!         })
//!     })),
//!     initial,
//! );
//! # }
//! ```

use crate::stores::auth_store::{AuthStore, OnStoreChangeFunc, RemoveListenerFunc};
use crate::stores::base_auth_store::BaseAuthStore;
use crate::tools::dtos::AuthModel;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Type alias for the async save function.
pub type AsyncSaveFunc =
    Box<dyn Fn(String) -> BoxFuture<'static, Result<(), AsyncAuthStoreError>> + Send + Sync>;

/// Type alias for the async clear function.
pub type AsyncClearFunc =
    Box<dyn Fn() -> BoxFuture<'static, Result<(), AsyncAuthStoreError>> + Send + Sync>;

/// Error type for AsyncAuthStore persistence callbacks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AsyncAuthStoreError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Other error: {0}")]
    Other(String),
}

impl From<std::io::Error> for AsyncAuthStoreError {
    fn from(err: std::io::Error) -> Self {
        AsyncAuthStoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AsyncAuthStoreError {
    fn from(err: serde_json::Error) -> Self {
        AsyncAuthStoreError::Serialization(err.to_string())
    }
}

/// Serialized auth state handed to the save function.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SerializedAuthState {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub model: Option<AuthModel>,
}

enum Job {
    Save(String),
    Clear,
}

struct Persistence {
    save_func: AsyncSaveFunc,
    clear_func: Option<AsyncClearFunc>,
    queue: Mutex<Queue>,
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    processing: bool,
}

/// Auth store backed by an external async persistence layer.
///
/// In-memory state updates synchronously, persistence jobs run one at a
/// time in submission order on the tokio runtime.
#[derive(Clone)]
pub struct AsyncAuthStore {
    inner: BaseAuthStore,
    persistence: Arc<Persistence>,
}

impl AsyncAuthStore {
    /// Creates a new AsyncAuthStore.
    ///
    /// * `save_func` - called every time the auth store state needs to be persisted.
    /// * `clear_func` - called when the store is cleared. If not provided,
    ///   `save_func` with an empty payload is used.
    /// * `initial` - serialized state to load into the store.
    ///
    /// Must be called within a tokio runtime if `initial` is set, since
    /// loading it persists the state again.
    pub fn new(
        save_func: AsyncSaveFunc,
        clear_func: Option<AsyncClearFunc>,
        initial: Option<String>,
    ) -> Self {
        let store = Self {
            inner: BaseAuthStore::new(),
            persistence: Arc::new(Persistence {
                save_func,
                clear_func,
                queue: Mutex::new(Queue::default()),
            }),
        };

        if let Some(payload) = initial {
            store.load_initial(&payload);
        }

        store
    }

    fn load_initial(&self, payload: &str) {
        if payload.is_empty() {
            return;
        }

        match serde_json::from_str::<SerializedAuthState>(payload) {
            Ok(state) => self.save(&state.token, state.model),
            Err(err) => tracing::debug!("AsyncAuthStore: ignoring invalid initial state: {}", err),
        }
    }

    fn enqueue(&self, job: Job) {
        let start = {
            let mut queue = self.persistence.queue.lock();
            queue.jobs.push_back(job);
            !std::mem::replace(&mut queue.processing, true)
        };

        if start {
            let persistence = Arc::clone(&self.persistence);
            tokio::spawn(async move { persistence.drain().await });
        }
    }
}

impl Persistence {
    async fn drain(&self) {
        loop {
            let job = {
                let mut queue = self.queue.lock();
                match queue.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        queue.processing = false;
                        return;
                    }
                }
            };

            let result = match job {
                Job::Save(payload) => (self.save_func)(payload).await,
                Job::Clear => match &self.clear_func {
                    Some(clear_func) => clear_func().await,
                    None => (self.save_func)(String::new()).await,
                },
            };

            if let Err(err) = result {
                tracing::warn!("AsyncAuthStore: failed to persist the auth state: {}", err);
            }
        }
    }
}

impl AuthStore for AsyncAuthStore {
    fn token(&self) -> String {
        self.inner.token()
    }

    fn model(&self) -> Option<AuthModel> {
        self.inner.model()
    }

    fn save(&self, token: &str, model: Option<AuthModel>) {
        self.inner.save(token, model.clone());

        let state = SerializedAuthState {
            token: token.to_string(),
            model,
        };
        let payload = serde_json::to_string(&state).unwrap_or_else(|err| {
            tracing::warn!("AsyncAuthStore: failed to stringify the new state: {}", err);
            String::new()
        });

        self.enqueue(Job::Save(payload));
    }

    fn clear(&self) {
        self.inner.clear();
        self.enqueue(Job::Clear);
    }

    fn on_change(&self, callback: OnStoreChangeFunc, fire_immediately: bool) -> RemoveListenerFunc {
        self.inner.on_change(callback, fire_immediately)
    }
}

impl std::fmt::Debug for AsyncAuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncAuthStore")
            .field("token", &self.token())
            .field("model", &self.model())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::dtos::AdminModel;
    use futures_util::FutureExt;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn recording_save(log: Arc<Mutex<Vec<String>>>) -> AsyncSaveFunc {
        Box::new(move |payload| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(payload);
                Ok(())
            }
            .boxed()
        })
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_initial_state_is_loaded_and_persisted() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let initial = r#"{"token":"test_token","model":{"id":"a1","email":"a@b.c"}}"#;

        let store = AsyncAuthStore::new(
            recording_save(Arc::clone(&log)),
            None,
            Some(initial.to_string()),
        );

        assert_eq!(store.token(), "test_token");
        assert_eq!(
            store.model(),
            Some(AuthModel::Admin(AdminModel {
                id: "a1".to_string(),
                email: "a@b.c".to_string(),
                ..Default::default()
            }))
        );

        settle().await;
        assert_eq!(log.lock().len(), 1);
        assert!(log.lock()[0].contains("test_token"));
    }

    #[tokio::test]
    async fn test_clear_falls_back_to_empty_save() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = AsyncAuthStore::new(recording_save(Arc::clone(&log)), None, None);

        store.save("my_token", None);
        store.clear();
        settle().await;

        let log = log.lock().clone();
        assert_eq!(log.len(), 2);
        assert!(log[0].contains("my_token"));
        assert_eq!(log[1], "");
        assert!(store.token().is_empty());
    }

    #[tokio::test]
    async fn test_jobs_run_one_at_a_time_in_order() {
        let (started_tx, mut started_rx) = mpsc::unbounded_channel::<String>();
        let (release_tx, release_rx) = mpsc::unbounded_channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(release_rx));
        let cleared = Arc::new(Mutex::new(false));
        let cleared_clone = Arc::clone(&cleared);

        let store = AsyncAuthStore::new(
            Box::new(move |payload| {
                let started_tx = started_tx.clone();
                let release_rx = Arc::clone(&release_rx);
                async move {
                    let _ = started_tx.send(payload);
                    release_rx.lock().await.recv().await;
                    Ok(())
                }
                .boxed()
            }),
            Some(Box::new(move || {
                let cleared = Arc::clone(&cleared_clone);
                async move {
                    *cleared.lock() = true;
                    Ok(())
                }
                .boxed()
            })),
            None,
        );

        store.save("first", None);
        store.save("second", None);
        store.clear();

        let first = started_rx.recv().await.unwrap();
        assert!(first.contains("first"));

        // the second job must not start before the first completes
        assert!(tokio::time::timeout(Duration::from_millis(50), started_rx.recv())
            .await
            .is_err());

        release_tx.send(()).unwrap();
        let second = started_rx.recv().await.unwrap();
        assert!(second.contains("second"));
        assert!(!*cleared.lock());

        release_tx.send(()).unwrap();
        settle().await;
        assert!(*cleared.lock());
    }
}

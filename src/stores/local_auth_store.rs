//! Local Auth Store
//!
//! A file-based persistent auth store. The state is kept as JSON in a single
//! file, with an automatic fallback to runtime memory when the file can't be
//! written (read-only filesystems, missing directories, etc.).

use crate::stores::auth_store::{AuthStore, OnStoreChangeFunc, RemoveListenerFunc};
use crate::stores::base_auth_store::BaseAuthStore;
use crate::tools::dtos::AuthModel;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default file name of the persisted auth state.
pub const DEFAULT_STORAGE_FILE: &str = ".coddyspace_auth";

/// Serializable auth data for persistence.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct AuthData {
    #[serde(default)]
    token: String,
    #[serde(default)]
    model: Option<AuthModel>,
}

/// The default persistent token store with auto fallback to runtime memory.
///
/// ```rust,ignore
/// use coddyspace_sdk::stores::LocalAuthStore;
///
/// // ./.coddyspace_auth
/// let store = LocalAuthStore::new(None);
///
/// // custom location
/// let store = LocalAuthStore::new(Some("./my_auth.json"));
/// ```
#[derive(Clone)]
pub struct LocalAuthStore {
    inner: BaseAuthStore,
    storage_path: PathBuf,
    storage_fallback: Arc<RwLock<Option<AuthData>>>,
}

impl LocalAuthStore {
    /// Creates a new LocalAuthStore persisting into `storage_path`
    /// (defaults to `.coddyspace_auth` in the current directory).
    pub fn new(storage_path: Option<&str>) -> Self {
        let path = storage_path
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_FILE));

        Self::with_path(path)
    }

    /// Creates a new LocalAuthStore with a file in the user's home directory.
    pub fn in_home_dir(filename: &str) -> Self {
        let path = dirs::home_dir()
            .map(|p| p.join(filename))
            .unwrap_or_else(|| PathBuf::from(filename));

        Self::with_path(path)
    }

    fn with_path(storage_path: PathBuf) -> Self {
        let store = Self {
            inner: BaseAuthStore::new(),
            storage_path,
            storage_fallback: Arc::new(RwLock::new(None)),
        };

        let data = store.storage_get();
        if !data.token.is_empty() || data.model.is_some() {
            store.inner.save(&data.token, data.model);
        }

        store
    }

    /// Returns the storage path.
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    fn storage_get(&self) -> AuthData {
        if let Ok(contents) = fs::read_to_string(&self.storage_path) {
            if let Ok(data) = serde_json::from_str::<AuthData>(&contents) {
                return data;
            }
        }

        self.storage_fallback.read().clone().unwrap_or_default()
    }

    fn storage_set(&self, data: AuthData) {
        match serde_json::to_string_pretty(&data) {
            Ok(json) => {
                if fs::write(&self.storage_path, json).is_ok() {
                    return;
                }
                tracing::debug!(
                    path = %self.storage_path.display(),
                    "auth file is not writable, falling back to memory"
                );
            }
            Err(err) => tracing::warn!("LocalAuthStore: failed to serialize the auth state: {}", err),
        }

        *self.storage_fallback.write() = Some(data);
    }

    fn storage_remove(&self) {
        let _ = fs::remove_file(&self.storage_path);
        *self.storage_fallback.write() = None;
    }
}

impl AuthStore for LocalAuthStore {
    fn token(&self) -> String {
        self.storage_get().token
    }

    fn model(&self) -> Option<AuthModel> {
        self.storage_get().model
    }

    fn save(&self, token: &str, model: Option<AuthModel>) {
        self.storage_set(AuthData {
            token: token.to_string(),
            model: model.clone(),
        });
        self.inner.save(token, model);
    }

    fn clear(&self) {
        self.storage_remove();
        self.inner.clear();
    }

    fn on_change(&self, callback: OnStoreChangeFunc, fire_immediately: bool) -> RemoveListenerFunc {
        self.inner.on_change(callback, fire_immediately)
    }
}

impl std::fmt::Debug for LocalAuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAuthStore")
            .field("storage_path", &self.storage_path)
            .field("token", &self.token())
            .finish()
    }
}

/// Watching the storage file for changes made by other processes.
#[cfg(feature = "file-watcher")]
impl LocalAuthStore {
    /// Starts watching the storage file and notifies the observers whenever
    /// another process modifies it.
    ///
    /// The watcher stops when the returned value is dropped.
    pub fn watch_storage_changes(&self) -> notify::Result<notify::RecommendedWatcher> {
        use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};

        let storage_path = self.storage_path.clone();
        let inner = self.inner.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let Ok(event) = res else {
                    return;
                };
                if !event.kind.is_modify() {
                    return;
                }
                if let Ok(contents) = fs::read_to_string(&storage_path) {
                    if let Ok(data) = serde_json::from_str::<AuthData>(&contents) {
                        inner.save(&data.token, data.model);
                    }
                }
            },
            notify::Config::default(),
        )?;

        watcher.watch(&self.storage_path, RecursiveMode::NonRecursive)?;

        Ok(watcher)
    }
}

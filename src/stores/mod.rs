//! Auth stores module

mod async_auth_store;
mod auth_store;
mod base_auth_store;
mod local_auth_store;

pub use async_auth_store::{
    AsyncAuthStore, AsyncAuthStoreError, AsyncClearFunc, AsyncSaveFunc, SerializedAuthState,
};
pub use auth_store::{AuthStore, OnStoreChangeFunc, RemoveListenerFunc, DEFAULT_COOKIE_KEY};
pub use base_auth_store::BaseAuthStore;
pub use local_auth_store::{LocalAuthStore, DEFAULT_STORAGE_FILE};

//! CoddySpace Rust SDK
//!
//! An async client for the CoddySpace backend: a request dispatcher with
//! auto-cancellation of duplicated requests, pluggable auth stores, a
//! realtime (server-sent events) subscription engine and thin REST services.

pub mod cancellation;
pub mod client;
pub mod client_response_error;
pub mod config;
pub mod services;
pub mod stores;
pub mod tools;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use cancellation::CancelRegistry;
pub use client::{AfterSendFunc, BeforeSendFunc, Client, ClientBuilder};
pub use client_response_error::ClientResponseError;
pub use config::RealtimeConfig;
pub use services::{
    AdminService, BackupService, CollectionService, CrudService, FileService, HealthService,
    LogService, OAuth2AuthConfig, RealtimeMessage, RealtimeService, RecordService,
    SettingsService, Subscription,
};
pub use stores::{
    AsyncAuthStore, AsyncAuthStoreError, AsyncClearFunc, AsyncSaveFunc, AuthStore, BaseAuthStore,
    LocalAuthStore, SerializedAuthState,
};
pub use tools::cookie::{
    cookie_parse, cookie_serialize, CookieError, CookiePriority, ParseOptions, SameSite,
    SerializeOptions,
};
pub use tools::dtos::{
    AdminModel, AuthModel, CollectionModel, ListResult, LogRequestModel, RecordModel,
};
pub use tools::formdata::{FileData, FormDataBuilder, FormValue};
pub use tools::jwt::{get_token_payload, is_token_expired};
pub use tools::options::{
    CommonOptions, FileOptions, FullListOptions, ListOptions, LogStatsOptions, RecordListOptions,
    RecordOptions, RequestBody, RequestKey, SendOptions,
};
pub use transport::{
    EventSourceConnector, HttpRequest, HttpResponse, HttpTransport, ReqwestEventSource,
    ReqwestTransport, SseEvent, TransportBody, TransportError, TransportErrorKind,
};

//! CoddySpace Client

use crate::cancellation::CancelRegistry;
use crate::client_response_error::ClientResponseError;
use crate::config::RealtimeConfig;
use crate::services::{
    AdminService, BackupService, CollectionService, FileService, HealthService, LogService,
    RealtimeService, RecordService, SettingsService,
};
use crate::stores::{AuthStore, BaseAuthStore};
use crate::tools::dtos::RecordModel;
use crate::tools::formdata::fields_to_json;
use crate::tools::options::{serialize_query_params, FileOptions, RequestBody, SendOptions};
use crate::transport::{
    EventSourceConnector, HttpRequest, HttpResponse, HttpTransport, ReqwestEventSource,
    ReqwestTransport, TransportBody,
};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Hook invoked right before a request is handed to the transport.
/// It may rewrite any part of the prepared request.
pub type BeforeSendFunc = Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, HttpRequest> + Send + Sync>;

/// Hook invoked with the raw response and its decoded body.
/// The returned value replaces the decoded body.
pub type AfterSendFunc =
    Arc<dyn Fn(&HttpResponse, Value) -> BoxFuture<'static, Value> + Send + Sync>;

/// CoddySpace Client for making API requests.
pub struct Client {
    /// The base backend URL address.
    base_url: String,

    /// Language code for the Accept-Language header.
    lang: String,

    auth_store: Arc<dyn AuthStore>,

    transport: Arc<dyn HttpTransport>,

    /// In-flight requests by request key.
    cancel_registry: CancelRegistry,

    enable_auto_cancellation: AtomicBool,

    /// Deprecated send option aliases already reported.
    warned_aliases: Mutex<HashSet<&'static str>>,

    before_send: Option<BeforeSendFunc>,

    after_send: Option<AfterSendFunc>,

    realtime: RealtimeService,
}

/// Configures and builds a [`Client`].
pub struct ClientBuilder {
    base_url: String,
    lang: String,
    auth_store: Option<Arc<dyn AuthStore>>,
    http_transport: Option<Arc<dyn HttpTransport>>,
    event_source: Option<Arc<dyn EventSourceConnector>>,
    realtime_config: RealtimeConfig,
    auto_cancellation: bool,
    before_send: Option<BeforeSendFunc>,
    after_send: Option<AfterSendFunc>,
}

impl ClientBuilder {
    fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            lang: "en-US".to_string(),
            auth_store: None,
            http_transport: None,
            event_source: None,
            realtime_config: RealtimeConfig::default(),
            auto_cancellation: true,
            before_send: None,
            after_send: None,
        }
    }

    /// Sets the Accept-Language header value (defaults to `en-US`).
    pub fn lang(mut self, lang: &str) -> Self {
        self.lang = lang.to_string();
        self
    }

    /// Sets the auth store (defaults to an in-memory [`BaseAuthStore`]).
    pub fn auth_store<S: AuthStore + 'static>(mut self, store: S) -> Self {
        self.auth_store = Some(Arc::new(store));
        self
    }

    /// Replaces the request/response transport.
    pub fn http_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http_transport = Some(transport);
        self
    }

    /// Replaces the server-sent events transport.
    pub fn event_source(mut self, connector: Arc<dyn EventSourceConnector>) -> Self {
        self.event_source = Some(connector);
        self
    }

    pub fn realtime_config(mut self, config: RealtimeConfig) -> Self {
        self.realtime_config = config;
        self
    }

    /// Enables or disables the auto cancellation of duplicated requests.
    pub fn auto_cancellation(mut self, enable: bool) -> Self {
        self.auto_cancellation = enable;
        self
    }

    pub fn before_send<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HttpRequest> + Send + 'static,
    {
        self.before_send = Some(Arc::new(move |request| hook(request).boxed()));
        self
    }

    pub fn after_send<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(&HttpResponse, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        self.after_send = Some(Arc::new(move |response: &HttpResponse, data: Value| {
            hook(response, data).boxed()
        }));
        self
    }

    pub fn build(self) -> Arc<Client> {
        let http = reqwest::Client::new();
        let transport = self
            .http_transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::with_client(http.clone())));
        let event_source = self
            .event_source
            .unwrap_or_else(|| Arc::new(ReqwestEventSource::with_client(http)));
        let auth_store = self
            .auth_store
            .unwrap_or_else(|| Arc::new(BaseAuthStore::new()));
        let base_url = self.base_url.trim_end_matches('/').to_string();
        let realtime_url = format!("{}/api/realtime", base_url);
        let realtime_config = self.realtime_config;

        Arc::new_cyclic(|client| Client {
            base_url,
            lang: self.lang,
            auth_store,
            transport,
            cancel_registry: CancelRegistry::new(),
            enable_auto_cancellation: AtomicBool::new(self.auto_cancellation),
            warned_aliases: Mutex::new(HashSet::new()),
            before_send: self.before_send,
            after_send: self.after_send,
            realtime: RealtimeService::new(
                client.clone(),
                event_source,
                realtime_url,
                realtime_config,
            ),
        })
    }
}

impl Client {
    /// Creates a new client with the default settings.
    pub fn new(base_url: &str) -> Arc<Self> {
        Self::builder(base_url).build()
    }

    /// Creates a new client with custom auth store and language.
    pub fn with_auth_store<S: AuthStore + 'static>(base_url: &str, auth_store: S, lang: &str) -> Arc<Self> {
        Self::builder(base_url).auth_store(auth_store).lang(lang).build()
    }

    pub fn builder(base_url: &str) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the language code.
    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// Returns the auth store.
    pub fn auth_store(&self) -> &Arc<dyn AuthStore> {
        &self.auth_store
    }

    /// Builds a full client URL by safely concatenating the provided path.
    pub fn build_url(&self, path: &str) -> String {
        let mut url = self.base_url.clone();

        if !path.is_empty() {
            if !url.ends_with('/') {
                url.push('/');
            }
            url.push_str(path.strip_prefix('/').unwrap_or(path));
        }

        url
    }

    /// Globally enable or disable auto cancellation for pending duplicated requests.
    pub fn auto_cancellation(&self, enable: bool) -> &Self {
        self.enable_auto_cancellation.store(enable, Ordering::Relaxed);
        self
    }

    /// Cancels a single pending request by its request key.
    pub fn cancel_request(&self, request_key: &str) -> &Self {
        self.cancel_registry.cancel(request_key);
        self
    }

    /// Cancels all pending requests.
    pub fn cancel_all_requests(&self) -> &Self {
        self.cancel_registry.cancel_all();
        self
    }

    /// Legacy alias of `files().get_url()`.
    pub fn get_file_url(
        self: &Arc<Self>,
        record: &RecordModel,
        filename: &str,
        options: Option<FileOptions>,
    ) -> String {
        self.files().get_url(record, filename, options)
    }

    pub fn realtime(&self) -> &RealtimeService {
        &self.realtime
    }

    pub fn admins(self: &Arc<Self>) -> AdminService {
        AdminService::new(Arc::clone(self))
    }

    /// Returns the RecordService for the specified collection.
    pub fn collection(self: &Arc<Self>, id_or_name: &str) -> RecordService {
        RecordService::new(Arc::clone(self), id_or_name)
    }

    pub fn collections(self: &Arc<Self>) -> CollectionService {
        CollectionService::new(Arc::clone(self))
    }

    pub fn files(self: &Arc<Self>) -> FileService {
        FileService::new(Arc::clone(self))
    }

    pub fn logs(self: &Arc<Self>) -> LogService {
        LogService::new(Arc::clone(self))
    }

    pub fn settings(self: &Arc<Self>) -> SettingsService {
        SettingsService::new(Arc::clone(self))
    }

    pub fn health(self: &Arc<Self>) -> HealthService {
        HealthService::new(Arc::clone(self))
    }

    pub fn backups(self: &Arc<Self>) -> BackupService {
        BackupService::new(Arc::clone(self))
    }

    /// Sends an API HTTP request.
    ///
    /// Unless opted out, a pending request with the same request key (by
    /// default the method followed by `path`) is cancelled first.
    pub async fn send<T: DeserializeOwned>(
        &self,
        path: &str,
        options: SendOptions,
    ) -> Result<T, ClientResponseError> {
        let (options, aliases) = options.normalize();
        self.warn_deprecated(&aliases);

        let mut url = self.build_url(path);
        let query = serialize_query_params(&options.query);
        if !query.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&query);
        }

        let is_multipart = options.body.as_ref().is_some_and(RequestBody::is_multipart);
        let headers = self.prepare_headers(options.headers, is_multipart);
        let body = options.body.map(|body| match body {
            RequestBody::Json(Value::String(text)) => TransportBody::Text(text),
            RequestBody::Json(value) => TransportBody::Text(value.to_string()),
            RequestBody::Fields(fields) => TransportBody::Text(fields_to_json(&fields).to_string()),
            RequestBody::Multipart(fields) => TransportBody::Multipart(fields),
        });

        let registration = if self.enable_auto_cancellation.load(Ordering::Relaxed) {
            options
                .request_key
                .resolve(&options.method, path)
                .map(|key| {
                    let token = CancellationToken::new();
                    let generation = self.cancel_registry.register(&key, token.clone());
                    (key, generation, token)
                })
        } else {
            None
        };

        let request = HttpRequest {
            method: options.method,
            url,
            headers,
            body,
        };
        let request_url = request.url.clone();
        tracing::debug!(method = %request.method, url = %request.url, "sending request");

        let exchange = async {
            let request = match &self.before_send {
                Some(hook) => hook(request).await,
                None => request,
            };
            let url = request.url.clone();
            self.transport
                .execute(request)
                .await
                .map_err(|err| ClientResponseError::from_transport(&url, err))
        };

        let outcome = match &registration {
            Some((_, _, token)) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ClientResponseError::abort(&request_url)),
                    result = exchange => result,
                }
            }
            None => exchange.await,
        };

        if let Some((key, generation, _)) = &registration {
            self.cancel_registry.release(key, *generation);
        }

        let response = outcome?;

        // all api responses are expected to be json, except 204 and the like
        let mut data = serde_json::from_str::<Value>(&response.body)
            .unwrap_or_else(|_| Value::Object(Default::default()));

        if let Some(hook) = &self.after_send {
            data = hook(&response, data).await;
        }

        if response.status >= 400 {
            return Err(ClientResponseError::new(&response.url, response.status, data));
        }

        serde_json::from_value(data).map_err(|err| {
            let mut err = ClientResponseError::from(err);
            err.url = response.url.clone();
            err.status = response.status;
            err
        })
    }

    fn prepare_headers(
        &self,
        mut headers: HashMap<String, String>,
        is_multipart: bool,
    ) -> HashMap<String, String> {
        let has = |headers: &HashMap<String, String>, name: &str| {
            headers.keys().any(|k| k.eq_ignore_ascii_case(name))
        };

        // the multipart boundary is generated by the transport
        if !is_multipart && !has(&headers, "Content-Type") {
            headers.insert("Content-Type".to_string(), "application/json".to_string());
        }

        if !has(&headers, "Accept-Language") {
            headers.insert("Accept-Language".to_string(), self.lang.clone());
        }

        let token = self.auth_store.token();
        if !token.is_empty() && !has(&headers, "Authorization") {
            headers.insert("Authorization".to_string(), token);
        }

        headers
    }

    fn warn_deprecated(&self, aliases: &[&'static str]) {
        if aliases.is_empty() {
            return;
        }

        let mut warned = self.warned_aliases.lock();
        for alias in aliases {
            if warned.insert(alias) {
                tracing::warn!(
                    "the `{}` send option is deprecated, use `query` or `request_key` instead",
                    alias
                );
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.realtime.disconnect();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("lang", &self.lang)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeHttp;
    use crate::tools::formdata::{FileData, FormValue};
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_build_url() {
        let client = Client::new("http://localhost:8090/");
        assert_eq!(client.build_url("/api/health"), "http://localhost:8090/api/health");
        assert_eq!(client.build_url("api/health"), "http://localhost:8090/api/health");
        assert_eq!(client.build_url(""), "http://localhost:8090");
    }

    #[tokio::test]
    async fn test_send_injects_default_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/items"))
            .and(header("content-type", "application/json"))
            .and(header("accept-language", "de-DE"))
            .and(header("authorization", "token123"))
            .and(body_json(json!({"title": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "i1"})))
            .expect(1)
            .mount(&server)
            .await;

        let store = BaseAuthStore::new();
        store.save("token123", None);
        let client = Client::with_auth_store(&server.uri(), store, "de-DE");

        let result: Value = client
            .send("/api/items", SendOptions::post().with_body(json!({"title": "hello"})))
            .await
            .unwrap();
        assert_eq!(result["id"], "i1");
    }

    #[tokio::test]
    async fn test_send_keeps_explicit_headers() {
        let http = Arc::new(FakeHttp::new());
        let client = Client::builder("http://127.0.0.1:8090")
            .http_transport(http.clone())
            .build();
        client.auth_store().save("stored", None);

        let options = SendOptions::get()
            .with_header("authorization", "custom")
            .with_header("content-type", "text/plain");
        let _: Value = client.send("/api/x", options).await.unwrap();

        let request = http.last_request().unwrap();
        assert_eq!(request.header("Authorization"), Some("custom"));
        assert_eq!(request.header("Content-Type"), Some("text/plain"));
        assert_eq!(request.headers.len(), 3);
    }

    #[tokio::test]
    async fn test_send_serializes_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/items"))
            .and(query_param("filter", "a = 'b c'"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new(&server.uri());
        let options = SendOptions::get()
            .with_query("filter", "a = 'b c'")
            .with_query("page", 2)
            .with_query("skipped", Value::Null);

        assert_ok!(client.send::<Value>("/api/items", options).await);
    }

    #[tokio::test]
    async fn test_unknown_options_and_aliases_become_query_and_key() {
        let http = Arc::new(FakeHttp::new());
        let client = Client::builder("http://127.0.0.1:8090")
            .http_transport(http.clone())
            .build();

        let options: SendOptions = serde_json::from_value(json!({
            "method": "get",
            "params": {"a": "from-params", "b": "kept"},
            "query": {"a": "from-query"},
            "$cancelKey": "legacy",
            "expand": "rel"
        }))
        .unwrap();
        let _: Value = client.send("/api/x", options).await.unwrap();

        let request = http.last_request().unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(
            request.url,
            "http://127.0.0.1:8090/api/x?a=from-query&b=kept&expand=rel"
        );
    }

    #[tokio::test]
    async fn test_error_status_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": 400,
                "message": "Invalid filter.",
                "data": {}
            })))
            .mount(&server)
            .await;

        let client = Client::new(&server.uri());
        let err = assert_err!(client.send::<Value>("/api/items", SendOptions::get()).await);

        assert_eq!(err.status, 400);
        assert_eq!(err.message, "Invalid filter.");
        assert!(!err.is_abort);
        assert!(err.url.ends_with("/api/items"));
    }

    #[tokio::test]
    async fn test_error_status_without_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad gateway"))
            .mount(&server)
            .await;

        let client = Client::new(&server.uri());
        let err = assert_err!(client.send::<Value>("/api/items", SendOptions::get()).await);

        assert_eq!(err.status, 502);
        assert!(err.response.is_empty());
        assert_eq!(err.message, "Something went wrong while processing your request.");
    }

    #[tokio::test]
    async fn test_empty_success_body_decodes_as_empty_object() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = Client::new(&server.uri());
        let result: Value = client.send("/api/items/1", SendOptions::delete()).await.unwrap();
        assert_eq!(result, json!({}));
    }

    #[tokio::test]
    async fn test_duplicated_request_key_aborts_the_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true}))
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;

        let client = Client::new(&server.uri());
        let (first, second) = tokio::join!(
            client.send::<Value>("/api/a", SendOptions::get().with_request_key("k1")),
            client.send::<Value>("/api/b", SendOptions::get().with_request_key("k1")),
        );

        let err = first.unwrap_err();
        assert!(err.is_abort);
        assert_eq!(err.status, 0);
        assert_eq!(second.unwrap()["ok"], true);
        assert!(client.cancel_registry.is_empty());
    }

    #[tokio::test]
    async fn test_same_path_without_key_is_superseded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;

        let client = Client::new(&server.uri());
        let (first, second) = tokio::join!(
            client.send::<Value>("/api/a", SendOptions::get()),
            client.send::<Value>("/api/a", SendOptions::get()),
        );

        assert!(first.unwrap_err().is_abort);
        assert_ok!(second);
    }

    #[tokio::test]
    async fn test_empty_request_key_is_superseded_by_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;

        let client = Client::new(&server.uri());
        let (first, second) = tokio::join!(
            client.send::<Value>("/api/a", SendOptions::get().with_request_key("")),
            client.send::<Value>("/api/a", SendOptions::get()),
        );

        assert!(first.unwrap_err().is_abort);
        assert_ok!(second);
    }

    #[tokio::test]
    async fn test_disabled_auto_cancellation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(3)
            .mount(&server)
            .await;

        let client = Client::new(&server.uri());

        let (a, b) = tokio::join!(
            client.send::<Value>("/api/a", SendOptions::get().without_auto_cancel()),
            client.send::<Value>("/api/a", SendOptions::get().without_auto_cancel()),
        );
        assert_ok!(a);
        assert_ok!(b);

        client.auto_cancellation(false);
        assert_ok!(client.send::<Value>("/api/a", SendOptions::get()).await);
    }

    #[tokio::test]
    async fn test_cancel_request_by_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .mount(&server)
            .await;

        let client = Client::new(&server.uri());
        let pending = client.send::<Value>("/api/a", SendOptions::get().with_request_key("slow"));
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.cancel_request("slow");
        };

        let (result, _) = tokio::join!(pending, cancel);
        assert!(result.unwrap_err().is_abort);
    }

    #[tokio::test]
    async fn test_fields_with_file_become_multipart() {
        let http = Arc::new(FakeHttp::new());
        let client = Client::builder("http://127.0.0.1:8090")
            .http_transport(http.clone())
            .build();

        let fields = vec![
            ("title".to_string(), FormValue::from("doc")),
            (
                "file".to_string(),
                FormValue::from(FileData::new("a.txt", b"abc".to_vec(), None)),
            ),
        ];
        let _: Value = client
            .send("/api/upload", SendOptions::post().with_body(fields))
            .await
            .unwrap();

        let request = http.last_request().unwrap();
        assert!(request.header("Content-Type").is_none());
        assert!(matches!(request.body, Some(TransportBody::Multipart(ref f)) if f.len() == 2));
    }

    #[tokio::test]
    async fn test_fields_without_file_become_json() {
        let http = Arc::new(FakeHttp::new());
        let client = Client::builder("http://127.0.0.1:8090")
            .http_transport(http.clone())
            .build();

        let fields = vec![("title".to_string(), FormValue::from("doc"))];
        let _: Value = client
            .send("/api/upload", SendOptions::post().with_body(fields))
            .await
            .unwrap();

        let request = http.last_request().unwrap();
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(request.body, Some(TransportBody::Text(r#"{"title":"doc"}"#.to_string())));
    }

    #[tokio::test]
    async fn test_before_and_after_send_hooks() {
        let http = Arc::new(FakeHttp::new());
        let client = Client::builder("http://127.0.0.1:8090")
            .http_transport(http.clone())
            .before_send(|mut request: HttpRequest| async move {
                request.url.push_str("?hooked=1");
                request.headers.insert("X-Hook".to_string(), "yes".to_string());
                request
            })
            .after_send(|response: &HttpResponse, mut data: Value| {
                let status = response.status;
                async move {
                    data["status"] = json!(status);
                    data
                }
            })
            .build();

        let result: Value = client.send("/api/x", SendOptions::get()).await.unwrap();
        assert_eq!(result["status"], 200);

        let request = http.last_request().unwrap();
        assert_eq!(request.url, "http://127.0.0.1:8090/api/x?hooked=1");
        assert_eq!(request.header("x-hook"), Some("yes"));
    }

    #[tokio::test]
    async fn test_decode_failure_is_reported() {
        let http = Arc::new(FakeHttp::new());
        let client = Client::builder("http://127.0.0.1:8090")
            .http_transport(http.clone())
            .build();

        let err = assert_err!(client.send::<Vec<String>>("/api/x", SendOptions::get()).await);
        assert_eq!(err.status, 200);
        assert!(err.original_error.is_some());
    }
}

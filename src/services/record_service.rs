//! Record Service

use crate::client_response_error::ClientResponseError;
use crate::services::crud_service::{with_body, with_method, CrudService};
use crate::services::realtime_service::{RealtimeMessage, Subscription};
use crate::tools::dtos::{AuthMethodsList, AuthModel, ExternalAuthModel, RecordAuthResponse, RecordModel};
use crate::tools::encoding::{decode_uri_component, encode_uri_component};
use crate::tools::options::{RecordOptions, RequestBody, SendOptions};
use crate::Client;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives the provider authorization url the user has to visit.
pub type UrlCallbackFunc = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Settings of the all-in-one OAuth2 flow, see [`RecordService::auth_with_oauth2`].
#[derive(Clone)]
pub struct OAuth2AuthConfig {
    /// Name of a provider returned by `list_auth_methods`.
    pub provider: String,

    /// Replaces the `scope` param of the provider url.
    pub scopes: Vec<String>,

    /// Data for the record created on first sign-in.
    pub create_data: Option<Value>,

    pub url_callback: UrlCallbackFunc,

    /// Options of the final `auth_with_oauth2_code` request.
    pub options: RecordOptions,
}

impl OAuth2AuthConfig {
    pub fn new<F, Fut>(provider: &str, url_callback: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            provider: provider.to_string(),
            scopes: Vec::new(),
            create_data: None,
            url_callback: Arc::new(move |url| url_callback(url).boxed()),
            options: RecordOptions::default(),
        }
    }

    pub fn scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn create_data(mut self, data: Value) -> Self {
        self.create_data = Some(data);
        self
    }

    pub fn options(mut self, options: RecordOptions) -> Self {
        self.options = options;
        self
    }
}

impl std::fmt::Debug for OAuth2AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2AuthConfig")
            .field("provider", &self.provider)
            .field("scopes", &self.scopes)
            .field("create_data", &self.create_data)
            .finish_non_exhaustive()
    }
}

/// Service for the record API endpoints of a single collection.
#[derive(Debug, Clone)]
pub struct RecordService {
    crud: CrudService<RecordModel>,
    collection_id_or_name: String,
}

impl Deref for RecordService {
    type Target = CrudService<RecordModel>;

    fn deref(&self) -> &Self::Target {
        &self.crud
    }
}

impl RecordService {
    /// Creates a new RecordService for the specified collection.
    pub fn new(client: Arc<Client>, collection_id_or_name: &str) -> Self {
        let base = format!(
            "/api/collections/{}/records",
            encode_uri_component(collection_id_or_name)
        );

        Self {
            crud: CrudService::new(client, base),
            collection_id_or_name: collection_id_or_name.to_string(),
        }
    }

    pub fn collection_id_or_name(&self) -> &str {
        &self.collection_id_or_name
    }

    /// Returns the current collection service base path.
    pub fn base_collection_path(&self) -> String {
        format!(
            "/api/collections/{}",
            encode_uri_component(&self.collection_id_or_name)
        )
    }

    fn is_own_auth_record(&self, model: &Option<AuthModel>, id: &str) -> bool {
        match model {
            Some(AuthModel::Record(record)) => {
                record.id == id
                    && (record.collection_id == self.collection_id_or_name
                        || record.collection_name == self.collection_id_or_name)
            }
            _ => false,
        }
    }

    // ---------------------------------------------------------------
    // Realtime handlers
    // ---------------------------------------------------------------

    /// Subscribes to realtime changes of the collection.
    ///
    /// `"*"` listens to every record of the collection, any other topic is
    /// treated as a record id (or custom suffix) under the collection.
    pub async fn subscribe<F>(&self, topic: &str, callback: F) -> Result<Subscription, ClientResponseError>
    where
        F: Fn(RealtimeMessage) + Send + Sync + 'static,
    {
        if topic.is_empty() {
            return Err(ClientResponseError::local("Missing topic."));
        }

        self.client()
            .realtime()
            .subscribe(&self.realtime_topic(topic), callback)
            .await
    }

    /// Unsubscribes from `topic`, or from every subscription of the
    /// collection when `None`.
    pub async fn unsubscribe(&self, topic: Option<&str>) -> Result<(), ClientResponseError> {
        let realtime = self.client().realtime();

        match topic {
            Some(topic) if !topic.is_empty() => realtime.unsubscribe(Some(&self.realtime_topic(topic))).await,
            _ => {
                // "posts" and "posts/*" but not "posts_archive"
                let name = self.collection_id_or_name.as_str();
                realtime
                    .unsubscribe_matching(|topic| match topic.strip_prefix(name) {
                        Some(rest) => rest.is_empty() || rest.starts_with('/'),
                        None => false,
                    })
                    .await
            }
        }
    }

    fn realtime_topic(&self, topic: &str) -> String {
        if topic == "*" {
            self.collection_id_or_name.clone()
        } else {
            format!("{}/{}", self.collection_id_or_name, topic)
        }
    }

    // ---------------------------------------------------------------
    // Crud handlers
    // ---------------------------------------------------------------

    /// Updates a record. If it is the authenticated record, the auth store
    /// model is replaced with the result.
    pub async fn update(
        &self,
        id: &str,
        body: impl Into<RequestBody>,
        options: Option<RecordOptions>,
    ) -> Result<RecordModel, ClientResponseError> {
        let item = self.crud.update(id, body, options).await?;

        let store = self.client().auth_store();
        if self.is_own_auth_record(&store.model(), &item.id) {
            store.save(&store.token(), Some(AuthModel::Record(item.clone())));
        }

        Ok(item)
    }

    /// Deletes a record. If it is the authenticated record, the auth store
    /// is cleared.
    pub async fn delete(
        &self,
        id: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let deleted = self.crud.delete(id, options).await?;

        let store = self.client().auth_store();
        if deleted && self.is_own_auth_record(&store.model(), id) {
            store.clear();
        }

        Ok(deleted)
    }

    // ---------------------------------------------------------------
    // Auth handlers
    // ---------------------------------------------------------------

    async fn send_auth(
        &self,
        path: &str,
        options: SendOptions,
    ) -> Result<RecordAuthResponse, ClientResponseError> {
        let auth: RecordAuthResponse = self
            .client()
            .send(&format!("{}{}", self.base_collection_path(), path), options)
            .await?;

        self.client()
            .auth_store()
            .save(&auth.token, Some(AuthModel::Record(auth.record.clone())));

        Ok(auth)
    }

    async fn send_action(
        &self,
        path: &str,
        body: Value,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let options = with_body(with_method(options.unwrap_or_default(), "POST"), body);
        self.client()
            .send::<Value>(&format!("{}{}", self.base_collection_path(), path), options)
            .await?;
        Ok(true)
    }

    /// Returns all available collection auth methods.
    pub async fn list_auth_methods(
        &self,
        options: Option<SendOptions>,
    ) -> Result<AuthMethodsList, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "GET");
        self.client()
            .send(&format!("{}/auth-methods", self.base_collection_path()), options)
            .await
    }

    /// Authenticates a single auth collection record via its username/email
    /// and password and saves the result in the auth store.
    pub async fn auth_with_password(
        &self,
        username_or_email: &str,
        password: &str,
        options: Option<RecordOptions>,
    ) -> Result<RecordAuthResponse, ClientResponseError> {
        let options = with_method(options.unwrap_or_default().into(), "POST");
        let options = with_body(
            options,
            json!({
                "identity": username_or_email,
                "password": password,
            }),
        );

        self.send_auth("/auth-with-password", options).await
    }

    /// Authenticates a single auth collection record with an OAuth2 code.
    ///
    /// If the user is new, the record is created with `create_data`.
    pub async fn auth_with_oauth2_code(
        &self,
        provider: &str,
        code: &str,
        code_verifier: &str,
        redirect_url: &str,
        create_data: Option<Value>,
        options: Option<RecordOptions>,
    ) -> Result<RecordAuthResponse, ClientResponseError> {
        let options = with_method(options.unwrap_or_default().into(), "POST");
        let options = with_body(
            options,
            json!({
                "provider": provider,
                "code": code,
                "codeVerifier": code_verifier,
                "redirectUrl": redirect_url,
                "createData": create_data,
            }),
        );

        self.send_auth("/auth-with-oauth2", options).await
    }

    /// Authenticates with an OAuth2 provider without custom redirect handling.
    ///
    /// A one-off `@oauth2` realtime subscription waits for the server to
    /// forward the provider redirect, while `url_callback` receives the url
    /// the user must open.
    pub async fn auth_with_oauth2(
        &self,
        config: OAuth2AuthConfig,
    ) -> Result<RecordAuthResponse, ClientResponseError> {
        let methods = self.list_auth_methods(None).await?;
        let provider = methods
            .auth_providers
            .into_iter()
            .find(|p| p.name == config.provider)
            .ok_or_else(|| {
                ClientResponseError::local(format!(
                    "Missing or invalid provider \"{}\".",
                    config.provider
                ))
            })?;

        let redirect_url = self.client().build_url("/api/oauth2-redirect");
        let realtime = self.client().realtime();

        let mut closed = realtime.closed();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = realtime
            .subscribe("@oauth2", move |message| {
                let _ = tx.send(message);
            })
            .await?;

        let mut replacements = vec![("state".to_string(), realtime.client_id())];
        if !config.scopes.is_empty() {
            replacements.push(("scope".to_string(), config.scopes.join(" ")));
        }
        let url = replace_query_params(&format!("{}{}", provider.auth_url, redirect_url), &replacements);

        (config.url_callback)(url).await;

        // a closed connection never delivers the redirect
        let message = tokio::select! {
            biased;
            message = rx.recv() => message,
            _ = closed.changed() => None,
        };
        let session = realtime.client_id();
        subscription.unsubscribe().await?;

        let message = message
            .ok_or_else(|| ClientResponseError::local("The OAuth2 redirect was never received."))?;

        let state = message.extra.get("state").and_then(Value::as_str).unwrap_or_default();
        if state.is_empty() || state != session {
            return Err(ClientResponseError::local("State parameters don't match."));
        }

        let code = message.extra.get("code").and_then(Value::as_str).unwrap_or_default();

        self.auth_with_oauth2_code(
            &provider.name,
            code,
            &provider.code_verifier,
            &redirect_url,
            config.create_data,
            Some(config.options),
        )
        .await
    }

    /// Refreshes the current authenticated record instance and
    /// returns a new token and record data.
    pub async fn auth_refresh(
        &self,
        options: Option<RecordOptions>,
    ) -> Result<RecordAuthResponse, ClientResponseError> {
        let options = with_method(options.unwrap_or_default().into(), "POST");
        self.send_auth("/auth-refresh", options).await
    }

    /// Sends auth record password reset request.
    pub async fn request_password_reset(
        &self,
        email: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        self.send_action("/request-password-reset", json!({ "email": email }), options)
            .await
    }

    /// Confirms auth record password reset request.
    pub async fn confirm_password_reset(
        &self,
        password_reset_token: &str,
        password: &str,
        password_confirm: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let body = json!({
            "token": password_reset_token,
            "password": password,
            "passwordConfirm": password_confirm,
        });
        self.send_action("/confirm-password-reset", body, options)
            .await
    }

    /// Sends auth record verification email request.
    pub async fn request_verification(
        &self,
        email: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        self.send_action("/request-verification", json!({ "email": email }), options)
            .await
    }

    /// Confirms auth record email verification request.
    pub async fn confirm_verification(
        &self,
        verification_token: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        self.send_action("/confirm-verification", json!({ "token": verification_token }), options)
            .await
    }

    /// Sends an email change request to the authenticated record model.
    pub async fn request_email_change(
        &self,
        new_email: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        self.send_action("/request-email-change", json!({ "newEmail": new_email }), options)
            .await
    }

    /// Confirms auth record's new email address.
    pub async fn confirm_email_change(
        &self,
        email_change_token: &str,
        password: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let body = json!({
            "token": email_change_token,
            "password": password,
        });
        self.send_action("/confirm-email-change", body, options)
            .await
    }

    /// Lists all linked external auth providers for the specified auth record.
    pub async fn list_external_auths(
        &self,
        record_id: &str,
        options: Option<SendOptions>,
    ) -> Result<Vec<ExternalAuthModel>, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "GET");
        let path = format!("{}/external-auths", self.item_path(record_id));
        self.client().send(&path, options).await
    }

    /// Unlinks a single external auth provider from the specified auth record.
    pub async fn unlink_external_auth(
        &self,
        record_id: &str,
        provider: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "DELETE");
        let path = format!(
            "{}/external-auths/{}",
            self.item_path(record_id),
            encode_uri_component(provider)
        );
        self.client().send::<Value>(&path, options).await?;
        Ok(true)
    }
}

/// Replaces (or appends) query params of `url`, keeping the order of the
/// existing ones. `+` in existing params is read as a space.
fn replace_query_params(url: &str, replacements: &[(String, String)]) -> String {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));

    let mut params: Vec<(String, String)> = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let mut parts = pair.split('=');
        let key = decode_uri_component(&parts.next().unwrap_or_default().replace('+', " "));
        let value = decode_uri_component(&parts.next().unwrap_or_default().replace('+', " "));

        match params.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => params.push((key, value)),
        }
    }

    for (key, value) in replacements {
        match params.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value.clone(),
            None => params.push((key.clone(), value.clone())),
        }
    }

    if params.is_empty() {
        return path.to_string();
    }

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_uri_component(k), encode_uri_component(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", path, query)
}

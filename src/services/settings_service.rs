//! Settings Service

use crate::client_response_error::ClientResponseError;
use crate::services::crud_service::{with_body, with_method};
use crate::tools::dtos::AppleClientSecret;
use crate::tools::options::{RequestBody, SendOptions};
use crate::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// App settings are schemaless on the client side.
pub type Settings = Map<String, Value>;

/// Service for settings API endpoints.
#[derive(Debug, Clone)]
pub struct SettingsService {
    client: Arc<Client>,
}

impl SettingsService {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Fetches all available app settings.
    pub async fn get_all(&self, options: Option<SendOptions>) -> Result<Settings, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "GET");
        self.client.send("/api/settings", options).await
    }

    /// Bulk updates app settings.
    pub async fn update(
        &self,
        body: impl Into<RequestBody>,
        options: Option<SendOptions>,
    ) -> Result<Settings, ClientResponseError> {
        let options = with_body(with_method(options.unwrap_or_default(), "PATCH"), body);
        self.client.send("/api/settings", options).await
    }

    /// Performs a S3 filesystem connection test.
    ///
    /// The currently supported `filesystem` values are "storage" (the default) and "backups".
    pub async fn test_s3(
        &self,
        filesystem: Option<&str>,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let body = json!({ "filesystem": filesystem.unwrap_or("storage") });
        let options = with_body(with_method(options.unwrap_or_default(), "POST"), body);

        self.client
            .send::<Value>("/api/settings/test/s3", options)
            .await?;
        Ok(true)
    }

    /// Sends a test email.
    ///
    /// The possible `email_template` values are: verification, password-reset, email-change.
    pub async fn test_email(
        &self,
        to_email: &str,
        email_template: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let body = json!({
            "email": to_email,
            "template": email_template,
        });
        let options = with_body(with_method(options.unwrap_or_default(), "POST"), body);

        self.client
            .send::<Value>("/api/settings/test/email", options)
            .await?;
        Ok(true)
    }

    /// Generates a new Apple OAuth2 client secret.
    pub async fn generate_apple_client_secret(
        &self,
        client_id: &str,
        team_id: &str,
        key_id: &str,
        private_key: &str,
        duration: u64,
        options: Option<SendOptions>,
    ) -> Result<AppleClientSecret, ClientResponseError> {
        let body = json!({
            "clientId": client_id,
            "teamId": team_id,
            "keyId": key_id,
            "privateKey": private_key,
            "duration": duration,
        });
        let options = with_body(with_method(options.unwrap_or_default(), "POST"), body);

        self.client
            .send("/api/settings/apple/generate-client-secret", options)
            .await
    }
}

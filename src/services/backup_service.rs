//! Backup Service

use crate::client_response_error::ClientResponseError;
use crate::services::crud_service::{with_body, with_method};
use crate::tools::dtos::BackupFileInfo;
use crate::tools::encoding::encode_uri_component;
use crate::tools::options::SendOptions;
use crate::Client;
use serde_json::{json, Value};
use std::sync::Arc;

/// Service for backup API endpoints.
#[derive(Debug, Clone)]
pub struct BackupService {
    client: Arc<Client>,
}

impl BackupService {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Returns list with all available backup files.
    pub async fn get_full_list(
        &self,
        options: Option<SendOptions>,
    ) -> Result<Vec<BackupFileInfo>, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "GET");
        self.client.send("/api/backups", options).await
    }

    /// Initializes a new backup.
    pub async fn create(
        &self,
        basename: &str,
        options: Option<SendOptions>,
    ) -> Result<bool, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "POST");
        let options = with_body(options, json!({ "name": basename }));

        self.client.send::<Value>("/api/backups", options).await?;
        Ok(true)
    }

    /// Deletes a single backup file.
    pub async fn delete(&self, key: &str, options: Option<SendOptions>) -> Result<bool, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "DELETE");
        let path = format!("/api/backups/{}", encode_uri_component(key));

        self.client.send::<Value>(&path, options).await?;
        Ok(true)
    }

    /// Initializes an app data restore from an existing backup.
    pub async fn restore(&self, key: &str, options: Option<SendOptions>) -> Result<bool, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "POST");
        let path = format!("/api/backups/{}/restore", encode_uri_component(key));

        self.client.send::<Value>(&path, options).await?;
        Ok(true)
    }

    /// Builds a download URL for a single existing backup using an
    /// admin file token (see `files().get_token()`) and the backup file key.
    pub fn get_download_url(&self, token: &str, key: &str) -> String {
        self.client.build_url(&format!(
            "/api/backups/{}?token={}",
            encode_uri_component(key),
            encode_uri_component(token)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{body_json, fake_client, FakeHttp};
    use crate::transport::TransportError;

    #[tokio::test]
    async fn test_backup_actions() {
        let (client, http, _sse) = fake_client();
        let backups = client.backups();

        assert!(backups.create("nightly.zip", None).await.unwrap());
        assert!(backups.restore("nightly.zip", None).await.unwrap());
        assert!(backups.delete("nightly.zip", None).await.unwrap());

        let requests = http.requests();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(body_json(&requests[0]), json!({"name": "nightly.zip"}));
        assert!(requests[1].url.ends_with("/api/backups/nightly.zip/restore"));
        assert_eq!(requests[2].method, "DELETE");
        assert!(requests[2].url.ends_with("/api/backups/nightly.zip"));
    }

    #[tokio::test]
    async fn test_get_full_list() {
        let http = Arc::new(FakeHttp::with_handler(|request| async move {
            let body = r#"[{"key":"a.zip","size":10,"modified":"2026-01-01 00:00:00.000Z"}]"#;
            Ok::<_, TransportError>(FakeHttp::json(&request, 200, body))
        }));
        let client = Client::builder("http://127.0.0.1:8090")
            .http_transport(http)
            .build();

        let list = client.backups().get_full_list(None).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].key, "a.zip");
    }

    #[test]
    fn test_get_download_url() {
        let client = Client::new("http://127.0.0.1:8090");
        assert_eq!(
            client.backups().get_download_url("t&k", "a b.zip"),
            "http://127.0.0.1:8090/api/backups/a%20b.zip?token=t%26k"
        );
    }
}

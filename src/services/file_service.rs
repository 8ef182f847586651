//! File Service

use crate::client_response_error::ClientResponseError;
use crate::services::crud_service::with_method;
use crate::tools::dtos::RecordModel;
use crate::tools::encoding::encode_uri_component;
use crate::tools::options::{serialize_query_params, FileOptions, SendOptions};
use crate::Client;
use serde_json::Value;
use std::sync::Arc;

/// Service for file API endpoints.
#[derive(Debug, Clone)]
pub struct FileService {
    client: Arc<Client>,
}

impl FileService {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Builds and returns an absolute record file URL for the provided filename.
    ///
    /// Returns an empty string if either the filename or the record id is missing.
    pub fn get_url(&self, record: &RecordModel, filename: &str, options: Option<FileOptions>) -> String {
        if filename.is_empty() || record.id.is_empty() {
            return String::new();
        }

        let collection = if record.collection_id.is_empty() {
            &record.collection_name
        } else {
            &record.collection_id
        };

        let path = format!(
            "api/files/{}/{}/{}",
            encode_uri_component(collection),
            encode_uri_component(&record.id),
            encode_uri_component(filename)
        );

        let mut result = self.client.build_url(&path);

        let query = serialize_query_params(&options.unwrap_or_default().into_query());
        if !query.is_empty() {
            result.push(if result.contains('?') { '&' } else { '?' });
            result.push_str(&query);
        }

        result
    }

    /// Requests a new private file access token for the current auth model
    /// (admin or record).
    pub async fn get_token(&self, options: Option<SendOptions>) -> Result<String, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "POST");
        let response: Value = self.client.send("/api/files/token", options).await?;

        Ok(response
            .get("token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

//! Log Service

use crate::client_response_error::ClientResponseError;
use crate::services::crud_service::with_method;
use crate::tools::dtos::{HourlyStats, ListResult, LogRequestModel};
use crate::tools::encoding::encode_uri_component;
use crate::tools::options::{ListOptions, LogStatsOptions, SendOptions};
use crate::Client;
use serde_json::json;
use std::sync::Arc;

/// Service for the request logs API endpoints.
#[derive(Debug, Clone)]
pub struct LogService {
    client: Arc<Client>,
}

impl LogService {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Returns paginated logged requests list.
    pub async fn get_requests_list(
        &self,
        page: u32,
        per_page: u32,
        options: Option<ListOptions>,
    ) -> Result<ListResult<LogRequestModel>, ClientResponseError> {
        let mut options = with_method(options.unwrap_or_default().into(), "GET");
        options.query.entry("page".to_string()).or_insert(json!(page));
        options
            .query
            .entry("perPage".to_string())
            .or_insert(json!(per_page));

        self.client.send("/api/logs/requests", options).await
    }

    /// Returns a single logged request by its id.
    pub async fn get_request(
        &self,
        id: &str,
        options: Option<SendOptions>,
    ) -> Result<LogRequestModel, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "GET");
        let path = format!("/api/logs/requests/{}", encode_uri_component(id));
        self.client.send(&path, options).await
    }

    /// Returns request logs statistics grouped by hour.
    pub async fn get_requests_stats(
        &self,
        options: Option<LogStatsOptions>,
    ) -> Result<Vec<HourlyStats>, ClientResponseError> {
        let options = with_method(options.unwrap_or_default().into(), "GET");
        self.client.send("/api/logs/requests/stats", options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeHttp;
    use crate::transport::TransportError;

    #[tokio::test]
    async fn test_log_endpoints() {
        let http = Arc::new(FakeHttp::with_handler(|request| async move {
            let body = if request.url.contains("/stats") {
                r#"[{"total":4,"date":"2026-01-01 10:00:00.000Z"}]"#
            } else if request.url.contains("/requests?") {
                r#"{"page":2,"perPage":5,"totalItems":6,"totalPages":2,"items":[{"id":"l1","status":404}]}"#
            } else {
                r#"{"id":"l1","method":"GET","status":200}"#
            };
            Ok::<_, TransportError>(FakeHttp::json(&request, 200, body))
        }));
        let client = Client::builder("http://127.0.0.1:8090")
            .http_transport(http.clone())
            .build();
        let logs = client.logs();

        let list = logs.get_requests_list(2, 5, None).await.unwrap();
        assert_eq!(list.items[0].status, 404);
        assert_eq!(
            http.last_request().unwrap().url,
            "http://127.0.0.1:8090/api/logs/requests?page=2&perPage=5"
        );

        let log = logs.get_request("l 1", None).await.unwrap();
        assert_eq!(log.method, "GET");
        assert!(http.last_request().unwrap().url.ends_with("/api/logs/requests/l%201"));

        let stats = logs
            .get_requests_stats(Some(LogStatsOptions::new().filter("status>=400")))
            .await
            .unwrap();
        assert_eq!(stats[0].total, 4);
        assert!(http
            .last_request()
            .unwrap()
            .url
            .ends_with("/api/logs/requests/stats?filter=status%3E%3D400"));
    }
}

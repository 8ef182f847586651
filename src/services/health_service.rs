//! Health Service

use crate::client_response_error::ClientResponseError;
use crate::services::crud_service::with_method;
use crate::tools::dtos::HealthCheckResponse;
use crate::tools::options::SendOptions;
use crate::Client;
use std::sync::Arc;

/// Service for health check API endpoints.
#[derive(Debug, Clone)]
pub struct HealthService {
    client: Arc<Client>,
}

impl HealthService {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Checks the health status of the API.
    pub async fn check(&self, options: Option<SendOptions>) -> Result<HealthCheckResponse, ClientResponseError> {
        let options = with_method(options.unwrap_or_default(), "GET");
        self.client.send("/api/health", options).await
    }
}

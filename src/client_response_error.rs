//! Client Response Error type

use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

const ABORT_MESSAGE: &str = "The request was autocancelled.";
const REFUSED_MESSAGE: &str = "Failed to connect to the CoddySpace server. Try changing the SDK URL from localhost to 127.0.0.1.";
const GENERIC_MESSAGE: &str = "Something went wrong while processing your request.";

/// ClientResponseError is a custom Error type that wraps and normalizes
/// any error returned by `Client::send()` and the services built on it.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("ClientResponseError {status}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct ClientResponseError {
    /// The URL of the request that failed.
    #[serde(default)]
    pub url: String,

    /// HTTP status code (0 if the request never got a response).
    #[serde(default)]
    pub status: u16,

    /// The decoded response body.
    #[serde(default)]
    pub response: HashMap<String, Value>,

    /// Whether the request was aborted.
    #[serde(default)]
    pub is_abort: bool,

    /// Human readable message.
    #[serde(default)]
    pub message: String,

    /// The underlying cause, if any.
    #[serde(skip)]
    pub original_error: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Default for ClientResponseError {
    fn default() -> Self {
        Self {
            url: String::new(),
            status: 0,
            response: HashMap::new(),
            is_abort: false,
            message: GENERIC_MESSAGE.to_string(),
            original_error: None,
        }
    }
}

impl ClientResponseError {
    /// Creates an error from a server response.
    ///
    /// Non-object bodies are discarded.
    pub fn new(url: &str, status: u16, response: Value) -> Self {
        let response = match response {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };

        let mut err = Self {
            url: url.to_string(),
            status,
            response,
            ..Default::default()
        };
        err.message = err.default_message();
        err
    }

    /// Creates an error for a locally cancelled request.
    pub fn abort(url: &str) -> Self {
        Self {
            url: url.to_string(),
            is_abort: true,
            message: ABORT_MESSAGE.to_string(),
            ..Default::default()
        }
    }

    /// Wraps a transport failure.
    pub fn from_transport(url: &str, err: TransportError) -> Self {
        let mut result = Self {
            url: url.to_string(),
            ..Default::default()
        };

        if err.is_connection_refused() && is_localhost(url) {
            result.message = REFUSED_MESSAGE.to_string();
        }

        result.original_error = Some(Arc::new(err));
        result
    }

    /// Creates a 404 not found error.
    pub fn not_found(url: &str, message: &str) -> Self {
        Self::new(
            url,
            404,
            serde_json::json!({
                "code": 404,
                "message": message,
                "data": {},
            }),
        )
    }

    /// Creates an error for a failure that happened before any request was sent.
    pub fn local(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new("", 0, serde_json::json!({ "message": message }))
    }

    /// Gets the response data (alias for response for backward compatibility).
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.response
    }

    /// Converts the error to a JSON-serializable format.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "url": self.url,
            "status": self.status,
            "response": self.response,
            "isAbort": self.is_abort,
            "message": self.message
        })
    }

    fn default_message(&self) -> String {
        if let Some(message) = self.response.get("message").and_then(Value::as_str) {
            if !message.is_empty() {
                return message.to_string();
            }
        }

        if self.is_abort {
            ABORT_MESSAGE.to_string()
        } else {
            GENERIC_MESSAGE.to_string()
        }
    }
}

fn is_localhost(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case("localhost")))
        .unwrap_or(false)
}

impl From<serde_json::Error> for ClientResponseError {
    fn from(err: serde_json::Error) -> Self {
        Self {
            message: format!("JSON error: {}", err),
            original_error: Some(Arc::new(err)),
            ..Default::default()
        }
    }
}

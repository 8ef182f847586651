//! HTTP and server-sent events transports.
//!
//! The client talks to the server only through the [`HttpTransport`] and
//! [`EventSourceConnector`] traits. The defaults are backed by reqwest, tests
//! and embedders can swap in their own implementations.

use crate::tools::formdata::{to_multipart, FormValue};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

/// Broad classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The server refused the connection.
    ConnectionRefused,
    /// The request or connection timed out.
    Timeout,
    /// The server answered with an unexpected status.
    Status(u16),
    Other,
}

/// Error produced by a transport before a response could be read.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    pub fn is_connection_refused(&self) -> bool {
        self.kind == TransportErrorKind::ConnectionRefused
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if is_refused(&err) {
            TransportErrorKind::ConnectionRefused
        } else if let Some(status) = err.status() {
            TransportErrorKind::Status(status.as_u16())
        } else {
            TransportErrorKind::Other
        };

        Self {
            kind,
            message: err.to_string(),
            cause: Some(Arc::new(err)),
        }
    }
}

fn is_refused(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

/// Request body as handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportBody {
    Text(String),
    Multipart(Vec<(String, FormValue)>),
}

/// A fully prepared outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<TransportBody>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received response with its raw body.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub url: String,
    pub body: String,
}

/// Fetch-like request/response exchange.
///
/// Dropping the returned future must abort the request.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Default reqwest backed transport.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an already configured reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        if let (Ok(name), Ok(val)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.insert(name, val);
        }
    }
    map
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TransportError::other(format!("invalid method {}", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(header_map(&request.headers));

        builder = match request.body {
            Some(TransportBody::Text(text)) => builder.body(text),
            Some(TransportBody::Multipart(fields)) => builder.multipart(to_multipart(fields)?),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.text().await?;

        Ok(HttpResponse { status, url, body })
    }
}

/// A single server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: String,
}

pub type SseStream = BoxStream<'static, Result<SseEvent, TransportError>>;

/// Opens server-sent events streams.
#[async_trait]
pub trait EventSourceConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<SseStream, TransportError>;
}

/// Default reqwest + eventsource-stream backed connector.
#[derive(Debug, Clone, Default)]
pub struct ReqwestEventSource {
    client: reqwest::Client,
}

impl ReqwestEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSourceConnector for ReqwestEventSource {
    async fn connect(&self, url: &str) -> Result<SseStream, TransportError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(
                TransportErrorKind::Status(status.as_u16()),
                format!("unexpected event stream status {}", status),
            ));
        }

        let stream = response
            .bytes_stream()
            .eventsource()
            .map(|item| match item {
                Ok(event) => Ok(SseEvent {
                    event: event.event,
                    data: event.data,
                    id: event.id,
                }),
                Err(err) => Err(TransportError::other(err.to_string())),
            })
            .boxed();

        Ok(stream)
    }
}

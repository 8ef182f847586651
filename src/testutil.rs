//! In-memory transports for unit tests.

use crate::client::Client;
use crate::transport::{
    EventSourceConnector, HttpRequest, HttpResponse, HttpTransport, SseEvent, SseStream,
    TransportBody, TransportError, TransportErrorKind,
};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::{stream, FutureExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

type Handler =
    Box<dyn Fn(HttpRequest) -> BoxFuture<'static, Result<HttpResponse, TransportError>> + Send + Sync>;

/// Records every request and answers through a configurable handler.
///
/// Defaults to `200 {}` for everything.
pub struct FakeHttp {
    requests: Mutex<Vec<HttpRequest>>,
    handler: Handler,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::with_handler(|request| async move {
            Ok::<_, TransportError>(FakeHttp::json(&request, 200, "{}"))
        })
    }

    pub fn with_handler<F, Fut>(handler: F) -> Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, TransportError>> + Send + 'static,
    {
        Self {
            requests: Mutex::new(Vec::new()),
            handler: Box::new(move |request| handler(request).boxed()),
        }
    }

    /// Builds a response for `request` with a raw body.
    pub fn json(request: &HttpRequest, status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            url: request.url.clone(),
            body: body.to_string(),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().last().cloned()
    }

    /// Requests sent to urls ending with `suffix`.
    pub fn requests_to(&self, suffix: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.ends_with(suffix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpTransport for FakeHttp {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        (self.handler)(request).await
    }
}

enum FakeConnection {
    Stream(mpsc::UnboundedReceiver<Result<SseEvent, TransportError>>),
    Refuse,
    Hang,
}

/// Hands out scripted event streams, one per connect call.
///
/// Once the script runs out every further connect hangs forever.
#[derive(Default)]
pub struct FakeEventSource {
    queue: Mutex<VecDeque<FakeConnection>>,
    connects: AtomicUsize,
}

pub type EventSender = mpsc::UnboundedSender<Result<SseEvent, TransportError>>;

impl FakeEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a connection whose events are fed through the returned sender.
    /// Dropping the sender ends the stream.
    pub fn push_stream(&self) -> EventSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queue.lock().push_back(FakeConnection::Stream(rx));
        tx
    }

    /// Queues a connection that is refused right away.
    pub fn push_refuse(&self) {
        self.queue.lock().push_back(FakeConnection::Refuse);
    }

    /// Queues a connection that never yields anything.
    pub fn push_hang(&self) {
        self.queue.lock().push_back(FakeConnection::Hang);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSourceConnector for FakeEventSource {
    async fn connect(&self, _url: &str) -> Result<SseStream, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let next = self.queue.lock().pop_front();
        match next {
            Some(FakeConnection::Stream(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            Some(FakeConnection::Refuse) => Err(TransportError::new(
                TransportErrorKind::ConnectionRefused,
                "connection refused",
            )),
            Some(FakeConnection::Hang) | None => Ok(stream::pending().boxed()),
        }
    }
}

/// The connect acknowledgment event carrying the session id.
pub fn connect_event(client_id: &str) -> Result<SseEvent, TransportError> {
    Ok(SseEvent {
        event: "PB_CONNECT".to_string(),
        data: format!(r#"{{"clientId":"{}"}}"#, client_id),
        id: client_id.to_string(),
    })
}

pub fn topic_event(topic: &str, data: &str) -> Result<SseEvent, TransportError> {
    Ok(SseEvent {
        event: topic.to_string(),
        data: data.to_string(),
        id: String::new(),
    })
}

/// Decodes a JSON text body (`Null` for anything else).
pub fn body_json(request: &HttpRequest) -> Value {
    match &request.body {
        Some(TransportBody::Text(text)) => serde_json::from_str(text).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// A client wired to fresh fakes.
pub fn fake_client() -> (Arc<Client>, Arc<FakeHttp>, Arc<FakeEventSource>) {
    let http = Arc::new(FakeHttp::new());
    let sse = Arc::new(FakeEventSource::new());
    let client = Client::builder("http://127.0.0.1:8090")
        .http_transport(http.clone())
        .event_source(sse.clone())
        .build();
    (client, http, sse)
}

/// Lets spawned tasks run until they are all parked.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

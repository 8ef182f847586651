//! Realtime Service
//!
//! Multiplexes topic subscriptions over a single server-sent events
//! connection.
//!
//! The first subscription opens the connection. The server acknowledges it
//! with a `PB_CONNECT` event carrying the session id, after which the full
//! topic list is submitted with `POST /api/realtime`. Lost connections are
//! re-established in the background with increasing delays, and the last
//! unsubscribe closes the connection.
//!
//! Every background task is tagged with the connection epoch it was started
//! for. Disconnecting bumps the epoch, so late events from a closed
//! connection are dropped instead of touching the current one.

use crate::client::Client;
use crate::client_response_error::ClientResponseError;
use crate::config::RealtimeConfig;
use crate::tools::options::SendOptions;
use crate::transport::{EventSourceConnector, SseEvent};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CONNECT_EVENT: &str = "PB_CONNECT";

/// Extra submissions after connect when topics changed mid-flight.
const RESUBMIT_RETRIES: u32 = 3;

/// Realtime message received from the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    /// The action that occurred (e.g., "create", "update", "delete").
    #[serde(default)]
    pub action: String,

    /// The record data.
    #[serde(default)]
    pub record: Value,

    /// Any other payload field (e.g. the OAuth2 redirect data).
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

pub type ListenerFunc = Arc<dyn Fn(RealtimeMessage) + Send + Sync>;

#[derive(Clone)]
struct Listener {
    id: u64,
    callback: ListenerFunc,
}

type PendingConnect = oneshot::Sender<Result<(), ClientResponseError>>;

#[derive(Default)]
struct RealtimeState {
    client_id: String,
    connection: Option<CancellationToken>,
    subscriptions: BTreeMap<String, Vec<Listener>>,
    /// Listeners currently receiving events from the open connection.
    attached: HashMap<String, Vec<Listener>>,
    last_sent_topics: Vec<String>,
    reconnect_attempts: u32,
    pending_connects: Vec<PendingConnect>,
    connect_timer: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    next_listener_id: u64,
    epoch: u64,
}

impl RealtimeState {
    fn is_connected(&self) -> bool {
        self.connection.is_some() && !self.client_id.is_empty() && self.pending_connects.is_empty()
    }

    fn has_listeners(&self, topic: Option<&str>) -> bool {
        match topic {
            Some(topic) => self.subscriptions.get(topic).is_some_and(|l| !l.is_empty()),
            None => self.subscriptions.values().any(|l| !l.is_empty()),
        }
    }

    fn topics(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter(|(_, listeners)| !listeners.is_empty())
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    fn has_unsent_subscriptions(&self) -> bool {
        let latest = self.topics();
        latest.len() != self.last_sent_topics.len()
            || latest.iter().any(|t| !self.last_sent_topics.contains(t))
    }

    fn attach_all(&mut self) {
        if self.connection.is_none() {
            return;
        }
        self.attached = self
            .subscriptions
            .iter()
            .map(|(topic, listeners)| (topic.clone(), listeners.clone()))
            .collect();
    }

    fn abort_timers(&mut self) {
        if let Some(timer) = self.connect_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn submission_key(&self) -> Option<String> {
        (!self.client_id.is_empty()).then(|| format!("realtime_{}", self.client_id))
    }

    /// Removes a single listener. Returns false if it was not registered.
    fn detach_listener(&mut self, topic: &str, listener_id: u64) -> bool {
        let Some(listeners) = self.subscriptions.get_mut(topic) else {
            return false;
        };

        let before = listeners.len();
        listeners.retain(|l| l.id != listener_id);
        if listeners.len() == before {
            return false;
        }
        if listeners.is_empty() {
            self.subscriptions.remove(topic);
        }

        if let Some(attached) = self.attached.get_mut(topic) {
            attached.retain(|l| l.id != listener_id);
        }

        true
    }
}

/// What is left to do once the state lock is released.
enum Followup {
    Nothing,
    Submit,
    /// Cancel the in-flight submission of a closed session.
    CancelSubmission(Option<String>),
}

struct Inner {
    client: Weak<Client>,
    connector: Arc<dyn EventSourceConnector>,
    url: String,
    config: RealtimeConfig,
    state: Mutex<RealtimeState>,
    /// Bumped whenever the connection is torn down for good.
    closed: watch::Sender<u64>,
}

/// Realtime service for subscribing to server-sent events.
#[derive(Clone)]
pub struct RealtimeService {
    inner: Arc<Inner>,
}

/// Handle of a single registered listener.
///
/// Dropping the handle does not unsubscribe.
pub struct Subscription {
    service: RealtimeService,
    topic: String,
    listener_id: u64,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn listener_id(&self) -> u64 {
        self.listener_id
    }

    /// Removes this exact listener, leaving other listeners of the topic intact.
    pub async fn unsubscribe(self) -> Result<(), ClientResponseError> {
        self.service
            .unsubscribe_by_topic_and_listener(&self.topic, self.listener_id)
            .await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("listener_id", &self.listener_id)
            .finish()
    }
}

impl RealtimeService {
    pub(crate) fn new(
        client: Weak<Client>,
        connector: Arc<dyn EventSourceConnector>,
        url: String,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                connector,
                url,
                config,
                state: Mutex::new(RealtimeState::default()),
                closed: watch::channel(0).0,
            }),
        }
    }

    /// Returns whether the realtime connection has been established.
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().is_connected()
    }

    /// Returns the session id assigned by the server (empty if not connected).
    pub fn client_id(&self) -> String {
        self.inner.state.lock().client_id.clone()
    }

    /// Watches final disconnects: the value changes every time the
    /// connection is closed without a pending reconnect.
    pub(crate) fn closed(&self) -> watch::Receiver<u64> {
        self.inner.closed.subscribe()
    }

    /// Registers a subscription listener.
    ///
    /// You can subscribe multiple times to the same topic. If the connection
    /// is not started yet, this method also initializes it and waits for it.
    pub async fn subscribe<F>(&self, topic: &str, callback: F) -> Result<Subscription, ClientResponseError>
    where
        F: Fn(RealtimeMessage) + Send + Sync + 'static,
    {
        if topic.is_empty() {
            return Err(ClientResponseError::local("topic must be set."));
        }

        let (listener_id, connected, is_first) = {
            let mut state = self.inner.state.lock();
            state.next_listener_id += 1;
            let listener = Listener {
                id: state.next_listener_id,
                callback: Arc::new(callback),
            };

            let listeners = state.subscriptions.entry(topic.to_string()).or_default();
            listeners.push(listener.clone());
            let is_first = listeners.len() == 1;

            let connected = state.is_connected();
            if connected && !is_first {
                // the server already streams this topic
                state.attached.entry(topic.to_string()).or_default().push(listener.clone());
            }

            (listener.id, connected, is_first)
        };

        let result = if !connected {
            self.inner.connect().await
        } else if is_first {
            self.inner.submit_subscriptions().await
        } else {
            Ok(())
        };

        if let Err(err) = result {
            self.inner.state.lock().detach_listener(topic, listener_id);
            return Err(err);
        }

        Ok(Subscription {
            service: self.clone(),
            topic: topic.to_string(),
            listener_id,
        })
    }

    /// Unsubscribes from all listeners of `topic`, or from everything if
    /// `topic` is `None`.
    ///
    /// The connection is closed once no subscriptions are left.
    pub async fn unsubscribe(&self, topic: Option<&str>) -> Result<(), ClientResponseError> {
        let topic = topic.filter(|t| !t.is_empty());

        let followup = {
            let mut state = self.inner.state.lock();
            if !state.has_listeners(topic) {
                return Ok(());
            }

            match topic {
                Some(topic) => {
                    state.subscriptions.remove(topic);
                    state.attached.remove(topic);
                }
                None => {
                    state.subscriptions.clear();
                    state.attached.clear();
                }
            }

            self.inner.after_removal(&mut state, topic)
        };

        self.inner.apply(followup).await
    }

    /// Unsubscribes from every topic starting with `prefix`.
    pub async fn unsubscribe_by_prefix(&self, prefix: &str) -> Result<(), ClientResponseError> {
        self.unsubscribe_matching(|topic| topic.starts_with(prefix)).await
    }

    /// Unsubscribes from every topic accepted by `matches`, with a single
    /// submission of the remaining topics.
    pub(crate) async fn unsubscribe_matching<P>(&self, matches: P) -> Result<(), ClientResponseError>
    where
        P: Fn(&str) -> bool,
    {
        let followup = {
            let mut state = self.inner.state.lock();
            let matching: Vec<String> = state
                .subscriptions
                .keys()
                .filter(|topic| matches(topic.as_str()))
                .cloned()
                .collect();

            if matching.is_empty() {
                return Ok(());
            }

            for topic in &matching {
                state.subscriptions.remove(topic);
                state.attached.remove(topic);
            }

            if state.has_listeners(None) {
                Followup::Submit
            } else {
                Followup::CancelSubmission(self.inner.disconnect_locked(&mut state, false))
            }
        };

        self.inner.apply(followup).await
    }

    /// Unsubscribes a single listener previously returned by [`Self::subscribe`].
    pub async fn unsubscribe_by_topic_and_listener(
        &self,
        topic: &str,
        listener_id: u64,
    ) -> Result<(), ClientResponseError> {
        let followup = {
            let mut state = self.inner.state.lock();
            if !state.detach_listener(topic, listener_id) {
                return Ok(());
            }
            self.inner.after_removal(&mut state, Some(topic))
        };

        self.inner.apply(followup).await
    }

    /// Checks whether `topic` (or any topic if `None`) has listeners.
    pub fn has_subscription_listeners(&self, topic: Option<&str>) -> bool {
        let topic = topic.filter(|t| !t.is_empty());
        self.inner.state.lock().has_listeners(topic)
    }

    /// Closes the connection. Callers still waiting for the connection to be
    /// established are resolved, not rejected.
    pub fn disconnect(&self) {
        let stale = {
            let mut state = self.inner.state.lock();
            self.inner.disconnect_locked(&mut state, false)
        };
        self.inner.cancel_submission(stale);
    }
}

impl Inner {
    fn after_removal(&self, state: &mut RealtimeState, topic: Option<&str>) -> Followup {
        if !state.has_listeners(None) {
            Followup::CancelSubmission(self.disconnect_locked(state, false))
        } else if !state.has_listeners(topic) {
            Followup::Submit
        } else {
            Followup::Nothing
        }
    }

    async fn apply(self: &Arc<Self>, followup: Followup) -> Result<(), ClientResponseError> {
        match followup {
            Followup::Nothing => Ok(()),
            Followup::Submit => self.submit_subscriptions().await,
            Followup::CancelSubmission(key) => {
                self.cancel_submission(key);
                Ok(())
            }
        }
    }

    /// Must be called without holding the state lock: releasing the last
    /// client handle runs its destructor, which disconnects this service.
    fn cancel_submission(&self, key: Option<String>) {
        if let (Some(key), Some(client)) = (key, self.client.upgrade()) {
            client.cancel_request(&key);
        }
    }

    async fn submit_subscriptions(self: &Arc<Self>) -> Result<(), ClientResponseError> {
        let (client_id, topics) = {
            let mut state = self.state.lock();
            if state.client_id.is_empty() {
                return Ok(());
            }

            // optimistic update
            state.attach_all();
            state.last_sent_topics = state.topics();
            (state.client_id.clone(), state.last_sent_topics.clone())
        };

        let Some(client) = self.client.upgrade() else {
            return Ok(());
        };

        let options = SendOptions::post()
            .with_body(json!({
                "clientId": client_id,
                "subscriptions": topics,
            }))
            .with_request_key(format!("realtime_{}", client_id));

        match client.send::<Value>("/api/realtime", options).await {
            Ok(_) => Ok(()),
            // superseded by a newer submission
            Err(err) if err.is_abort => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn connect(self: &Arc<Self>) -> Result<(), ClientResponseError> {
        let (rx, stale) = {
            let mut state = self.state.lock();

            // don't block the caller while reconnecting in the background
            if state.reconnect_attempts > 0 {
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            state.pending_connects.push(tx);

            // everyone else waits for the connect started by the first caller
            let stale = if state.pending_connects.len() == 1 {
                self.init_connect_locked(&mut state)
            } else {
                None
            };

            (rx, stale)
        };

        self.cancel_submission(stale);

        rx.await.unwrap_or(Ok(()))
    }

    fn init_connect_locked(self: &Arc<Self>, state: &mut RealtimeState) -> Option<String> {
        let stale = self.disconnect_locked(state, true);
        let epoch = state.epoch;

        let token = CancellationToken::new();
        state.connection = Some(token.clone());

        tracing::debug!(url = %self.url, epoch, "opening realtime connection");

        let inner = Arc::clone(self);
        let timeout = self.config.max_connect_timeout;
        state.connect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let stale = {
                let mut state = inner.state.lock();
                if state.epoch != epoch {
                    return;
                }
                state.connect_timer = None;
                let err = ClientResponseError::local("EventSource connect took too long.");
                inner.connect_error_locked(&mut state, err)
            };
            inner.cancel_submission(stale);
        }));

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run_connection(epoch, token).await });

        stale
    }

    async fn run_connection(self: Arc<Self>, epoch: u64, token: CancellationToken) {
        let connected = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = self.connector.connect(&self.url) => result,
        };

        let mut stream = match connected {
            Ok(stream) => stream,
            Err(err) => {
                let err = ClientResponseError::from_transport(&self.url, err);
                self.connect_error(epoch, err);
                return;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) if event.event == CONNECT_EVENT => {
                    let client_id = session_id(&event);
                    let inner = Arc::clone(&self);
                    tokio::spawn(async move { inner.on_connect(epoch, client_id).await });
                }
                Some(Ok(event)) => self.dispatch(epoch, &event),
                Some(Err(err)) => {
                    let err = ClientResponseError::from_transport(&self.url, err);
                    self.connect_error(epoch, err);
                    return;
                }
                None => {
                    let err = ClientResponseError::local("Failed to establish realtime connection.");
                    self.connect_error(epoch, err);
                    return;
                }
            }
        }
    }

    async fn on_connect(self: Arc<Self>, epoch: u64, client_id: String) {
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            tracing::debug!(client_id = %client_id, "realtime session established");
            state.client_id = client_id;
        }

        let mut result = self.submit_subscriptions().await;

        // a subscribe/unsubscribe may have raced the submission above
        let mut retries = RESUBMIT_RETRIES;
        while result.is_ok() && retries > 0 && self.has_unsent_subscriptions() {
            retries -= 1;
            result = self.submit_subscriptions().await;
        }

        let stale = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }

            match result {
                Ok(()) => {
                    for pending in state.pending_connects.drain(..) {
                        let _ = pending.send(Ok(()));
                    }
                    state.reconnect_attempts = 0;
                    state.abort_timers();
                    None
                }
                Err(err) => {
                    state.client_id.clear();
                    self.connect_error_locked(&mut state, err)
                }
            }
        };

        self.cancel_submission(stale);
    }

    fn has_unsent_subscriptions(&self) -> bool {
        self.state.lock().has_unsent_subscriptions()
    }

    fn dispatch(&self, epoch: u64, event: &SseEvent) {
        let callbacks: Vec<ListenerFunc> = {
            let state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            state
                .attached
                .get(&event.event)
                .map(|listeners| listeners.iter().map(|l| Arc::clone(&l.callback)).collect())
                .unwrap_or_default()
        };

        if callbacks.is_empty() {
            return;
        }

        let message = serde_json::from_str::<RealtimeMessage>(&event.data).unwrap_or_else(|err| {
            tracing::warn!(topic = %event.event, error = %err, "unparseable realtime payload");
            RealtimeMessage::default()
        });

        for callback in callbacks {
            callback(message.clone());
        }
    }

    fn connect_error(self: &Arc<Self>, epoch: u64, err: ClientResponseError) {
        let stale = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            self.connect_error_locked(&mut state, err)
        };
        self.cancel_submission(stale);
    }

    fn connect_error_locked(
        self: &Arc<Self>,
        state: &mut RealtimeState,
        err: ClientResponseError,
    ) -> Option<String> {
        state.abort_timers();

        let never_connected = state.client_id.is_empty() && state.reconnect_attempts == 0;
        if never_connected || state.reconnect_attempts > self.config.max_reconnect_attempts {
            tracing::debug!(error = %err, "realtime connection failed");
            for pending in state.pending_connects.drain(..) {
                let _ = pending.send(Err(err.clone()));
            }
            return self.disconnect_locked(state, false);
        }

        // otherwise reconnect in the background
        let stale = self.disconnect_locked(state, true);
        let delay = self.config.reconnect_delay(state.reconnect_attempts);
        state.reconnect_attempts = state.reconnect_attempts.saturating_add(1);
        let epoch = state.epoch;

        tracing::debug!(
            attempt = state.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "scheduling realtime reconnect"
        );

        let inner = Arc::clone(self);
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let stale = {
                let mut state = inner.state.lock();
                if state.epoch != epoch {
                    return;
                }
                state.reconnect_timer = None;
                inner.init_connect_locked(&mut state)
            };
            inner.cancel_submission(stale);
        }));

        stale
    }

    /// Closes the connection and returns the submission key of the closed
    /// session, to be cancelled once the lock is released.
    fn disconnect_locked(&self, state: &mut RealtimeState, from_reconnect: bool) -> Option<String> {
        state.epoch += 1;
        state.abort_timers();
        state.attached.clear();

        if let Some(connection) = state.connection.take() {
            tracing::debug!(client_id = %state.client_id, from_reconnect, "closing realtime connection");
            connection.cancel();
        }

        let stale = state.submission_key();
        state.client_id.clear();

        if !from_reconnect {
            state.reconnect_attempts = 0;

            // resolve, don't reject: the connect was abandoned, not failed
            for pending in state.pending_connects.drain(..) {
                let _ = pending.send(Ok(()));
            }

            self.closed.send_modify(|n| *n = n.wrapping_add(1));
        }

        stale
    }
}

/// The connect event id is the session id. Older servers only send it in
/// the payload.
fn session_id(event: &SseEvent) -> String {
    if !event.id.is_empty() {
        return event.id.clone();
    }

    serde_json::from_str::<Value>(&event.data)
        .ok()
        .and_then(|data| data.get("clientId").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default()
}

//! Gateway client: request/response and events over a reconnecting stream.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use claw_core::{ConnectionState, StreamTarget, TokenIssuer};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    client::{StreamClient, StreamConfig, StreamMessage, StreamSender, StreamStatus},
    connection::{Connector, TransportError},
    endpoint::EndpointTemplate,
    protocol::{
        ChatMessage, ChatRole, FileContent, FileEntry, GatewayErrorBody, GatewayEvent,
        GatewayFrame, Payload, methods,
    },
};

/// How long a request waits for its response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway not connected")]
    NotConnected,
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
    #[error("Gateway disconnected before responding")]
    Disconnected,
    #[error("Gateway request timed out")]
    Timeout,
    #[error("Gateway error{}: {message}", code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Remote {
        code: Option<String>,
        message: String,
    },
    #[error("Invalid gateway payload: {0}")]
    Decode(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<GatewayErrorBody> for GatewayError {
    fn from(body: GatewayErrorBody) -> Self {
        Self::Remote {
            code: body.code,
            message: body.message,
        }
    }
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, GatewayError>>>>>;

/// Acknowledgement of `chat.send`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ChatAck {
    pub run_id: String,
}

/// Agent control client: chat, files and config over the gateway bus.
///
/// Owns the connection lifecycle. Requests go through a cloneable
/// [`GatewayHandle`] so other tasks can call the gateway.
pub struct GatewayClient {
    stream: StreamClient,
    handle: GatewayHandle,
    events: broadcast::Sender<GatewayEvent>,
    router: JoinHandle<()>,
}

impl GatewayClient {
    #[must_use]
    pub fn new(
        endpoint: EndpointTemplate,
        issuer: Arc<dyn TokenIssuer>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::with_config(StreamConfig::gateway(endpoint), issuer, connector)
    }

    /// Build with a custom stream config (e.g. a different retry policy).
    #[must_use]
    pub fn with_config(
        config: StreamConfig,
        issuer: Arc<dyn TokenIssuer>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<StreamMessage>();
        let stream = StreamClient::new(config, issuer, connector, tx);
        let pending: Pending = Arc::default();
        let (events, _) = broadcast::channel(256);
        let router = tokio::spawn(route(
            rx,
            stream.subscribe_status(),
            Arc::clone(&pending),
            events.clone(),
        ));
        let handle = GatewayHandle {
            sender: stream.sender(),
            pending,
            request_timeout: REQUEST_TIMEOUT,
        };
        Self {
            stream,
            handle,
            events,
            router,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.handle.request_timeout = timeout;
        self
    }

    /// Request half, usable from any task.
    #[must_use]
    pub fn handle(&self) -> GatewayHandle {
        self.handle.clone()
    }

    pub fn activate(&mut self, target: impl Into<StreamTarget>) {
        self.stream.activate(target);
    }

    pub fn deactivate(&mut self) {
        self.stream.deactivate();
    }

    pub fn set_connectable(&mut self, connectable: bool) {
        self.stream.set_connectable(connectable);
    }

    pub fn reconnect(&self) {
        self.stream.reconnect();
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.stream.status()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<StreamStatus> {
        self.stream.subscribe_status()
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.router.abort();
        fail_all(&self.handle.pending, &GatewayError::Disconnected);
    }
}

/// Cloneable request side of a [`GatewayClient`].
#[derive(Clone)]
pub struct GatewayHandle {
    sender: StreamSender,
    pending: Pending,
    request_timeout: Duration,
}

impl GatewayHandle {
    /// Send a request and wait for its response payload.
    ///
    /// # Errors
    /// Fails if the gateway is not connected, drops the connection, times
    /// out, or answers with an error.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let status = self.sender.status();
        if status.gave_up {
            return Err(GatewayError::Unavailable(
                status.last_error.unwrap_or_else(|| "retries exhausted".to_owned()),
            ));
        }
        if status.state != ConnectionState::Connected {
            return Err(GatewayError::NotConnected);
        }

        let id = Uuid::new_v4().to_string();
        let frame = GatewayFrame::request(id.clone(), method, params)
            .to_frame()
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending_map().insert(id.clone(), tx);
        if let Err(e) = self.sender.send(frame) {
            self.pending_map().remove(&id);
            return Err(e.into());
        }

        tracing::debug!(method, request_id = %id, "Gateway request sent");
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::Disconnected),
            Err(_) => {
                self.pending_map().remove(&id);
                Err(GatewayError::Timeout)
            }
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, GatewayError> {
        let payload = self.request(method, params).await?;
        serde_json::from_value(payload).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// Start an assistant run for `message`.
    ///
    /// # Errors
    /// See [`GatewayHandle::request`].
    pub async fn send_chat(&self, session_key: &str, message: &str) -> Result<ChatAck, GatewayError> {
        self.call(
            methods::CHAT_SEND,
            json!({ "session_key": session_key, "message": message }),
        )
        .await
    }

    /// # Errors
    /// See [`GatewayHandle::request`].
    pub async fn abort_chat(&self, run_id: &str) -> Result<(), GatewayError> {
        self.request(methods::CHAT_ABORT, json!({ "run_id": run_id }))
            .await
            .map(drop)
    }

    /// # Errors
    /// See [`GatewayHandle::request`].
    pub async fn chat_history(&self, session_key: &str) -> Result<Vec<ChatMessage>, GatewayError> {
        #[derive(serde::Deserialize)]
        struct History {
            messages: Vec<ChatMessage>,
        }
        let history: History = self
            .call(methods::CHAT_HISTORY, json!({ "session_key": session_key }))
            .await?;
        Ok(history.messages)
    }

    /// # Errors
    /// See [`GatewayHandle::request`].
    pub async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>, GatewayError> {
        #[derive(serde::Deserialize)]
        struct Listing {
            entries: Vec<FileEntry>,
        }
        let listing: Listing = self.call(methods::FILES_LIST, json!({ "path": path })).await?;
        Ok(listing.entries)
    }

    /// # Errors
    /// See [`GatewayHandle::request`]; also fails on invalid base64 content.
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, GatewayError> {
        let body: FileContent = self.call(methods::FILES_GET, json!({ "path": path })).await?;
        body.decode()
            .ok_or_else(|| GatewayError::Decode(format!("{path}: content is not base64")))
    }

    /// # Errors
    /// See [`GatewayHandle::request`].
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), GatewayError> {
        let body = serde_json::to_value(FileContent::encode(path, data))
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        self.request(methods::FILES_SET, body).await.map(drop)
    }

    /// # Errors
    /// See [`GatewayHandle::request`].
    pub async fn delete_file(&self, path: &str) -> Result<(), GatewayError> {
        self.request(methods::FILES_DELETE, json!({ "path": path }))
            .await
            .map(drop)
    }

    /// # Errors
    /// See [`GatewayHandle::request`].
    pub async fn get_config(&self) -> Result<Value, GatewayError> {
        self.request(methods::CONFIG_GET, Value::Null).await
    }

    /// # Errors
    /// See [`GatewayHandle::request`].
    pub async fn set_config(&self, config: Value) -> Result<(), GatewayError> {
        self.request(methods::CONFIG_SET, json!({ "config": config }))
            .await
            .map(drop)
    }

    fn pending_map(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Result<Value, GatewayError>>>>
    {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Route responses to waiting requests and events to subscribers.
async fn route(
    mut rx: mpsc::UnboundedReceiver<StreamMessage>,
    mut status: watch::Receiver<StreamStatus>,
    pending: Pending,
    events: broadcast::Sender<GatewayEvent>,
) {
    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                route_payload(msg.payload, &pending, &events);
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected = status.borrow_and_update().state == ConnectionState::Connected;
                if !connected {
                    fail_all(&pending, &GatewayError::Disconnected);
                }
            }
        }
    }
    fail_all(&pending, &GatewayError::Disconnected);
}

fn route_payload(payload: Payload, pending: &Pending, events: &broadcast::Sender<GatewayEvent>) {
    let value = match payload {
        Payload::Json(value) => value,
        Payload::Text(text) => {
            tracing::debug!("Ignoring non-JSON gateway frame: {text}");
            return;
        }
        Payload::Binary(_) => return,
    };
    let frame = match serde_json::from_value::<GatewayFrame>(value) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("Invalid gateway frame: {e}");
            return;
        }
    };
    match frame {
        GatewayFrame::Res {
            id,
            ok,
            payload,
            error,
        } => {
            let waiter = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            let Some(waiter) = waiter else {
                tracing::debug!(request_id = %id, "Response for unknown request");
                return;
            };
            let result = if ok {
                Ok(payload.unwrap_or(Value::Null))
            } else {
                Err(error.map_or_else(
                    || GatewayError::Remote {
                        code: None,
                        message: "request failed".to_owned(),
                    },
                    GatewayError::from,
                ))
            };
            let _ = waiter.send(result);
        }
        GatewayFrame::Event { event, payload } => {
            let _ = events.send(GatewayEvent::from_parts(event, payload));
        }
        GatewayFrame::Req { method, .. } => {
            tracing::debug!(method, "Ignoring server-initiated request");
        }
    }
}

fn fail_all(pending: &Pending, error: &GatewayError) {
    let drained: Vec<_> = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();
    for (_, waiter) in drained {
        let _ = waiter.send(Err(error.clone()));
    }
}

/// Chat history folded from gateway events.
///
/// `chat.content` deltas accumulate into one assistant message per run;
/// `chat.done` or `chat.error` closes it.
#[derive(Debug, Clone, Default)]
pub struct ChatTranscript {
    messages: Vec<ChatMessage>,
    streaming: Option<(String, usize)>,
    last_error: Option<String>,
}

impl ChatTranscript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Run id currently receiving deltas.
    #[must_use]
    pub fn streaming_run(&self) -> Option<&str> {
        self.streaming.as_ref().map(|(run, _)| run.as_str())
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Record the user's own turn before the gateway echoes anything.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::new(ChatRole::User, content));
    }

    /// Replace everything with a fetched history.
    pub fn reset(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.streaming = None;
        self.last_error = None;
    }

    /// Fold one event in. Returns whether the transcript changed.
    pub fn apply(&mut self, event: &GatewayEvent) -> bool {
        match event {
            GatewayEvent::Chat(message) => {
                let open = match (&message.run_id, &self.streaming) {
                    (Some(run), Some((streaming, index))) if run == streaming => Some(*index),
                    _ => None,
                };
                if let Some(index) = open {
                    // Final text for the run we were streaming.
                    self.messages[index] = message.clone();
                    self.streaming = None;
                    return true;
                }
                if message.role == ChatRole::User && self.is_local_echo(message) {
                    return false;
                }
                self.messages.push(message.clone());
                true
            }
            GatewayEvent::ChatContent { run_id, delta } => {
                let open = match &self.streaming {
                    Some((run, index)) if run == run_id => Some(*index),
                    _ => None,
                };
                if let Some(index) = open {
                    self.messages[index].content.push_str(delta);
                } else {
                    let mut message = ChatMessage::new(ChatRole::Assistant, delta.clone());
                    message.run_id = Some(run_id.clone());
                    self.messages.push(message);
                    self.streaming = Some((run_id.clone(), self.messages.len() - 1));
                }
                true
            }
            GatewayEvent::ChatDone { run_id } => self.finish(run_id),
            GatewayEvent::ChatError { run_id, message } => {
                self.finish(run_id);
                self.last_error = Some(message.clone());
                let mut notice = ChatMessage::new(ChatRole::System, format!("Error: {message}"));
                notice.run_id = Some(run_id.clone());
                self.messages.push(notice);
                true
            }
            GatewayEvent::Other { .. } => false,
        }
    }

    fn finish(&mut self, run_id: &str) -> bool {
        if self.streaming_run() == Some(run_id) {
            self.streaming = None;
            true
        } else {
            false
        }
    }

    fn is_local_echo(&self, message: &ChatMessage) -> bool {
        self.messages
            .last()
            .is_some_and(|last| last.role == ChatRole::User && last.content == message.content)
    }
}

#[cfg(test)]
mod tests {
    use claw_core::ConnectionState;
    use serde_json::json;

    use super::*;
    use crate::{
        connection::Frame,
        endpoint::TokenPlacement,
        mock::{MockConnector, MockIssuer, MockServer},
    };

    async fn connected() -> (GatewayClient, MockServer, Arc<MockConnector>) {
        let (connector, mut servers) = MockConnector::new();
        let connector = Arc::new(connector);
        let mut gateway = GatewayClient::new(
            EndpointTemplate::new("ws://{hostname}/gateway", TokenPlacement::Query("token".into())),
            Arc::new(MockIssuer::new()),
            Arc::clone(&connector) as Arc<dyn Connector>,
        );
        gateway.activate(StreamTarget::new("agent-1").with_hostname("atlas.local"));
        let server = servers.recv().await.unwrap();
        let mut status = gateway.subscribe_status();
        while status.borrow_and_update().state != ConnectionState::Connected {
            status.changed().await.unwrap();
        }
        (gateway, server, connector)
    }

    async fn next_request(server: &mut MockServer) -> (String, String, Value) {
        let Some(Frame::Text(text)) = server.recv().await else {
            panic!("expected a text frame");
        };
        match serde_json::from_str(&text).unwrap() {
            GatewayFrame::Req { id, method, params } => (id, method, params),
            other => panic!("expected request, got {other:?}"),
        }
    }

    fn respond(server: &MockServer, id: &str, payload: Value) {
        server.send_text(json!({"type": "res", "id": id, "ok": true, "payload": payload}).to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn request_is_correlated_with_response() {
        let (gateway, mut server, _) = connected().await;
        assert_eq!(
            server.target.url.as_str(),
            "ws://atlas.local/gateway?token=tok-1"
        );

        let handle = gateway.handle();
        let call = tokio::spawn(async move { handle.send_chat("main", "hello").await });
        let (id, method, params) = next_request(&mut server).await;
        assert_eq!(method, "chat.send");
        assert_eq!(params, json!({"session_key": "main", "message": "hello"}));

        // Unrelated response is ignored.
        respond(&server, "someone-else", json!({}));
        respond(&server, &id, json!({"run_id": "run-1"}));

        assert_eq!(call.await.unwrap().unwrap(), ChatAck { run_id: "run-1".into() });
    }

    #[tokio::test(start_paused = true)]
    async fn remote_errors_surface_verbatim() {
        let (gateway, mut server, _) = connected().await;
        let handle = gateway.handle();
        let call = tokio::spawn(async move { handle.read_file("missing.md").await });
        let (id, method, _) = next_request(&mut server).await;
        assert_eq!(method, "files.get");
        server.send_text(
            json!({"type": "res", "id": id, "ok": false,
                   "error": {"code": "not_found", "message": "missing.md does not exist"}})
            .to_string(),
        );
        let err = call.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            GatewayError::Remote {
                code: Some("not_found".into()),
                message: "missing.md does not exist".into()
            }
        );
        assert_eq!(err.to_string(), "Gateway error (not_found): missing.md does not exist");
    }

    #[tokio::test(start_paused = true)]
    async fn file_round_trip_uses_base64() {
        let (gateway, mut server, _) = connected().await;
        let handle = gateway.handle();
        let call = tokio::spawn(async move {
            handle.write_file("notes.md", b"hi").await.unwrap();
            handle.read_file("notes.md").await
        });

        let (id, method, params) = next_request(&mut server).await;
        assert_eq!(method, "files.set");
        assert_eq!(params, json!({"path": "notes.md", "content": "aGk="}));
        respond(&server, &id, Value::Null);

        let (id, _, _) = next_request(&mut server).await;
        respond(&server, &id, json!({"path": "notes.md", "content": "aGk="}));
        assert_eq!(call.await.unwrap().unwrap(), b"hi");
    }

    #[tokio::test(start_paused = true)]
    async fn pending_requests_fail_on_disconnect() {
        let (gateway, mut server, _) = connected().await;
        let handle = gateway.handle();
        let call = tokio::spawn(async move { handle.get_config().await });
        next_request(&mut server).await;
        server.close();
        assert_eq!(call.await.unwrap(), Err(GatewayError::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_time_out() {
        let (gateway, mut server, _) = connected().await;
        let gateway = gateway.with_request_timeout(Duration::from_secs(5));
        let handle = gateway.handle();
        let call = tokio::spawn(async move { handle.list_files("/").await });
        next_request(&mut server).await;
        assert_eq!(call.await.unwrap(), Err(GatewayError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn not_connected_and_unavailable_are_distinguished() {
        let (connector, _servers) = MockConnector::new();
        let connector = Arc::new(connector);
        connector.set_refuse(true);
        let mut gateway = GatewayClient::new(
            EndpointTemplate::gateway(),
            Arc::new(MockIssuer::new()),
            Arc::clone(&connector) as Arc<dyn Connector>,
        );
        let handle = gateway.handle();
        assert_eq!(handle.get_config().await, Err(GatewayError::NotConnected));

        gateway.activate(StreamTarget::new("a").with_hostname("atlas.example.com"));
        let mut status = gateway.subscribe_status();
        while !status.borrow_and_update().gave_up {
            status.changed().await.unwrap();
        }
        assert!(matches!(
            handle.get_config().await,
            Err(GatewayError::Unavailable(reason)) if reason.contains("refused")
        ));
        assert_eq!(connector.attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn handle_follows_reactivation() {
        let (connector, mut servers) = MockConnector::new();
        let mut gateway = GatewayClient::new(
            EndpointTemplate::new("ws://{hostname}/gateway", TokenPlacement::Query("token".into())),
            Arc::new(MockIssuer::new()),
            Arc::new(connector),
        );
        let handle = gateway.handle();
        gateway.activate(StreamTarget::new("a1").with_hostname("atlas.local"));
        servers.recv().await.unwrap();
        gateway.activate(StreamTarget::new("a2").with_hostname("borealis.local"));
        let mut server = servers.recv().await.unwrap();
        let mut status = gateway.subscribe_status();
        while status.borrow_and_update().state != ConnectionState::Connected {
            status.changed().await.unwrap();
        }

        let call = tokio::spawn(async move { handle.get_config().await });
        let (id, method, _) = next_request(&mut server).await;
        assert_eq!(method, "config.get");
        assert!(server.target.url.as_str().starts_with("ws://borealis.local/"));
        respond(&server, &id, json!({"model": "m1"}));
        assert_eq!(call.await.unwrap(), Ok(json!({"model": "m1"})));

        let handle = gateway.handle();
        drop(gateway);
        assert_eq!(handle.get_config().await, Err(GatewayError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_broadcast() {
        let (gateway, server, _) = connected().await;
        let mut events = gateway.subscribe_events();
        server.send_text(
            json!({"type": "event", "event": "chat.content",
                   "payload": {"run_id": "r1", "delta": "Hi"}})
            .to_string(),
        );
        server.send_text("not json");
        server.send_text(json!({"type": "event", "event": "chat.done", "payload": {"run_id": "r1"}}).to_string());

        assert_eq!(
            events.recv().await.unwrap(),
            GatewayEvent::ChatContent {
                run_id: "r1".into(),
                delta: "Hi".into()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            GatewayEvent::ChatDone { run_id: "r1".into() }
        );
    }

    #[test]
    fn transcript_folds_streamed_run() {
        let mut transcript = ChatTranscript::new();
        transcript.push_user("hello");
        assert!(!transcript.apply(&GatewayEvent::Chat(ChatMessage::new(ChatRole::User, "hello"))));

        for delta in ["Hi", " there", "!"] {
            assert!(transcript.apply(&GatewayEvent::ChatContent {
                run_id: "r1".into(),
                delta: delta.into(),
            }));
        }
        assert_eq!(transcript.streaming_run(), Some("r1"));
        assert!(transcript.apply(&GatewayEvent::ChatDone { run_id: "r1".into() }));
        assert_eq!(transcript.streaming_run(), None);

        let contents: Vec<_> = transcript.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "Hi there!"]);
        assert_eq!(transcript.messages()[1].role, ChatRole::Assistant);
    }

    #[test]
    fn transcript_records_errors_and_final_messages() {
        let mut transcript = ChatTranscript::new();
        transcript.apply(&GatewayEvent::ChatContent {
            run_id: "r1".into(),
            delta: "partial".into(),
        });
        let mut fin = ChatMessage::new(ChatRole::Assistant, "complete answer");
        fin.run_id = Some("r1".into());
        assert!(transcript.apply(&GatewayEvent::Chat(fin)));
        assert_eq!(transcript.messages().len(), 1);
        assert_eq!(transcript.messages()[0].content, "complete answer");

        transcript.apply(&GatewayEvent::ChatContent {
            run_id: "r2".into(),
            delta: "half".into(),
        });
        transcript.apply(&GatewayEvent::ChatError {
            run_id: "r2".into(),
            message: "model overloaded".into(),
        });
        assert_eq!(transcript.last_error(), Some("model overloaded"));
        assert_eq!(transcript.streaming_run(), None);
        assert_eq!(transcript.messages().last().unwrap().role, ChatRole::System);

        assert!(!transcript.apply(&GatewayEvent::Other {
            event: "presence".into(),
            payload: Value::Null,
        }));
    }
}

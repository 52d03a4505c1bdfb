//! Reconnecting stream client.
//!
//! One `StreamClient` serves one panel (logs, shell, gateway). It is bound
//! to at most one resource at a time; every activation runs in its own
//! worker task, and the worker is the only owner of the socket.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use claw_core::{
    AccessToken, ConnectionState, IssueError, Phase, RetryPolicy, SessionAction, SessionEvent,
    StreamSession, StreamTarget, TokenIssuer,
};
use futures::{FutureExt, future::BoxFuture};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};

use crate::{
    connection::{BoxConnection, Connector, Frame, TransportError},
    endpoint::EndpointTemplate,
    protocol::{ParseMode, Payload},
};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-endpoint behavior of a stream client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Label used in logs.
    pub name: &'static str,
    pub policy: RetryPolicy,
    pub endpoint: EndpointTemplate,
    pub parse: ParseMode,
}

impl StreamConfig {
    #[must_use]
    pub fn new(name: &'static str, endpoint: EndpointTemplate) -> Self {
        Self {
            name,
            policy: RetryPolicy::stream(),
            endpoint,
            parse: ParseMode::Json,
        }
    }

    /// JSON log envelopes, fixed 15s retry.
    #[must_use]
    pub fn logs(endpoint: EndpointTemplate) -> Self {
        Self::new("logs", endpoint)
    }

    /// Raw terminal bytes, fixed 15s retry.
    #[must_use]
    pub fn shell(endpoint: EndpointTemplate) -> Self {
        Self::new("shell", endpoint).with_parse(ParseMode::Raw)
    }

    /// Gateway frames, capped exponential retry with a give-up point.
    #[must_use]
    pub fn gateway(endpoint: EndpointTemplate) -> Self {
        Self::new("gateway", endpoint).with_policy(RetryPolicy::gateway())
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_parse(mut self, parse: ParseMode) -> Self {
        self.parse = parse;
        self
    }
}

/// Snapshot of a client's connection, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamStatus {
    pub state: ConnectionState,
    pub target: Option<StreamTarget>,
    pub last_error: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Retry policy exhausted; only a manual reconnect will try again.
    pub gave_up: bool,
    epoch: u64,
}

impl StreamStatus {
    /// Activation counter; bumped by every activate and deactivate.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Incoming message tagged with the resource it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub target: StreamTarget,
    /// [`StreamStatus::epoch`] of the activation that received it.
    pub epoch: u64,
    pub payload: Payload,
}

enum Control {
    Reconnect,
    SetConnectable(bool),
    Send(Frame),
}

struct Activation {
    target: StreamTarget,
    // Dropping this sender (and the `StreamSender` slot) stops the worker.
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

type ControlSlot = Arc<Mutex<Option<mpsc::UnboundedSender<Control>>>>;

/// Cloneable outbound half of a [`StreamClient`].
///
/// Always sends on the client's current activation.
#[derive(Clone)]
pub struct StreamSender {
    status: Arc<watch::Sender<StreamStatus>>,
    control: ControlSlot,
}

impl StreamSender {
    /// Queue an outbound frame on the open connection.
    ///
    /// # Errors
    /// Returns `NotConnected` unless the stream is currently connected.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.status.borrow().state != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .ok_or(TransportError::NotConnected)?
            .send(Control::Send(frame))
            .map_err(|_| TransportError::NotConnected)
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }
}

/// Best-effort live connection to one resource at a time.
pub struct StreamClient {
    config: Arc<StreamConfig>,
    issuer: Arc<dyn TokenIssuer>,
    connector: Arc<dyn Connector>,
    handler: mpsc::UnboundedSender<StreamMessage>,
    status: Arc<watch::Sender<StreamStatus>>,
    outbound: ControlSlot,
    activation: Option<Activation>,
    connectable: bool,
}

impl StreamClient {
    /// Create an inactive client. Incoming messages go to `handler`.
    #[must_use]
    pub fn new(
        config: StreamConfig,
        issuer: Arc<dyn TokenIssuer>,
        connector: Arc<dyn Connector>,
        handler: mpsc::UnboundedSender<StreamMessage>,
    ) -> Self {
        let (status, _) = watch::channel(StreamStatus::default());
        Self {
            config: Arc::new(config),
            issuer,
            connector,
            handler,
            status: Arc::new(status),
            outbound: ControlSlot::default(),
            activation: None,
            connectable: true,
        }
    }

    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<StreamStatus> {
        self.status.subscribe()
    }

    /// Handle for sending from other tasks.
    #[must_use]
    pub fn sender(&self) -> StreamSender {
        StreamSender {
            status: Arc::clone(&self.status),
            control: Arc::clone(&self.outbound),
        }
    }

    #[must_use]
    pub fn target(&self) -> Option<&StreamTarget> {
        self.activation.as_ref().map(|a| &a.target)
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.activation.is_some()
    }

    /// Bind to `target`, tearing down any previous activation first.
    ///
    /// Re-activating the current target is a no-op.
    pub fn activate(&mut self, target: impl Into<StreamTarget>) {
        let target = target.into();
        if let Some(active) = &self.activation {
            if active.target == target && !active.task.is_finished() {
                return;
            }
        }
        self.deactivate();

        let mut epoch = 0;
        self.status.send_modify(|status| {
            epoch = status.epoch + 1;
            *status = StreamStatus {
                target: Some(target.clone()),
                epoch,
                ..StreamStatus::default()
            };
        });

        let (control, control_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            config: Arc::clone(&self.config),
            issuer: Arc::clone(&self.issuer),
            connector: Arc::clone(&self.connector),
            handler: self.handler.clone(),
            status: Arc::clone(&self.status),
            control: control_rx,
            epoch,
            session: StreamSession::new(self.config.policy),
            token: None,
            conn: None,
            issuing: None,
            opening: None,
            retry_at: None,
            last_error: None,
        };
        tracing::debug!(
            stream = self.config.name,
            resource_id = %target.id,
            "Activating stream"
        );
        let task = tokio::spawn(worker.run(target.clone(), self.connectable));
        *self.control_slot() = Some(control.clone());
        self.activation = Some(Activation {
            target,
            control,
            task,
        });
    }

    /// Unbind. Cancels pending retries and closes the socket.
    ///
    /// Safe to call repeatedly.
    pub fn deactivate(&mut self) {
        self.control_slot().take();
        let was_active = self.activation.take().is_some();
        if was_active {
            tracing::debug!(stream = self.config.name, "Deactivating stream");
        }
        self.status.send_if_modified(|status| {
            if !was_active && status.target.is_none() {
                return false;
            }
            *status = StreamStatus {
                epoch: status.epoch + 1,
                ..StreamStatus::default()
            };
            true
        });
    }

    /// Tell the client whether the resource may currently be connected to.
    ///
    /// While unconnectable no retries are scheduled.
    pub fn set_connectable(&mut self, connectable: bool) {
        if self.connectable == connectable {
            return;
        }
        self.connectable = connectable;
        self.control(Control::SetConnectable(connectable));
    }

    /// Drop any pending backoff and reconnect now.
    pub fn reconnect(&self) {
        self.control(Control::Reconnect);
    }

    /// Queue an outbound frame on the open connection.
    ///
    /// # Errors
    /// Returns `NotConnected` unless the stream is currently connected.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.activation.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.sender().send(frame)
    }

    fn control_slot(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<Control>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn control(&self, msg: Control) {
        if let Some(active) = &self.activation {
            let _ = active.control.send(msg);
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.deactivate();
    }
}

enum Wake {
    Control(Option<Control>),
    Issued(Result<AccessToken, IssueError>),
    Connected(Result<BoxConnection, TransportError>),
    Frame(Option<Result<Frame, TransportError>>),
    RetryDue,
}

enum Step {
    Event(SessionEvent),
    Idle,
    Stop,
}

/// Drives one activation: owns the session reducer, the socket and the timer.
struct Worker {
    config: Arc<StreamConfig>,
    issuer: Arc<dyn TokenIssuer>,
    connector: Arc<dyn Connector>,
    handler: mpsc::UnboundedSender<StreamMessage>,
    status: Arc<watch::Sender<StreamStatus>>,
    control: mpsc::UnboundedReceiver<Control>,
    epoch: u64,
    session: StreamSession,
    token: Option<AccessToken>,
    conn: Option<BoxConnection>,
    /// Token request in flight; survives control messages.
    issuing: Option<BoxFuture<'static, Result<AccessToken, IssueError>>>,
    /// Handshake in flight.
    opening: Option<BoxFuture<'static, Result<BoxConnection, TransportError>>>,
    retry_at: Option<Instant>,
    last_error: Option<String>,
}

impl Worker {
    async fn run(mut self, target: StreamTarget, connectable: bool) {
        let now = Utc::now();
        self.session
            .apply(SessionEvent::SetConnectable(connectable), now);
        let actions = self.session.apply(SessionEvent::Activate(target), now);
        self.execute(actions).await;

        loop {
            self.publish();
            let wake = self.wait().await;
            let event = match self.handle(wake).await {
                Step::Event(event) => event,
                Step::Idle => continue,
                Step::Stop => break,
            };
            let actions = self.session.apply(event, Utc::now());
            self.execute(actions).await;
        }

        let actions = self.session.apply(SessionEvent::Deactivate, Utc::now());
        self.execute(actions).await;
        tracing::debug!(stream = self.config.name, "Stream worker stopped");
    }

    /// Wait for whatever the current phase is blocked on, or a control message.
    async fn wait(&mut self) -> Wake {
        // Leaving a phase cancels whatever it had in flight.
        if !matches!(self.session.phase(), Phase::Issuing) {
            self.issuing = None;
        }
        if !matches!(self.session.phase(), Phase::Opening) {
            self.opening = None;
        }
        match self.session.phase() {
            Phase::Issuing => {
                if self.issuing.is_none() {
                    let Some(target) = self.session.target().cloned() else {
                        return Wake::Control(None);
                    };
                    let issuer = Arc::clone(&self.issuer);
                    self.issuing = Some(async move { issuer.issue(&target).await }.boxed());
                }
                let Some(issuing) = self.issuing.as_mut() else {
                    return Wake::Control(None);
                };
                tokio::select! {
                    biased;
                    ctl = self.control.recv() => Wake::Control(ctl),
                    res = issuing => Wake::Issued(res),
                }
            }
            Phase::Opening => {
                if self.opening.is_none() {
                    let resolved = match (self.session.target(), &self.token) {
                        (Some(target), Some(token)) => self.config.endpoint.resolve(target, token),
                        _ => Err(TransportError::NotConnected),
                    };
                    let request = match resolved {
                        Ok(request) => request,
                        Err(e) => return Wake::Connected(Err(e)),
                    };
                    let connector = Arc::clone(&self.connector);
                    self.opening = Some(async move { connector.connect(&request).await }.boxed());
                }
                let Some(opening) = self.opening.as_mut() else {
                    return Wake::Control(None);
                };
                tokio::select! {
                    biased;
                    ctl = self.control.recv() => Wake::Control(ctl),
                    res = opening => Wake::Connected(res),
                }
            }
            Phase::Open => {
                let Some(conn) = self.conn.as_mut() else {
                    return Wake::Frame(None);
                };
                tokio::select! {
                    biased;
                    ctl = self.control.recv() => Wake::Control(ctl),
                    frame = conn.recv() => Wake::Frame(frame),
                }
            }
            Phase::Backoff { .. } => {
                let deadline = self.retry_at.unwrap_or_else(Instant::now);
                tokio::select! {
                    biased;
                    ctl = self.control.recv() => Wake::Control(ctl),
                    () = tokio::time::sleep_until(deadline) => Wake::RetryDue,
                }
            }
            Phase::Inactive | Phase::Parked | Phase::GaveUp { .. } => {
                Wake::Control(self.control.recv().await)
            }
        }
    }

    async fn handle(&mut self, wake: Wake) -> Step {
        match wake {
            Wake::Control(None) => Step::Stop,
            Wake::Control(Some(Control::Reconnect)) => Step::Event(SessionEvent::Reconnect),
            Wake::Control(Some(Control::SetConnectable(connectable))) => {
                Step::Event(SessionEvent::SetConnectable(connectable))
            }
            Wake::Control(Some(Control::Send(frame))) => {
                let Some(conn) = self.conn.as_mut() else {
                    tracing::debug!(stream = self.config.name, "Dropping frame, not connected");
                    return Step::Idle;
                };
                match conn.send(frame).await {
                    Ok(()) => Step::Idle,
                    Err(e) => self.fail(e.to_string()),
                }
            }
            Wake::Issued(Ok(token)) => {
                self.issuing = None;
                self.token = Some(token);
                Step::Event(SessionEvent::TokenIssued)
            }
            Wake::Issued(Err(e)) => {
                self.issuing = None;
                tracing::warn!(stream = self.config.name, "Token issuance failed: {e}");
                self.fail(e.to_string())
            }
            Wake::Connected(Ok(conn)) => {
                self.opening = None;
                self.conn = Some(conn);
                self.last_error = None;
                tracing::info!(
                    stream = self.config.name,
                    resource_id = self.resource_id(),
                    "Stream connected"
                );
                Step::Event(SessionEvent::Opened)
            }
            Wake::Connected(Err(e)) => {
                self.opening = None;
                tracing::warn!(stream = self.config.name, "Stream connect failed: {e}");
                self.fail(e.to_string())
            }
            Wake::Frame(Some(Ok(frame))) => {
                self.dispatch(frame);
                Step::Event(SessionEvent::Received)
            }
            Wake::Frame(Some(Err(e))) => {
                tracing::warn!(stream = self.config.name, "Stream error: {e}");
                self.fail(e.to_string())
            }
            Wake::Frame(None) => {
                tracing::info!(
                    stream = self.config.name,
                    resource_id = self.resource_id(),
                    "Stream closed by peer"
                );
                Step::Event(SessionEvent::Closed)
            }
            Wake::RetryDue => {
                self.retry_at = None;
                Step::Event(SessionEvent::RetryElapsed)
            }
        }
    }

    fn fail(&mut self, reason: String) -> Step {
        self.last_error = Some(reason.clone());
        Step::Event(SessionEvent::Failed(reason))
    }

    async fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                // Driven by the phase in `wait`.
                SessionAction::IssueToken | SessionAction::Open => {}
                SessionAction::Close => {
                    if let Some(mut conn) = self.conn.take() {
                        if tokio::time::timeout(CLOSE_TIMEOUT, conn.close()).await.is_err() {
                            tracing::debug!(stream = self.config.name, "Close timed out");
                        }
                    }
                }
                SessionAction::ScheduleRetry(delay) => {
                    self.retry_at = Some(Instant::now() + delay);
                    tracing::info!(
                        stream = self.config.name,
                        resource_id = self.resource_id(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnect scheduled"
                    );
                }
                SessionAction::CancelRetry => self.retry_at = None,
                SessionAction::GiveUp(reason) => {
                    tracing::warn!(
                        stream = self.config.name,
                        resource_id = self.resource_id(),
                        "Giving up after repeated failures: {reason}"
                    );
                }
            }
        }
    }

    fn dispatch(&self, frame: Frame) {
        let Some(target) = self.session.target() else {
            return;
        };
        // Superseded activations must not leak messages into the new one.
        if self.status.borrow().epoch != self.epoch {
            return;
        }
        let payload = Payload::decode(frame, self.config.parse);
        let _ = self.handler.send(StreamMessage {
            target: target.clone(),
            epoch: self.epoch,
            payload,
        });
    }

    fn publish(&self) {
        let epoch = self.epoch;
        let next = StreamStatus {
            state: self.session.state(),
            target: self.session.target().cloned(),
            last_error: self.last_error.clone(),
            last_seen: self.session.last_seen(),
            gave_up: matches!(self.session.phase(), Phase::GaveUp { .. }),
            epoch,
        };
        self.status.send_if_modified(|status| {
            if status.epoch != epoch || *status == next {
                return false;
            }
            *status = next;
            true
        });
    }

    fn resource_id(&self) -> &str {
        self.session.target().map_or("", |t| t.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use claw_core::ConnectionState;
    use serde_json::json;

    use super::*;
    use crate::{
        endpoint::TokenPlacement,
        mock::{MockConnector, MockIssuer, MockServer},
    };

    struct Harness {
        client: StreamClient,
        issuer: Arc<MockIssuer>,
        connector: Arc<MockConnector>,
        servers: mpsc::UnboundedReceiver<MockServer>,
        messages: mpsc::UnboundedReceiver<StreamMessage>,
        status: watch::Receiver<StreamStatus>,
    }

    fn harness(config: StreamConfig) -> Harness {
        let issuer = Arc::new(MockIssuer::new());
        let (connector, servers) = MockConnector::new();
        let connector = Arc::new(connector);
        let (tx, messages) = mpsc::unbounded_channel();
        let client = StreamClient::new(
            config,
            Arc::clone(&issuer) as Arc<dyn TokenIssuer>,
            Arc::clone(&connector) as Arc<dyn Connector>,
            tx,
        );
        let status = client.subscribe_status();
        Harness {
            client,
            issuer,
            connector,
            servers,
            messages,
            status,
        }
    }

    fn endpoint() -> EndpointTemplate {
        EndpointTemplate::new("ws://mock/{id}/logs", TokenPlacement::Query("ws_token".into()))
    }

    async fn wait_for(
        status: &mut watch::Receiver<StreamStatus>,
        pred: impl Fn(&StreamStatus) -> bool,
    ) -> StreamStatus {
        loop {
            {
                let current = status.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            status.changed().await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connects_and_dispatches_parsed_messages() {
        let mut h = harness(StreamConfig::logs(endpoint()));
        assert_eq!(h.client.status().state, ConnectionState::Disconnected);

        h.client.activate("agent-1");
        let server = h.servers.recv().await.unwrap();
        assert_eq!(server.target.url.as_str(), "ws://mock/agent-1/logs?ws_token=tok-1");
        wait_for(&mut h.status, |s| s.state == ConnectionState::Connected).await;

        server.send_text(r#"{"event":"log","log":"hello"}"#);
        server.send_text("oops");

        let first = h.messages.recv().await.unwrap();
        assert_eq!(first.target.id, "agent-1");
        assert_eq!(first.payload, Payload::Json(json!({"event": "log", "log": "hello"})));
        let second = h.messages.recv().await.unwrap();
        assert_eq!(second.payload, Payload::Text("oops".into()));

        let status = wait_for(&mut h.status, |s| s.last_seen.is_some()).await;
        assert_eq!(status.target.map(|t| t.id), Some("agent-1".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_at_fixed_interval_after_close() {
        let mut h = harness(StreamConfig::logs(endpoint()));
        h.client.activate("a");
        let mut server = h.servers.recv().await.unwrap();

        for round in 1..=3 {
            wait_for(&mut h.status, |s| s.state == ConnectionState::Connected).await;
            let closed_at = Instant::now();
            server.close();

            wait_for(&mut h.status, |s| s.state == ConnectionState::Connecting).await;
            server = h.servers.recv().await.unwrap();
            assert_eq!(closed_at.elapsed(), Duration::from_secs(15), "round {round}");
            assert_eq!(h.connector.attempts(), round + 1);
            // Fresh token for every attempt.
            assert!(server.target.url.as_str().ends_with(&format!("tok-{}", round + 1)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deactivate_cancels_pending_retry() {
        let mut h = harness(StreamConfig::logs(endpoint()));
        h.client.activate("a");
        h.servers.recv().await.unwrap().close();
        wait_for(&mut h.status, |s| s.state == ConnectionState::Connecting).await;

        h.client.deactivate();
        h.client.deactivate();
        assert!(!h.client.is_active());
        let status = h.client.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.target.is_none());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.connector.attempts(), 1);
        assert_eq!(h.issuer.requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deactivate_closes_open_connection() {
        let mut h = harness(StreamConfig::logs(endpoint()));
        h.client.activate("a");
        let mut server = h.servers.recv().await.unwrap();
        wait_for(&mut h.status, |s| s.state == ConnectionState::Connected).await;

        h.client.deactivate();
        assert_eq!(server.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_resource_replaces_connection() {
        let mut h = harness(StreamConfig::logs(endpoint()));
        h.client.activate("a");
        let mut first = h.servers.recv().await.unwrap();

        h.client.activate("b");
        assert_eq!(first.recv().await, None);
        let second = h.servers.recv().await.unwrap();
        assert!(second.target.url.as_str().starts_with("ws://mock/b/logs"));
        assert_eq!(h.client.target().map(|t| t.id.as_str()), Some("b"));

        // Same target again keeps the live connection.
        h.client.activate("b");
        second.send_text("still here");
        let msg = h.messages.recv().await.unwrap();
        assert_eq!(msg.target.id, "b");
        assert_eq!(h.connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_policy_backs_off_exponentially_then_gives_up() {
        let mut h = harness(StreamConfig::gateway(endpoint()));
        h.connector.set_refuse(true);
        h.client.activate("a");

        let status = wait_for(&mut h.status, |s| s.gave_up).await;
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.last_error.unwrap().contains("refused"));

        let times = h.connector.attempt_times();
        let gaps: Vec<u64> = times.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![2, 4, 8, 16, 20]);

        // Nothing further is scheduled.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.connector.attempts(), 6);

        // Manual reconnect starts over.
        h.connector.set_refuse(false);
        h.client.reconnect();
        h.servers.recv().await.unwrap();
        let status = wait_for(&mut h.status, |s| s.state == ConnectionState::Connected).await;
        assert!(!status.gave_up);
        assert!(status.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn token_failure_goes_through_backoff() {
        let mut h = harness(StreamConfig::logs(endpoint()));
        h.issuer.fail_next(1);
        let start = Instant::now();
        h.client.activate("a");

        let status = wait_for(&mut h.status, |s| s.last_error.is_some()).await;
        assert!(status.last_error.unwrap().contains("token service down"));
        h.servers.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert_eq!(h.issuer.requests(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unconnectable_resource_pauses_retries() {
        let mut h = harness(StreamConfig::logs(endpoint()));
        h.client.activate("a");
        h.servers.recv().await.unwrap().close();
        wait_for(&mut h.status, |s| s.state == ConnectionState::Connecting).await;

        h.client.set_connectable(false);
        wait_for(&mut h.status, |s| s.state == ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.connector.attempts(), 1);

        let resumed_at = Instant::now();
        h.client.set_connectable(true);
        h.servers.recv().await.unwrap();
        assert_eq!(resumed_at.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_issuing_never_connects() {
        let mut h = harness(StreamConfig::logs(endpoint()));
        h.issuer.set_delay(Duration::from_secs(1));
        h.client.activate("a");
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.client.set_connectable(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.connector.attempts(), 0);
        assert_eq!(h.issuer.requests(), 1);
        assert_eq!(h.client.status().state, ConnectionState::Disconnected);

        h.client.set_connectable(true);
        h.servers.recv().await.unwrap();
        assert_eq!(h.issuer.requests(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn control_messages_do_not_restart_token_request() {
        let mut h = harness(StreamConfig::logs(endpoint()));
        h.issuer.set_delay(Duration::from_secs(1));
        h.client.activate("a");
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Reconnecting mid-issue keeps the request already in flight.
        h.client.reconnect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.servers.recv().await.unwrap();
        assert_eq!(h.issuer.requests(), 1);
        assert_eq!(h.connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_carry_activation_epoch() {
        let mut h = harness(StreamConfig::logs(endpoint()));
        h.client.activate("a");
        let server = h.servers.recv().await.unwrap();
        wait_for(&mut h.status, |s| s.state == ConnectionState::Connected).await;
        server.send_text("first");
        let msg = h.messages.recv().await.unwrap();
        assert_eq!(msg.epoch, h.client.status().epoch());

        h.client.deactivate();
        h.client.activate("a");
        let server = h.servers.recv().await.unwrap();
        server.send_text("second");
        let next = h.messages.recv().await.unwrap();
        assert!(next.epoch > msg.epoch);
        assert_eq!(next.epoch, h.client.status().epoch());
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_connection() {
        let mut h = harness(StreamConfig::shell(endpoint()));
        assert_eq!(h.client.send(Frame::text("ls\n")), Err(TransportError::NotConnected));

        h.client.activate("a");
        let mut server = h.servers.recv().await.unwrap();
        wait_for(&mut h.status, |s| s.state == ConnectionState::Connected).await;

        h.client.send(Frame::text("ls\n")).unwrap();
        assert_eq!(server.recv().await, Some(Frame::text("ls\n")));

        // Raw mode leaves JSON-looking output alone.
        server.send_text("42");
        let msg = h.messages.recv().await.unwrap();
        assert_eq!(msg.payload, Payload::Text("42".into()));
    }
}

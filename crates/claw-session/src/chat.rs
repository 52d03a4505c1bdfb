//! Agent chat over the gateway, folded into a transcript.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use claw_core::{ConnectionState, StreamTarget, TokenIssuer};
use claw_transport::{
    ChatTranscript, Connector, EndpointTemplate, GatewayClient, GatewayError, GatewayEvent,
    GatewayHandle, StreamStatus, protocol::ChatMessage,
};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        watch,
    },
    task::JoinHandle,
};

/// Gateway session key used when none is configured.
pub const DEFAULT_SESSION_KEY: &str = "main";

type Transcript = Arc<Mutex<ChatTranscript>>;
type SessionKey = Arc<Mutex<String>>;

/// Chat tab for one agent at a time.
///
/// The transcript belongs to the bound resource: it survives tab switches
/// and is replaced by the gateway's stored history on every connect.
pub struct ChatPanel {
    gateway: GatewayClient,
    requests: GatewayHandle,
    transcript: Transcript,
    revision: Arc<watch::Sender<u64>>,
    session_key: SessionKey,
    bound: Option<StreamTarget>,
    pump: JoinHandle<()>,
    history: JoinHandle<()>,
}

impl ChatPanel {
    #[must_use]
    pub fn new(issuer: Arc<dyn TokenIssuer>, connector: Arc<dyn Connector>) -> Self {
        Self::with_gateway(GatewayClient::new(EndpointTemplate::gateway(), issuer, connector))
    }

    #[must_use]
    pub fn with_gateway(gateway: GatewayClient) -> Self {
        let transcript = Transcript::default();
        let (revision, _) = watch::channel(0);
        let revision = Arc::new(revision);
        let session_key: SessionKey = Arc::new(Mutex::new(DEFAULT_SESSION_KEY.to_owned()));
        let requests = gateway.handle();

        let pump = tokio::spawn(fold_events(
            gateway.subscribe_events(),
            Arc::clone(&transcript),
            Arc::clone(&revision),
        ));
        let history = tokio::spawn(reload_on_connect(
            gateway.subscribe_status(),
            requests.clone(),
            Arc::clone(&session_key),
            Arc::clone(&transcript),
            Arc::clone(&revision),
        ));
        Self {
            gateway,
            requests,
            transcript,
            revision,
            session_key,
            bound: None,
            pump,
            history,
        }
    }

    #[must_use]
    pub fn with_session_key(self, key: impl Into<String>) -> Self {
        *lock(&self.session_key) = key.into();
        self
    }

    /// Bind to a resource. A different resource starts with an empty transcript.
    pub fn activate(&mut self, target: impl Into<StreamTarget>) {
        let target = target.into();
        if self.bound.as_ref() != Some(&target) {
            self.transcript().reset(Vec::new());
            self.bump();
            self.bound = Some(target.clone());
        }
        self.gateway.activate(target);
    }

    /// Close the connection. The transcript stays with the bound resource.
    pub fn deactivate(&mut self) {
        self.gateway.deactivate();
    }

    pub fn set_connectable(&mut self, connectable: bool) {
        self.gateway.set_connectable(connectable);
    }

    pub fn reconnect(&self) {
        self.gateway.reconnect();
    }

    /// Replace the transcript with the gateway's stored history.
    ///
    /// # Errors
    /// See [`GatewayHandle::request`].
    pub async fn load_history(&self) -> Result<(), GatewayError> {
        let key = self.session_key();
        let messages = self.requests.chat_history(&key).await?;
        self.transcript().reset(messages);
        self.bump();
        Ok(())
    }

    /// Record the user's turn and start a run. Returns the run id.
    ///
    /// # Errors
    /// See [`GatewayHandle::request`]; the user's turn stays in the transcript.
    pub async fn send(&self, message: &str) -> Result<String, GatewayError> {
        self.transcript().push_user(message);
        self.bump();
        let key = self.session_key();
        let ack = self.requests.send_chat(&key, message).await?;
        Ok(ack.run_id)
    }

    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.transcript().messages().to_vec()
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.transcript().streaming_run().is_some()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.transcript().last_error().map(str::to_owned)
    }

    #[must_use]
    pub fn session_key(&self) -> String {
        lock(&self.session_key).clone()
    }

    /// Resource the transcript belongs to.
    #[must_use]
    pub const fn bound(&self) -> Option<&StreamTarget> {
        self.bound.as_ref()
    }

    /// Ticks whenever the transcript changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.gateway.status()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.gateway.status().target.is_some()
    }

    #[must_use]
    pub const fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    fn transcript(&self) -> MutexGuard<'_, ChatTranscript> {
        lock(&self.transcript)
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

impl Drop for ChatPanel {
    fn drop(&mut self) {
        self.pump.abort();
        self.history.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn fold_events(
    mut events: broadcast::Receiver<GatewayEvent>,
    transcript: Transcript,
    revision: Arc<watch::Sender<u64>>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Chat events dropped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if lock(&transcript).apply(&event) {
            revision.send_modify(|r| *r += 1);
        }
    }
}

/// Fetch `chat.history` each time the gateway comes up.
async fn reload_on_connect(
    mut status: watch::Receiver<StreamStatus>,
    requests: GatewayHandle,
    session_key: SessionKey,
    transcript: Transcript,
    revision: Arc<watch::Sender<u64>>,
) {
    let mut was_connected = false;
    let mut loaded_epoch = None;
    loop {
        let (connected, epoch) = {
            let current = status.borrow_and_update();
            (current.state == ConnectionState::Connected, current.epoch())
        };
        if connected && (!was_connected || loaded_epoch != Some(epoch)) {
            loaded_epoch = Some(epoch);
            let key = lock(&session_key).clone();
            match requests.chat_history(&key).await {
                // A switch while loading makes the history stale.
                Ok(messages) if status.borrow().epoch() == epoch => {
                    lock(&transcript).reset(messages);
                    revision.send_modify(|r| *r += 1);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Chat history load failed: {e}"),
            }
        }
        was_connected = connected;
        if status.changed().await.is_err() {
            break;
        }
    }
}

//! A resource's live log: stream client feeding a bounded buffer.

use std::sync::{Arc, Mutex, PoisonError};

use claw_core::{ClientConfig, LogBuffer, StreamTarget, TokenIssuer};
use claw_transport::{
    Connector, EndpointTemplate, LogEntry, StreamClient, StreamConfig, StreamMessage, StreamStatus,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

/// Prefix for error envelopes shown in the buffer.
pub const ERROR_PREFIX: &str = "[error] ";

/// Resource the panel is bound to and the stream activation serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    target: StreamTarget,
    epoch: u64,
}

type Current = Arc<Mutex<Option<Binding>>>;

/// Log viewer state for whichever resource is currently bound.
pub struct LogPanel {
    client: StreamClient,
    buffer: Arc<LogBuffer>,
    container_status: Arc<watch::Sender<Option<String>>>,
    current: Current,
    pump: JoinHandle<()>,
}

impl LogPanel {
    /// Panel streaming from the configured log endpoint.
    #[must_use]
    pub fn new(config: &ClientConfig, issuer: Arc<dyn TokenIssuer>, connector: Arc<dyn Connector>) -> Self {
        Self::with_stream(
            StreamConfig::logs(EndpointTemplate::log_stream(config)),
            config.log_buffer_cap,
            issuer,
            connector,
        )
    }

    #[must_use]
    pub fn with_stream(
        stream: StreamConfig,
        cap: usize,
        issuer: Arc<dyn TokenIssuer>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<StreamMessage>();
        let buffer = Arc::new(LogBuffer::new(cap));
        let (container_status, _) = watch::channel(None);
        let container_status = Arc::new(container_status);
        let current = Current::default();
        let pump = tokio::spawn(pump(
            rx,
            Arc::clone(&buffer),
            Arc::clone(&container_status),
            Arc::clone(&current),
        ));
        Self {
            client: StreamClient::new(stream, issuer, connector, tx),
            buffer,
            container_status,
            current,
            pump,
        }
    }

    /// Bind to `target`. Switching resources starts from an empty buffer.
    pub fn activate(&mut self, target: impl Into<StreamTarget>) {
        let target = target.into();
        // Held until the new epoch is recorded.
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().map(|b| &b.target) != Some(&target) {
            self.buffer.clear();
            self.container_status.send_replace(None);
        }
        self.client.activate(target.clone());
        *current = Some(Binding {
            target,
            epoch: self.client.status().epoch(),
        });
    }

    /// Unbind; the buffer keeps its lines until the next resource.
    pub fn deactivate(&mut self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.client.deactivate();
    }

    pub fn set_connectable(&mut self, connectable: bool) {
        self.client.set_connectable(connectable);
    }

    pub fn reconnect(&self) {
        self.client.reconnect();
    }

    #[must_use]
    pub const fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.buffer.snapshot()
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.client.status()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<StreamStatus> {
        self.client.subscribe_status()
    }

    /// Container state last reported by the stream (`running`, `exited`, ...).
    #[must_use]
    pub fn container_status(&self) -> Option<String> {
        self.container_status.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_container_status(&self) -> watch::Receiver<Option<String>> {
        self.container_status.subscribe()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.client.is_active()
    }
}

impl Drop for LogPanel {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump(
    mut rx: mpsc::UnboundedReceiver<StreamMessage>,
    buffer: Arc<LogBuffer>,
    container_status: Arc<watch::Sender<Option<String>>>,
    current: Current,
) {
    while let Some(msg) = rx.recv().await {
        let binding = current.lock().unwrap_or_else(PoisonError::into_inner);
        if binding.as_ref().map(|b| b.epoch) != Some(msg.epoch) {
            continue;
        }
        match LogEntry::from_payload(msg.payload) {
            LogEntry::Line(line) | LogEntry::Raw(line) => buffer.push(line),
            LogEntry::Error(detail) => buffer.push(format!("{ERROR_PREFIX}{detail}")),
            LogEntry::Status(status) => {
                tracing::debug!(resource_id = %msg.target.id, status = %status, "Container status");
                container_status.send_replace(Some(status));
            }
        }
        drop(binding);
    }
}

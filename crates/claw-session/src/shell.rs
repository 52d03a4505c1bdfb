//! Interactive terminal on a resource's shell subdomain.

use std::sync::Arc;

use bytes::Bytes;
use claw_core::{StreamTarget, TokenIssuer};
use claw_transport::{
    Connector, EndpointTemplate, Frame, Payload, StreamClient, StreamConfig, StreamMessage,
    StreamStatus, TransportError,
};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};

/// Raw terminal bytes in both directions.
pub struct ShellPanel {
    client: StreamClient,
    output: broadcast::Sender<Bytes>,
    pump: JoinHandle<()>,
}

impl ShellPanel {
    #[must_use]
    pub fn new(issuer: Arc<dyn TokenIssuer>, connector: Arc<dyn Connector>) -> Self {
        Self::with_stream(StreamConfig::shell(EndpointTemplate::shell()), issuer, connector)
    }

    #[must_use]
    pub fn with_stream(
        stream: StreamConfig,
        issuer: Arc<dyn TokenIssuer>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamMessage>();
        let (output, _) = broadcast::channel(1024);
        let sink = output.clone();
        let pump = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let bytes = match msg.payload {
                    Payload::Binary(data) => data,
                    Payload::Text(text) => Bytes::from(text),
                    Payload::Json(value) => Bytes::from(value.to_string()),
                };
                // No terminal attached is fine.
                let _ = sink.send(bytes);
            }
        });
        Self {
            client: StreamClient::new(stream, issuer, connector, tx),
            output,
            pump,
        }
    }

    pub fn activate(&mut self, target: impl Into<StreamTarget>) {
        self.client.activate(target);
    }

    pub fn deactivate(&mut self) {
        self.client.deactivate();
    }

    pub fn set_connectable(&mut self, connectable: bool) {
        self.client.set_connectable(connectable);
    }

    pub fn reconnect(&self) {
        self.client.reconnect();
    }

    /// Send keystrokes.
    ///
    /// # Errors
    /// Returns `NotConnected` unless the shell is connected.
    pub fn write(&self, input: impl Into<String>) -> Result<(), TransportError> {
        self.client.send(Frame::Text(input.into()))
    }

    /// Terminal output from now on.
    #[must_use]
    pub fn subscribe_output(&self) -> broadcast::Receiver<Bytes> {
        self.output.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.client.status()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<StreamStatus> {
        self.client.subscribe_status()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.client.is_active()
    }
}

impl Drop for ShellPanel {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use claw_core::ConnectionState;
    use claw_transport::{
        TokenPlacement,
        mock::{MockConnector, MockIssuer, MockServer},
    };
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    fn panel() -> (ShellPanel, UnboundedReceiver<MockServer>) {
        let (connector, servers) = MockConnector::new();
        let endpoint = EndpointTemplate::new("ws://shell.test/{id}", TokenPlacement::Query("t".into()));
        let panel = ShellPanel::with_stream(
            StreamConfig::shell(endpoint),
            Arc::new(MockIssuer::new()),
            Arc::new(connector),
        );
        (panel, servers)
    }

    async fn connected(panel: &ShellPanel) {
        let mut status = panel.subscribe_status();
        while status.borrow_and_update().state != ConnectionState::Connected {
            status.changed().await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn output_bytes_pass_through_untouched() {
        let (mut panel, mut servers) = panel();
        let mut output = panel.subscribe_output();
        panel.activate("a1");
        let server = servers.recv().await.unwrap();

        server.send(Frame::binary(&b"\x1b[32mok\x1b[0m\r\n"[..]));
        server.send_text(r#"{"event":"log"}"#);
        assert_eq!(output.recv().await.unwrap(), Bytes::from_static(b"\x1b[32mok\x1b[0m\r\n"));
        assert_eq!(output.recv().await.unwrap(), Bytes::from_static(br#"{"event":"log"}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn write_needs_a_connection() {
        let (mut panel, mut servers) = panel();
        assert_eq!(panel.write("ls\n"), Err(TransportError::NotConnected));

        panel.activate("a1");
        let mut server = servers.recv().await.unwrap();
        connected(&panel).await;
        panel.write("ls\n").unwrap();
        assert_eq!(server.recv().await, Some(Frame::text("ls\n")));

        panel.deactivate();
        assert!(!panel.is_active());
        assert_eq!(panel.write("pwd\n"), Err(TransportError::NotConnected));
        assert_eq!(panel.status().state, ConnectionState::Disconnected);
    }
}

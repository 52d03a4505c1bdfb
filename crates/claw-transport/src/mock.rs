//! In-memory connector and token issuer for tests.
//!
//! Every successful `connect` hands the test a [`MockServer`] playing the
//! remote end of that connection.

use std::{
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use claw_core::{AccessToken, IssueError, StreamTarget, TokenIssuer};
use tokio::{sync::mpsc, time::Instant};

use crate::connection::{BoxConnection, ConnectTarget, Connection, Connector, Frame, TransportError};

/// Issues `tok-1`, `tok-2`, ... and can be told to fail.
#[derive(Debug, Default)]
pub struct MockIssuer {
    issued: AtomicUsize,
    failures: AtomicUsize,
    targets: Mutex<Vec<StreamTarget>>,
    ws_url: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockIssuer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` requests.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Attach a server-supplied URL to every token.
    pub fn set_ws_url(&self, url: impl Into<String>) {
        *self.ws_url.lock().unwrap_or_else(PoisonError::into_inner) = Some(url.into());
    }

    /// Take `delay` (tokio clock) to answer every request.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// Requests started so far, including failed and abandoned ones.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn targets(&self) -> Vec<StreamTarget> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TokenIssuer for MockIssuer {
    async fn issue(&self, target: &StreamTarget) -> Result<AccessToken, IssueError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target.clone());
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(IssueError::Transport("token service down".to_owned()));
        }
        let mut token = AccessToken::new(format!("tok-{n}"));
        if let Some(url) = self
            .ws_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            token = token.with_ws_url(url);
        }
        Ok(token)
    }
}

/// Remote end of one mock connection.
pub struct MockServer {
    pub target: ConnectTarget,
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MockServer {
    pub fn send(&self, frame: Frame) {
        let _ = self.to_client.send(frame);
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send(Frame::Text(text.into()));
    }

    /// Next frame from the client; `None` once the client has closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Drop the connection from the server side.
    pub fn close(self) {}
}

/// Connector that records attempts and hands out [`MockServer`]s.
pub struct MockConnector {
    refuse: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
    servers: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        (
            Self {
                refuse: AtomicBool::new(false),
                attempts: Mutex::new(Vec::new()),
                servers,
            },
            rx,
        )
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempt_times().len()
    }

    /// When each connect attempt happened (tokio clock).
    #[must_use]
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<BoxConnection, TransportError> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_owned()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let server = MockServer {
            target: target.clone(),
            to_client,
            from_client,
        };
        self.servers
            .send(server)
            .map_err(|_| TransportError::Connect("mock server gone".to_owned()))?;
        Ok(Box::new(MockConnection {
            inbound,
            outbound: Some(outbound),
        }))
    }
}

struct MockConnection {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::NotConnected)?
            .send(frame)
            .map_err(|_| TransportError::Io("peer gone".to_owned()))
    }

    async fn close(&mut self) {
        self.outbound = None;
        self.inbound.close();
    }
}

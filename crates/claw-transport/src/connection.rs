//! Connection seam between the stream client and a concrete socket.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }
}

/// Transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Connect timed out")]
    ConnectTimeout,
    #[error("Connection error: {0}")]
    Io(String),
    #[error("Not connected")]
    NotConnected,
}

/// Fully resolved connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub url: Url,
    /// `(name, value)` pairs sent in the handshake `Cookie` header.
    pub cookies: Vec<(String, String)>,
}

impl ConnectTarget {
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self {
            url,
            cookies: Vec::new(),
        }
    }

    /// `Cookie` header value, if any cookies are attached.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// An open bidirectional stream.
#[async_trait]
pub trait Connection: Send {
    /// Next frame; `None` once the peer has closed.
    ///
    /// Must be cancel safe: the client polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Best-effort graceful close.
    async fn close(&mut self);
}

pub type BoxConnection = Box<dyn Connection>;

/// Opens connections for a stream client.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ConnectTarget) -> Result<BoxConnection, TransportError>;
}

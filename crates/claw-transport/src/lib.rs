//! Stream transport for the claw console.
//!
//! Provides:
//! - [`StreamClient`]: one reconnecting stream per active resource
//! - Endpoint templates and token placement
//! - Log envelope and gateway wire protocols
//! - [`GatewayClient`]: request/response and chat events over the gateway
//! - WebSocket connector (feature: websocket)
//! - In-memory test doubles (feature: mock)

pub mod client;
pub mod connection;
pub mod endpoint;
pub mod gateway;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use client::{StreamClient, StreamConfig, StreamMessage, StreamSender, StreamStatus};
pub use connection::{BoxConnection, ConnectTarget, Connection, Connector, Frame, TransportError};
pub use endpoint::{EndpointTemplate, TokenPlacement};
pub use gateway::{ChatAck, ChatTranscript, GatewayClient, GatewayError, GatewayHandle};
pub use protocol::{GatewayEvent, LogEntry, ParseMode, Payload};
#[cfg(feature = "websocket")]
pub use websocket::WsConnector;

//! Core abstractions for claw console streams.
//!
//! This crate provides the framework-independent building blocks:
//! - `StreamSession` - Reconnect state machine driven by a reducer
//! - `RetryPolicy` - Fixed or capped exponential reconnect delays
//! - `LogBuffer` - Bounded log lines with live broadcast
//! - `ClientConfig` - Explicit base URLs and tunables
//! - Token issuer and resource source traits

pub mod config;
pub mod log_buffer;
pub mod retry;
pub mod selection;
pub mod session;
pub mod target;
pub mod traits;

pub use config::{ClientConfig, ConfigError};
pub use log_buffer::LogBuffer;
pub use retry::RetryPolicy;
pub use selection::reconcile_selection;
pub use session::{ConnectionState, Phase, SessionAction, SessionEvent, StreamSession};
pub use target::{AccessToken, StreamTarget, token_cookie_name};
pub use traits::{IssueError, Resource, ResourceSource, SourceError, TokenIssuer};

//! REST client for the claw backend.
//!
//! Provides:
//! - [`ApiClient`] with agents, jobs, account and login endpoints
//! - Token issuers for stream sessions
//! - Subdomain cookies for cross-origin resource access
//! - Agent and job listings for pollers

pub mod agents;
pub mod auth;
pub mod billing;
pub mod client;
pub mod cookies;
pub mod error;
pub mod jobs;
pub mod sources;
pub mod tokens;

pub use agents::{Agent, AgentFile, AgentSpec, AgentState};
pub use auth::{Session, WalletChallenge};
pub use billing::{Balance, Transaction, TransactionPage, User};
pub use client::{ApiClient, Credential};
pub use cookies::{AUTH_TOKEN_COOKIE, REEF_TOKEN_COOKIE, SameSite, SessionCookie, resource_cookies};
pub use error::ApiError;
pub use jobs::{Job, JobSpec, JobState, PortMapping};
pub use sources::{AgentSource, JobSource};
pub use tokens::{ApiTokenIssuer, CookieIssuer, CookieSink, MemoryCookieJar, TokenScope};

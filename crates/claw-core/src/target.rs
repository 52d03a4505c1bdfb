//! Stream targets and the short-lived credentials that unlock them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The resource a stream session is bound to.
///
/// `id` is opaque. `hostname` is only known for resources that expose
/// their own subdomain (shell, desktop, gateway).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamTarget {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl StreamTarget {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hostname: None,
        }
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}

impl From<&str> for StreamTarget {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StreamTarget {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hostname {
            Some(host) => write!(f, "{} ({host})", self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// Resource-scoped credential, issued right before a connection is opened.
///
/// Never cached across resources; every activation asks for a fresh one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Server-supplied connection URL; takes precedence over any template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
}

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
            ws_url: None,
        }
    }

    #[must_use]
    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    /// Tokens without an expiry never report as expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

// Keep the secret out of logs.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("ws_url", &self.ws_url)
            .finish()
    }
}

/// Cookie name that carries a token for `host`: `{first label}-token`.
///
/// `atlas.agents.example.com` gives `atlas-token`, and the shell host
/// `shell-atlas.agents.example.com` gives `shell-atlas-token`.
#[must_use]
pub fn token_cookie_name(host: &str) -> String {
    let label = host.split('.').next().unwrap_or(host);
    format!("{label}-token")
}

//! Seams to the backend: token issuance and resource listing.

use async_trait::async_trait;
use thiserror::Error;

use crate::{AccessToken, StreamTarget};

/// Token issuance error.
///
/// Issuers never retry; the stream client's backoff decides what happens next.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IssueError {
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("Token request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("Token request failed: {0}")]
    Transport(String),
}

/// Exchanges the long-lived session credential for a resource-scoped token.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Issue a token for `target`. Called once per connection attempt.
    async fn issue(&self, target: &StreamTarget) -> Result<AccessToken, IssueError>;
}

/// An entity owned by the backend that a page can select and stream from.
pub trait Resource: Send + Sync {
    fn id(&self) -> &str;

    /// Subdomain host for shell/desktop/gateway access, when the resource has one.
    fn hostname(&self) -> Option<&str> {
        None
    }

    /// Whether the lifecycle state allows opening streams (e.g. agent running).
    fn is_connectable(&self) -> bool {
        true
    }

    /// Target for stream sessions bound to this resource.
    fn stream_target(&self) -> StreamTarget {
        let target = StreamTarget::new(self.id());
        match self.hostname() {
            Some(host) => target.with_hostname(host),
            None => target,
        }
    }
}

/// Resource listing error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("List request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("List request failed: {0}")]
    Transport(String),
}

/// Something that can fetch the full current list of resources.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    type Item: Resource + Clone + 'static;

    /// Fetch the whole list; callers replace their copy wholesale.
    async fn list(&self) -> Result<Vec<Self::Item>, SourceError>;
}

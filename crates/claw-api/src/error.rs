use claw_core::{IssueError, SourceError};
use serde::Deserialize;
use thiserror::Error;

/// REST client error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not authenticated")]
    Unauthenticated,
    /// Non-success response; `detail` is the backend's message verbatim.
    #[error("{detail}")]
    Rejected { status: u16, detail: String },
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status, if the backend answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated) || self.status() == Some(401)
    }

    /// Build from an error response body.
    ///
    /// FastAPI style bodies carry `detail` either as a string or as a list of
    /// `{msg}` validation items; anything else falls back to the raw body.
    pub(crate) fn from_body(status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Detail {
            Text(String),
            Items(Vec<DetailItem>),
        }
        #[derive(Deserialize)]
        struct DetailItem {
            msg: String,
        }
        #[derive(Deserialize)]
        struct Body {
            detail: Detail,
        }

        let detail = match serde_json::from_str::<Body>(body) {
            Ok(Body {
                detail: Detail::Text(text),
            }) => text,
            Ok(Body {
                detail: Detail::Items(items),
            }) => items
                .into_iter()
                .map(|item| item.msg)
                .collect::<Vec<_>>()
                .join("; "),
            Err(_) if body.trim().is_empty() => format!("HTTP {status}"),
            Err(_) => body.trim().to_owned(),
        };
        Self::Rejected { status, detail }
    }
}

impl From<ApiError> for IssueError {
    fn from(err: ApiError) -> Self {
        if err.is_unauthenticated() {
            return Self::Unauthenticated;
        }
        match err {
            ApiError::Rejected { status, detail } => Self::Rejected { status, detail },
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<ApiError> for SourceError {
    fn from(err: ApiError) -> Self {
        if err.is_unauthenticated() {
            return Self::Unauthenticated;
        }
        match err {
            ApiError::Rejected { status, detail } => Self::Rejected { status, detail },
            other => Self::Transport(other.to_string()),
        }
    }
}

//! `/agents` endpoints.

use chrono::{DateTime, Utc};
use claw_core::{AccessToken, Resource};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ApiClient, ApiError};

/// Agent lifecycle state as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    #[serde(other)]
    Unknown,
}

impl AgentState {
    /// Streams are only worth (re)opening while the agent is up or coming up.
    #[must_use]
    pub const fn is_connectable(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub state: AgentState,
    /// Subdomain host serving the agent's shell and gateway.
    #[serde(default, alias = "subdomain")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Backend-specific extras passed through untouched.
    #[serde(default)]
    pub meta: Value,
}

impl Resource for Agent {
    fn id(&self) -> &str {
        &self.id
    }

    fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    fn is_connectable(&self) -> bool {
        self.state.is_connectable()
    }
}

/// Body for creating or updating an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

impl AgentSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Entry in an agent's workspace listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFile {
    pub path: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Wrapped { items: Vec<T> },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Bare(items) | Self::Wrapped { items } => items,
        }
    }
}

pub(crate) fn agent_path(id: &str, rest: &str) -> String {
    format!("/agents/{}{rest}", urlencoding::encode(id))
}

impl ApiClient {
    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn list_agents(&self) -> Result<Vec<Agent>, ApiError> {
        self.get::<Listing<Agent>>("/agents").await.map(Listing::into_vec)
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn create_agent(&self, spec: &AgentSpec) -> Result<Agent, ApiError> {
        self.send_json(Method::POST, "/agents", spec).await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn update_agent(&self, id: &str, spec: &AgentSpec) -> Result<Agent, ApiError> {
        self.send_json(Method::PUT, &agent_path(id, ""), spec).await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn delete_agent(&self, id: &str) -> Result<(), ApiError> {
        self.execute(self.authed(Method::DELETE, &agent_path(id, ""))?)
            .await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn start_agent(&self, id: &str) -> Result<(), ApiError> {
        tracing::info!(resource_id = id, "Starting agent");
        self.execute(self.authed(Method::POST, &agent_path(id, "/start"))?)
            .await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn stop_agent(&self, id: &str) -> Result<(), ApiError> {
        tracing::info!(resource_id = id, "Stopping agent");
        self.execute(self.authed(Method::POST, &agent_path(id, "/stop"))?)
            .await
    }

    /// Short-lived token for the agent's log stream.
    ///
    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn agent_log_token(&self, id: &str) -> Result<AccessToken, ApiError> {
        self.post_token(&agent_path(id, "/logs/token")).await
    }

    /// Short-lived token for the agent's own subdomain (shell, gateway).
    ///
    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn agent_token(&self, id: &str) -> Result<AccessToken, ApiError> {
        self.post_token(&agent_path(id, "/token")).await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn list_agent_files(&self, id: &str) -> Result<Vec<AgentFile>, ApiError> {
        self.get::<Listing<AgentFile>>(&agent_path(id, "/files"))
            .await
            .map(Listing::into_vec)
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn read_agent_file(&self, id: &str, path: &str) -> Result<String, ApiError> {
        let builder = self.authed(Method::GET, &file_path(id, path))?;
        let response = crate::client::check(builder.send().await?).await?;
        Ok(response.text().await?)
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn write_agent_file(&self, id: &str, path: &str, content: &str) -> Result<(), ApiError> {
        let builder = self
            .authed(Method::PUT, &file_path(id, path))?
            .json(&serde_json::json!({ "content": content }));
        self.execute(builder).await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn delete_agent_file(&self, id: &str, path: &str) -> Result<(), ApiError> {
        self.execute(self.authed(Method::DELETE, &file_path(id, path))?)
            .await
    }
}

fn file_path(id: &str, path: &str) -> String {
    let encoded: Vec<_> = path
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    agent_path(id, &format!("/files/{}", encoded.join("/")))
}

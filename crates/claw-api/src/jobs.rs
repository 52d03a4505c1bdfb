//! `/jobs` endpoints.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use claw_core::{AccessToken, Resource};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{ApiClient, ApiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl JobState {
    #[must_use]
    pub const fn is_connectable(self) -> bool {
        matches!(self, Self::Provisioning | Self::Running)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }
}

/// A port the job exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Public URL assigned by the backend once the job is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl PortMapping {
    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self {
            port,
            protocol: None,
            url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub state: JobState,
    /// Container image or runtime identifier.
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default, alias = "subdomain")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Resource for Job {
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

/// Launch or update request for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub runtime: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env_vars: BTreeMap<String, String>,
}

impl JobSpec {
    #[must_use]
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.ports.push(PortMapping::new(port));
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }
}

fn job_path(id: &str, rest: &str) -> String {
    format!("/jobs/{}{rest}", urlencoding::encode(id))
}

impl ApiClient {
    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn list_jobs(&self) -> Result<Vec<Job>, ApiError> {
        self.get("/jobs").await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn get_job(&self, id: &str) -> Result<Job, ApiError> {
        self.get(&job_path(id, "")).await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn create_job(&self, spec: &JobSpec) -> Result<Job, ApiError> {
        tracing::info!(runtime = %spec.runtime, "Launching job");
        self.send_json(Method::POST, "/jobs", spec).await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn update_job(&self, id: &str, spec: &JobSpec) -> Result<Job, ApiError> {
        self.send_json(Method::PUT, &job_path(id, ""), spec).await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn delete_job(&self, id: &str) -> Result<(), ApiError> {
        self.execute(self.authed(Method::DELETE, &job_path(id, ""))?)
            .await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn start_job(&self, id: &str) -> Result<(), ApiError> {
        self.execute(self.authed(Method::POST, &job_path(id, "/start"))?)
            .await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn stop_job(&self, id: &str) -> Result<(), ApiError> {
        self.execute(self.authed(Method::POST, &job_path(id, "/stop"))?)
            .await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn job_log_token(&self, id: &str) -> Result<AccessToken, ApiError> {
        self.post_token(&job_path(id, "/logs/token")).await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn job_token(&self, id: &str) -> Result<AccessToken, ApiError> {
        self.post_token(&job_path(id, "/token")).await
    }
}

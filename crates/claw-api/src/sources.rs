//! Resource listings for pollers.

use async_trait::async_trait;
use claw_core::{ResourceSource, SourceError};

use crate::{ApiClient, agents::Agent, jobs::Job};

/// `GET /agents` as a [`ResourceSource`].
#[derive(Debug, Clone)]
pub struct AgentSource(pub ApiClient);

#[async_trait]
impl ResourceSource for AgentSource {
    type Item = Agent;

    async fn list(&self) -> Result<Vec<Agent>, SourceError> {
        Ok(self.0.list_agents().await?)
    }
}

/// `GET /jobs` as a [`ResourceSource`].
#[derive(Debug, Clone)]
pub struct JobSource(pub ApiClient);

#[async_trait]
impl ResourceSource for JobSource {
    type Item = Job;

    async fn list(&self) -> Result<Vec<Job>, SourceError> {
        Ok(self.0.list_jobs().await?)
    }
}

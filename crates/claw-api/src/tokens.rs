//! Token issuers backed by the REST API.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use claw_core::{AccessToken, ClientConfig, IssueError, StreamTarget, TokenIssuer};
use reqwest::Method;
use serde::Deserialize;

use crate::{
    ApiClient, ApiError,
    cookies::{SessionCookie, resource_cookies},
};

/// Body returned by every `.../token` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(alias = "ws_token", alias = "access_token")]
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    /// Lifetime in seconds, for backends that do not send a timestamp.
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    ws_url: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_access_token(self) -> AccessToken {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)));
        let mut token = AccessToken::new(self.token);
        if let Some(expires_at) = expires_at {
            token = token.expiring_at(expires_at);
        }
        if let Some(ws_url) = self.ws_url {
            token = token.with_ws_url(ws_url);
        }
        token
    }
}

impl ApiClient {
    pub(crate) async fn post_token(&self, path: &str) -> Result<AccessToken, ApiError> {
        self.send_json::<_, TokenResponse>(Method::POST, path, &serde_json::Map::new())
            .await
            .map(TokenResponse::into_access_token)
    }
}

/// Which token endpoint an issuer calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScope {
    /// `POST /agents/{id}/logs/token`
    AgentLogs,
    /// `POST /agents/{id}/token`
    Agent,
    /// `POST /jobs/{id}/logs/token`
    JobLogs,
    /// `POST /jobs/{id}/token`
    Job,
}

/// Issues tokens by calling the backend. Never retries.
#[derive(Debug, Clone)]
pub struct ApiTokenIssuer {
    api: ApiClient,
    scope: TokenScope,
}

impl ApiTokenIssuer {
    #[must_use]
    pub const fn new(api: ApiClient, scope: TokenScope) -> Self {
        Self { api, scope }
    }

    #[must_use]
    pub const fn scope(&self) -> TokenScope {
        self.scope
    }
}

#[async_trait]
impl TokenIssuer for ApiTokenIssuer {
    async fn issue(&self, target: &StreamTarget) -> Result<AccessToken, IssueError> {
        let id = target.id.as_str();
        let result = match self.scope {
            TokenScope::AgentLogs => self.api.agent_log_token(id).await,
            TokenScope::Agent => self.api.agent_token(id).await,
            TokenScope::JobLogs => self.api.job_log_token(id).await,
            TokenScope::Job => self.api.job_token(id).await,
        };
        result.map_err(|e| {
            tracing::warn!(resource_id = id, scope = ?self.scope, "Token issuance failed: {e}");
            IssueError::from(e)
        })
    }
}

/// Where issued cookies go (a browser jar, a webview, a proxy).
pub trait CookieSink: Send + Sync {
    fn set(&self, cookie: SessionCookie);
}

/// Cookie sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<Vec<SessionCookie>>,
}

impl MemoryCookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn cookies(&self) -> Vec<SessionCookie> {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<SessionCookie> {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }
}

impl CookieSink for MemoryCookieJar {
    fn set(&self, cookie: SessionCookie) {
        let mut cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        cookies.retain(|c| c.name != cookie.name);
        cookies.push(cookie);
    }
}

/// Wraps an issuer and also writes each token into the resource's
/// subdomain cookies, so a cross-origin tab or iframe can load it.
pub struct CookieIssuer {
    inner: Arc<dyn TokenIssuer>,
    sink: Arc<dyn CookieSink>,
    config: ClientConfig,
}

impl CookieIssuer {
    #[must_use]
    pub fn new(inner: Arc<dyn TokenIssuer>, sink: Arc<dyn CookieSink>, config: ClientConfig) -> Self {
        Self { inner, sink, config }
    }
}

#[async_trait]
impl TokenIssuer for CookieIssuer {
    async fn issue(&self, target: &StreamTarget) -> Result<AccessToken, IssueError> {
        let token = self.inner.issue(target).await?;
        match target.hostname.as_deref() {
            Some(host) => {
                for cookie in resource_cookies(host, &token, &self.config) {
                    self.sink.set(cookie);
                }
            }
            None => tracing::debug!(resource_id = %target.id, "No hostname; skipping cookies"),
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl TokenIssuer for Fixed {
        async fn issue(&self, _target: &StreamTarget) -> Result<AccessToken, IssueError> {
            Ok(AccessToken::new("t0k"))
        }
    }

    #[test]
    fn token_response_variants() {
        let token = serde_json::from_str::<TokenResponse>(
            r#"{"ws_token":"abc","expires_at":"2026-01-01T00:00:00Z","ws_url":"wss://logs.example.com/x"}"#,
        )
        .unwrap()
        .into_access_token();
        assert_eq!(token.token, "abc");
        assert_eq!(token.ws_url.as_deref(), Some("wss://logs.example.com/x"));
        assert!(token.expires_at.is_some());

        let before = Utc::now();
        let token = serde_json::from_str::<TokenResponse>(r#"{"token":"abc","expires_in":300}"#)
            .unwrap()
            .into_access_token();
        let expires = token.expires_at.unwrap();
        assert!(expires >= before + Duration::seconds(300));
        assert!(token.ws_url.is_none());
    }

    #[tokio::test]
    async fn cookie_issuer_writes_subdomain_cookies() {
        let jar = Arc::new(MemoryCookieJar::new());
        let config = ClientConfig::parse("https://api.example.com")
            .unwrap()
            .with_cookie_domain(".example.com");
        let issuer = CookieIssuer::new(Arc::new(Fixed), Arc::clone(&jar) as Arc<dyn CookieSink>, config);

        issuer.issue(&StreamTarget::new("a1")).await.unwrap();
        assert!(jar.cookies().is_empty());

        let target = StreamTarget::new("a1").with_hostname("atlas.agents.example.com");
        issuer.issue(&target).await.unwrap();
        issuer.issue(&target).await.unwrap();
        assert_eq!(jar.cookies().len(), 2);
        let shell = jar.get("shell-atlas-token").unwrap();
        assert_eq!(shell.value, "t0k");
        assert_eq!(shell.domain.as_deref(), Some(".example.com"));
    }
}

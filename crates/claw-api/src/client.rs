//! HTTP plumbing shared by every endpoint group.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use claw_core::ClientConfig;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use url::Url;

use crate::error::ApiError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The long-lived session credential, shared between clones of a client.
///
/// Set by a successful login, or seeded from an `auth_token` cookie.
#[derive(Clone, Default)]
pub struct Credential(Arc<RwLock<Option<String>>>);

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        let credential = Self::default();
        credential.set(token);
        credential
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Credential")
            .field(&if self.is_set() { "<set>" } else { "<none>" })
            .finish()
    }
}

/// Client for the backend REST API.
///
/// Cheap to clone; clones share the connection pool and the credential.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    credential: Credential,
}

impl ApiClient {
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig, credential: Credential) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_http(http, config.api_base.clone(), credential))
    }

    #[must_use]
    pub fn with_http(http: reqwest::Client, base: Url, credential: Credential) -> Self {
        Self {
            http,
            base,
            credential,
        }
    }

    #[must_use]
    pub const fn credential(&self) -> &Credential {
        &self.credential
    }

    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    /// Join `path` onto the base, keeping any path prefix the base carries.
    pub(crate) fn url(&self, path: &str) -> Result<Url, ApiError> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        Ok(base.join(path.trim_start_matches('/'))?)
    }

    fn request(&self, method: Method, path: &str, authed: bool) -> Result<RequestBuilder, ApiError> {
        let builder = self.http.request(method, self.url(path)?);
        if !authed {
            return Ok(builder);
        }
        let token = self.credential.get().ok_or(ApiError::Unauthenticated)?;
        Ok(builder.bearer_auth(token))
    }

    /// Authenticated request builder for `path`.
    pub(crate) fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        self.request(method, path, true)
    }

    /// Unauthenticated request builder (login endpoints).
    pub(crate) fn anonymous(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        self.request(method, path, false)
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        read_json(self.authed(Method::GET, path)?.send().await?).await
    }

    pub(crate) async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        read_json(self.authed(method, path)?.json(body).send().await?).await
    }

    /// Request whose response body is ignored.
    pub(crate) async fn execute(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        check(builder.send().await?).await.map(drop)
    }
}

/// Turn non-success responses into [`ApiError::Rejected`].
pub(crate) async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(status = status.as_u16(), "Request rejected: {body}");
    if status == StatusCode::UNAUTHORIZED && body.trim().is_empty() {
        return Err(ApiError::Unauthenticated);
    }
    Err(ApiError::from_body(status.as_u16(), &body))
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let response = check(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

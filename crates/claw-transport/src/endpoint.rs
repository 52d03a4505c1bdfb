//! Endpoint templates: turning a target plus token into a connect request.

use claw_core::{AccessToken, ClientConfig, StreamTarget, token_cookie_name};
use url::Url;

use crate::connection::{ConnectTarget, TransportError};

/// Where the access token goes on the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPlacement {
    /// Query parameter, e.g. `ws_token`.
    Query(String),
    /// Cookie named after the target host (`{first-label}-token`).
    Cookie,
}

/// URL template with `{id}` and `{hostname}` placeholders.
///
/// A `ws_url` supplied with the token wins over the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTemplate {
    template: String,
    placement: TokenPlacement,
    extra_query: Vec<(String, String)>,
}

impl EndpointTemplate {
    #[must_use]
    pub fn new(template: impl Into<String>, placement: TokenPlacement) -> Self {
        Self {
            template: template.into(),
            placement,
            extra_query: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_query.push((key.into(), value.into()));
        self
    }

    /// Agent log stream: `{ws_base}/agents/{id}/logs/ws?ws_token=..&tail_lines=..`.
    #[must_use]
    pub fn log_stream(config: &ClientConfig) -> Self {
        Self::resource_logs(config, "agents")
    }

    /// Job log stream: `{ws_base}/jobs/{id}/logs/ws`, same query as agents.
    #[must_use]
    pub fn job_log_stream(config: &ClientConfig) -> Self {
        Self::resource_logs(config, "jobs")
    }

    fn resource_logs(config: &ClientConfig, collection: &str) -> Self {
        let base = config.ws_base();
        let template = format!(
            "{}/{collection}/{{id}}/logs/ws",
            base.as_str().trim_end_matches('/')
        );
        let mut endpoint = Self::new(template, TokenPlacement::Query("ws_token".to_owned()));
        if let Some(container) = &config.log_container {
            endpoint = endpoint.with_query("container", container.clone());
        }
        endpoint.with_query("tail_lines", config.log_tail_lines.to_string())
    }

    /// Terminal stream on the resource's shell subdomain, cookie authenticated.
    #[must_use]
    pub fn shell() -> Self {
        Self::new("wss://shell-{hostname}/shell", TokenPlacement::Cookie)
    }

    /// Gateway event bus on the resource's own host.
    #[must_use]
    pub fn gateway() -> Self {
        Self::new(
            "wss://{hostname}/gateway",
            TokenPlacement::Query("token".to_owned()),
        )
    }

    #[must_use]
    pub const fn placement(&self) -> &TokenPlacement {
        &self.placement
    }

    /// Resolve into a concrete connect request.
    ///
    /// # Errors
    /// Returns error if the template needs a hostname the target lacks, or
    /// the resulting URL does not parse as a WebSocket URL.
    pub fn resolve(
        &self,
        target: &StreamTarget,
        token: &AccessToken,
    ) -> Result<ConnectTarget, TransportError> {
        let raw = match &token.ws_url {
            Some(url) => url.clone(),
            None => self.expand(target)?,
        };
        let mut url = Url::parse(&raw)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{raw}: {e}")))?;
        to_ws_scheme(&mut url)?;

        let mut cookies = Vec::new();
        match &self.placement {
            TokenPlacement::Query(param) => set_query_if_absent(&mut url, param, &token.token),
            TokenPlacement::Cookie => {
                let host = url
                    .host_str()
                    .ok_or_else(|| TransportError::InvalidEndpoint(format!("{url}: no host")))?;
                cookies.push((token_cookie_name(host), token.token.clone()));
            }
        }
        for (key, value) in &self.extra_query {
            set_query_if_absent(&mut url, key, value);
        }

        Ok(ConnectTarget { url, cookies })
    }

    fn expand(&self, target: &StreamTarget) -> Result<String, TransportError> {
        let mut out = self
            .template
            .replace("{id}", &urlencoding::encode(&target.id));
        if out.contains("{hostname}") {
            let host = target.hostname.as_deref().ok_or_else(|| {
                TransportError::InvalidEndpoint(format!("{} has no hostname", target.id))
            })?;
            out = out.replace("{hostname}", host);
        }
        Ok(out)
    }
}

fn to_ws_scheme(url: &mut Url) -> Result<(), TransportError> {
    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(()),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::InvalidEndpoint(url.to_string()))
}

fn set_query_if_absent(url: &mut Url, key: &str, value: &str) {
    if url.query_pairs().any(|(k, _)| k == key) {
        return;
    }
    url.query_pairs_mut().append_pair(key, value);
}

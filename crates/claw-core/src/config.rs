//! Client configuration, injected explicitly at startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::log_buffer::DEFAULT_LOG_LINES;

/// Default refresh interval for resource lists.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Lines the log endpoint replays on connect.
pub const DEFAULT_TAIL_LINES: u32 = 200;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid URL for {field}: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Base URLs and tunables shared by every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// REST API base, e.g. `https://api.example.com`.
    pub api_base: Url,

    /// WebSocket base; derived from `api_base` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_base: Option<Url>,

    /// Parent domain for cross-subdomain cookies, e.g. `.example.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_domain: Option<String>,

    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_tail_lines")]
    pub log_tail_lines: u32,

    #[serde(default = "default_log_cap")]
    pub log_buffer_cap: usize,

    /// Container name passed to the log stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_container: Option<String>,
}

const fn default_poll_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

const fn default_tail_lines() -> u32 {
    DEFAULT_TAIL_LINES
}

const fn default_log_cap() -> usize {
    DEFAULT_LOG_LINES
}

impl ClientConfig {
    #[must_use]
    pub fn new(api_base: Url) -> Self {
        Self {
            api_base,
            ws_base: None,
            cookie_domain: None,
            poll_interval_secs: default_poll_secs(),
            log_tail_lines: DEFAULT_TAIL_LINES,
            log_buffer_cap: DEFAULT_LOG_LINES,
            log_container: None,
        }
    }

    /// Parse `api_base` and build a default config around it.
    ///
    /// # Errors
    /// Returns error if the URL does not parse.
    pub fn parse(api_base: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(api_base).map_err(|source| ConfigError::InvalidUrl {
            field: "api_base",
            source,
        })?;
        Ok(Self::new(url))
    }

    #[must_use]
    pub fn with_ws_base(mut self, ws_base: Url) -> Self {
        self.ws_base = Some(ws_base);
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.cookie_domain = Some(domain.into());
        self
    }

    /// Sub-second remainders round up to the next whole second.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_secs = interval.as_secs() + u64::from(interval.subsec_nanos() > 0);
        self
    }

    #[must_use]
    pub fn with_log_tail_lines(mut self, lines: u32) -> Self {
        self.log_tail_lines = lines;
        self
    }

    #[must_use]
    pub fn with_log_buffer_cap(mut self, cap: usize) -> Self {
        self.log_buffer_cap = cap;
        self
    }

    #[must_use]
    pub fn with_log_container(mut self, container: impl Into<String>) -> Self {
        self.log_container = Some(container.into());
        self
    }

    /// Build from `CLAW_*` environment variables.
    ///
    /// # Errors
    /// Returns error if `CLAW_API_BASE` is unset or any value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup using the `CLAW_*` names.
    ///
    /// # Errors
    /// Returns error if `CLAW_API_BASE` is missing or any value is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base = lookup("CLAW_API_BASE").ok_or(ConfigError::Missing("CLAW_API_BASE"))?;
        let mut config = Self::parse(&api_base)?;

        if let Some(ws) = lookup("CLAW_WS_BASE") {
            config.ws_base = Some(Url::parse(&ws).map_err(|source| ConfigError::InvalidUrl {
                field: "ws_base",
                source,
            })?);
        }
        config.cookie_domain = lookup("CLAW_COOKIE_DOMAIN");
        config.log_container = lookup("CLAW_LOG_CONTAINER");
        if let Some(secs) = lookup("CLAW_POLL_INTERVAL_SECS") {
            config.poll_interval_secs = parse_number("poll_interval_secs", &secs)?;
        }
        if let Some(lines) = lookup("CLAW_LOG_TAIL_LINES") {
            config.log_tail_lines = parse_number("log_tail_lines", &lines)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the clients cannot run with.
    ///
    /// # Errors
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.api_base.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                field: "api_base",
                value: self.api_base.to_string(),
            });
        }
        if let Some(ws) = &self.ws_base {
            if !matches!(ws.scheme(), "ws" | "wss") {
                return Err(ConfigError::InvalidValue {
                    field: "ws_base",
                    value: ws.to_string(),
                });
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_secs",
                value: "0".to_owned(),
            });
        }
        if self.log_buffer_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "log_buffer_cap",
                value: "0".to_owned(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// WebSocket base: explicit, or `api_base` with `http(s)` swapped for `ws(s)`.
    #[must_use]
    pub fn ws_base(&self) -> Url {
        if let Some(ws) = &self.ws_base {
            return ws.clone();
        }
        let mut url = self.api_base.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http -> ws and https -> wss are both special-to-special swaps.
        let _ = url.set_scheme(scheme);
        url
    }

    /// Whether cookies for this deployment need `Secure`.
    #[must_use]
    pub fn is_secure_origin(&self) -> bool {
        self.api_base.scheme() == "https"
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            field,
            value: value.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn ws_base_is_derived_from_api_base() {
        let config = ClientConfig::parse("https://api.example.com/v1").unwrap();
        assert_eq!(config.ws_base().as_str(), "wss://api.example.com/v1");

        let config = ClientConfig::parse("http://localhost:8080").unwrap();
        assert_eq!(config.ws_base().as_str(), "ws://localhost:8080/");
        assert!(!config.is_secure_origin());
    }

    #[test]
    fn from_lookup_reads_all_settings() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("CLAW_API_BASE", "https://api.example.com"),
            ("CLAW_WS_BASE", "wss://stream.example.com"),
            ("CLAW_COOKIE_DOMAIN", ".example.com"),
            ("CLAW_POLL_INTERVAL_SECS", "30"),
            ("CLAW_LOG_TAIL_LINES", "50"),
            ("CLAW_LOG_CONTAINER", "agent"),
        ]))
        .unwrap();

        assert_eq!(config.ws_base().as_str(), "wss://stream.example.com/");
        assert_eq!(config.cookie_domain.as_deref(), Some(".example.com"));
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.log_tail_lines, 50);
        assert_eq!(config.log_container.as_deref(), Some("agent"));
        assert_eq!(config.log_buffer_cap, 1500);
    }

    #[test]
    fn from_lookup_requires_api_base() {
        let err = ClientConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CLAW_API_BASE")));
    }

    #[test]
    fn rejects_bad_values() {
        let err = ClientConfig::from_lookup(lookup(&[
            ("CLAW_API_BASE", "https://api.example.com"),
            ("CLAW_POLL_INTERVAL_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "poll_interval_secs",
                ..
            }
        ));

        let err = ClientConfig::parse("ftp://files.example.com")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "api_base", .. }));

        let err = ClientConfig::parse("https://api.example.com")
            .unwrap()
            .with_poll_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "poll_interval_secs",
                ..
            }
        ));
    }

    #[test]
    fn sub_second_poll_interval_rounds_up() {
        let config = ClientConfig::parse("https://api.example.com")
            .unwrap()
            .with_poll_interval(Duration::from_millis(500));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());

        let config = config.with_poll_interval(Duration::from_millis(2_500));
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_base":"https://api.example.com"}"#).unwrap();
        assert_eq!(config.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(config.log_tail_lines, DEFAULT_TAIL_LINES);
        assert!(config.validate().is_ok());
    }
}

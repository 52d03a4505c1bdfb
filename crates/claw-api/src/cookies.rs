//! Domain-scoped cookies that carry tokens to subdomain-hosted resources.

use std::fmt;

use chrono::{DateTime, Utc};
use claw_core::{AccessToken, ClientConfig, token_cookie_name};

/// Session credential cookie shared across subdomains.
pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// Cookie for the desktop UI proxy.
pub const REEF_TOKEN_COOKIE: &str = "reef_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    None,
}

/// One `Set-Cookie` value.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
}

impl SessionCookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            expires: None,
            secure: false,
        }
    }

    /// Scope to the configured cookie domain; secure when the API origin is https.
    #[must_use]
    pub fn for_config(name: impl Into<String>, value: impl Into<String>, config: &ClientConfig) -> Self {
        let mut cookie = Self::new(name, value);
        cookie.domain.clone_from(&config.cookie_domain);
        cookie.secure = config.is_secure_origin();
        cookie
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// A cookie that clears `name` on the configured domain.
    #[must_use]
    pub fn removal(name: impl Into<String>, config: &ClientConfig) -> Self {
        Self::for_config(name, "", config).with_expires(DateTime::UNIX_EPOCH)
    }

    /// Cross-site iframes only receive `SameSite=None` cookies, which must be `Secure`.
    #[must_use]
    pub const fn same_site(&self) -> SameSite {
        if self.secure { SameSite::None } else { SameSite::Lax }
    }

    /// Render as a `Set-Cookie` header value.
    #[must_use]
    pub fn to_header(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        f.write_str("; Path=/")?;
        if let Some(expires) = self.expires {
            write!(f, "; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT"))?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        match self.same_site() {
            SameSite::None => f.write_str("; SameSite=None"),
            SameSite::Lax => f.write_str("; SameSite=Lax"),
        }
    }
}

impl fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookie")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("expires", &self.expires)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

/// Cookies authorizing a resource's subdomain and its shell subdomain.
///
/// For host `atlas.agents.example.com` these are `atlas-token` and
/// `shell-atlas-token`, both carrying the token's expiry.
#[must_use]
pub fn resource_cookies(hostname: &str, token: &AccessToken, config: &ClientConfig) -> Vec<SessionCookie> {
    let names = [
        token_cookie_name(hostname),
        token_cookie_name(&format!("shell-{hostname}")),
    ];
    names
        .into_iter()
        .map(|name| {
            let cookie = SessionCookie::for_config(name, token.token.clone(), config);
            match token.expires_at {
                Some(expires) => cookie.with_expires(expires),
                None => cookie,
            }
        })
        .collect()
}

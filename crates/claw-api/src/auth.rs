//! Login flows. A successful login stores the session credential on the client.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{ApiClient, ApiError, billing::User, client::read_json};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(alias = "access_token")]
    pub token: String,
    #[serde(default)]
    pub user: Option<User>,
}

/// Message the wallet must sign to prove ownership.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WalletChallenge {
    #[serde(alias = "message")]
    pub challenge: String,
    #[serde(default)]
    pub nonce: Option<String>,
}

#[derive(Serialize)]
struct EmailLogin<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct WalletLogin<'a> {
    address: &'a str,
    signature: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
}

impl ApiClient {
    /// # Errors
    /// Returns error if the credentials are rejected.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let builder = self
            .anonymous(Method::POST, "/auth/login")?
            .json(&EmailLogin { email, password });
        let session: Session = read_json(builder.send().await?).await?;
        self.credential().set(session.token.clone());
        tracing::info!("Logged in");
        Ok(session)
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn wallet_challenge(&self, address: &str) -> Result<WalletChallenge, ApiError> {
        let builder = self
            .anonymous(Method::POST, "/auth/wallet/challenge")?
            .json(&serde_json::json!({ "address": address }));
        read_json(builder.send().await?).await
    }

    /// Complete a wallet login with a signature over the challenge.
    ///
    /// # Errors
    /// Returns error if the signature is rejected.
    pub async fn wallet_login(
        &self,
        address: &str,
        signature: &str,
        challenge: &WalletChallenge,
    ) -> Result<Session, ApiError> {
        let builder = self
            .anonymous(Method::POST, "/auth/wallet/login")?
            .json(&WalletLogin {
                address,
                signature,
                nonce: challenge.nonce.as_deref(),
            });
        let session: Session = read_json(builder.send().await?).await?;
        self.credential().set(session.token.clone());
        tracing::info!(address, "Logged in with wallet");
        Ok(session)
    }

    /// Forget the session credential.
    pub fn logout(&self) {
        self.credential().clear();
    }
}

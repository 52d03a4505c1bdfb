//! Account endpoints: user, balance and paginated transactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ApiClient, ApiError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub wallet_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub balance: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub amount: f64,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One page of `/tx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPage {
    pub items: Vec<Transaction>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl TransactionPage {
    #[must_use]
    pub fn page_count(&self) -> u32 {
        if self.page_size == 0 {
            return 0;
        }
        u32::try_from(self.total.div_ceil(u64::from(self.page_size))).unwrap_or(u32::MAX)
    }

    /// Pages are 1-based.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.page < self.page_count()
    }
}

impl ApiClient {
    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.get("/user").await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn balance(&self) -> Result<Balance, ApiError> {
        self.get("/balance").await
    }

    /// # Errors
    /// Returns error if the request fails or is rejected.
    pub async fn transactions(&self, page: u32, page_size: u32) -> Result<TransactionPage, ApiError> {
        let builder = self
            .authed(reqwest::Method::GET, "/tx")?
            .query(&[("page", page), ("page_size", page_size)]);
        crate::client::read_json(builder.send().await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(total: u64, page: u32, page_size: u32) -> TransactionPage {
        TransactionPage {
            items: Vec::new(),
            total,
            page,
            page_size,
        }
    }

    #[test]
    fn pagination_math() {
        assert_eq!(page(0, 1, 20).page_count(), 0);
        assert_eq!(page(20, 1, 20).page_count(), 1);
        assert_eq!(page(21, 1, 20).page_count(), 2);
        assert!(page(21, 1, 20).has_next());
        assert!(!page(21, 2, 20).has_next());
        assert_eq!(page(5, 1, 0).page_count(), 0);
    }

    #[test]
    fn transaction_type_field() {
        let tx: Transaction = serde_json::from_str(
            r#"{"id":"t1","amount":-2.5,"type":"usage","created_at":"2026-01-02T03:04:05Z"}"#,
        )
        .unwrap();
        assert_eq!(tx.kind.as_deref(), Some("usage"));
    }
}

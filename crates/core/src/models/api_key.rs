use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RecordId;

/// Exchange API credentials. One record per exchange (case-insensitive).
///
/// The store does not care whether the secret fields hold plaintext or
/// ciphertext; `is_encrypted` tells consumers which one they got.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: RecordId,
    /// Lower-cased exchange identifier (e.g. "okx", "binance").
    pub exchange: String,
    pub api_key: String,
    pub api_secret: String,
    /// Passphrase required by some exchanges (OKX, KuCoin).
    pub password: Option<String>,
    pub is_encrypted: bool,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

// Secrets never show up in logs or panics.
impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("id", &self.id)
            .field("exchange", &self.exchange)
            .field("is_encrypted", &self.is_encrypted)
            .field("created_at", &self.created_at)
            .field("last_used", &self.last_used)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct NewApiKey {
    pub exchange: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for NewApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewApiKey")
            .field("exchange", &self.exchange)
            .finish_non_exhaustive()
    }
}

impl NewApiKey {
    pub fn new(exchange: impl Into<String>, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// Credential listing entry without any secret material.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeySummary {
    pub id: RecordId,
    pub exchange: String,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

impl From<&ApiKey> for ApiKeySummary {
    fn from(key: &ApiKey) -> Self {
        Self {
            id: key.id,
            exchange: key.exchange.clone(),
            created_at: key.created_at,
            last_used: key.last_used,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RecordId;

/// Where a wallet's funds live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    Hot,
    Cold,
    /// Custodial exchange account. Auto-import keys these by exchange name.
    Exchange,
}

impl std::fmt::Display for WalletType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletType::Hot => write!(f, "hot"),
            WalletType::Cold => write!(f, "cold"),
            WalletType::Exchange => write!(f, "exchange"),
        }
    }
}

impl std::str::FromStr for WalletType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hot" => Ok(WalletType::Hot),
            "cold" => Ok(WalletType::Cold),
            "exchange" => Ok(WalletType::Exchange),
            other => Err(format!("unknown wallet type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: RecordId,
    pub name: String,
    pub wallet_type: WalletType,
    /// Lower-cased exchange identifier, only meaningful for exchange wallets.
    pub exchange_name: Option<String>,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// `true` when this is the exchange wallet for `exchange` (case-insensitive).
    pub fn is_exchange_wallet_for(&self, exchange: &str) -> bool {
        self.wallet_type == WalletType::Exchange
            && self
                .exchange_name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(exchange))
    }
}

/// Input for creating a wallet. The id is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWallet {
    pub name: String,
    pub wallet_type: WalletType,
    #[serde(default)]
    pub exchange_name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl NewWallet {
    pub fn new(name: impl Into<String>, wallet_type: WalletType) -> Self {
        Self {
            name: name.into(),
            wallet_type,
            exchange_name: None,
            color: None,
        }
    }

    pub fn exchange(exchange: &str) -> Self {
        Self {
            name: exchange.to_uppercase(),
            wallet_type: WalletType::Exchange,
            exchange_name: Some(exchange.to_lowercase()),
            color: None,
        }
    }

    pub fn into_wallet(self, id: RecordId, created_at: DateTime<Utc>) -> Wallet {
        Wallet {
            id,
            name: self.name,
            wallet_type: self.wallet_type,
            exchange_name: self.exchange_name,
            color: self.color,
            created_at,
        }
    }
}

/// Partial update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub wallet_type: Option<WalletType>,
    #[serde(default)]
    pub exchange_name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl WalletPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.wallet_type.is_none()
            && self.exchange_name.is_none()
            && self.color.is_none()
    }

    pub fn apply(&self, wallet: &mut Wallet) {
        if let Some(name) = &self.name {
            wallet.name = name.clone();
        }
        if let Some(wallet_type) = self.wallet_type {
            wallet.wallet_type = wallet_type;
        }
        if let Some(exchange_name) = &self.exchange_name {
            wallet.exchange_name = Some(exchange_name.to_lowercase());
        }
        if let Some(color) = &self.color {
            wallet.color = Some(color.clone());
        }
    }
}

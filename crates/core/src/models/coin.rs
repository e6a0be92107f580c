use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ids::RecordId;

/// Ticker symbol → price-provider id for the coins we see most often.
/// Custom coins override these; anything else falls back to the lower-cased symbol.
const SYMBOL_TO_PRICE_ID: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("WETH", "ethereum"),
    ("OPETH", "ethereum"),
    ("USDT", "tether"),
    ("BNB", "binancecoin"),
    ("SOL", "solana"),
    ("USDC", "usd-coin"),
    ("COMP", "compound-governance-token"),
    ("CRO", "crypto-com-chain"),
    ("POL", "polygon-ecosystem-token"),
    ("XPIN", "xpin-network"),
    ("XAUT", "tether-gold"),
    ("USD1", "usd1-wlfi"),
    ("XDAI", "xdai"),
    ("STETH", "staked-ether"),
    ("WBTC", "wrapped-bitcoin"),
    ("MATIC", "matic-network"),
];

/// A user-defined symbol with an explicit price-provider id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCoin {
    pub id: RecordId,
    pub symbol: String,
    pub name: String,
    pub coin_gecko_id: String,
    pub is_custom: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCustomCoin {
    pub symbol: String,
    pub name: String,
    pub coin_gecko_id: String,
}

impl NewCustomCoin {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>, coin_gecko_id: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            coin_gecko_id: coin_gecko_id.into(),
        }
    }
}

/// Resolves ticker symbols to price-provider ids.
#[derive(Debug, Clone, Default)]
pub struct CoinResolver {
    overrides: HashMap<String, String>,
}

impl CoinResolver {
    /// Resolver using only the built-in table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver where `custom` entries take precedence over the built-in table.
    pub fn with_custom_coins(custom: &[CustomCoin]) -> Self {
        let overrides = custom
            .iter()
            .filter(|c| !c.coin_gecko_id.trim().is_empty())
            .map(|c| (c.symbol.to_uppercase(), c.coin_gecko_id.clone()))
            .collect();
        Self { overrides }
    }

    pub fn resolve(&self, symbol: &str) -> String {
        let upper = symbol.to_uppercase();
        if let Some(id) = self.overrides.get(&upper) {
            return id.clone();
        }
        SYMBOL_TO_PRICE_ID
            .iter()
            .find(|(sym, _)| *sym == upper)
            .map(|(_, id)| (*id).to_string())
            .unwrap_or_else(|| symbol.to_lowercase())
    }
}

use serde::{Deserialize, Serialize};

/// One currency balance as reported by an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeBalance {
    pub symbol: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub used: f64,
    pub total: f64,
}

impl ExchangeBalance {
    pub fn new(symbol: impl Into<String>, total: f64) -> Self {
        Self {
            symbol: symbol.into(),
            free: total,
            used: 0.0,
            total,
        }
    }

    /// Zero, negative and non-finite totals are dropped before reconciliation.
    pub fn is_holding(&self) -> bool {
        self.total.is_finite() && self.total > 0.0
    }
}

/// Response body of a per-exchange balance fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    pub success: bool,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub data: Vec<ExchangeBalance>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

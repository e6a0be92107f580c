use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::RecordId;

/// Aggregated amount and USD value of one symbol across all wallets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoinValue {
    pub amount: f64,
    pub value: f64,
}

/// Breakdown stored with each snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    /// wallet id → USD value
    pub wallets: BTreeMap<RecordId, f64>,
    /// symbol → aggregated amount and value
    pub coins: BTreeMap<String, CoinValue>,
}

/// A timestamped valuation of the whole portfolio. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub id: RecordId,
    pub timestamp: DateTime<Utc>,
    pub total_value: f64,
    pub snapshot_data: SnapshotData,
}

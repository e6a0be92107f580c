use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RecordId;

/// How earned interest is applied at each payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterestType {
    /// Interest is added to the principal and earns interest itself.
    Compound,
    /// Interest is always computed on the principal at accrual time.
    Simple,
}

impl std::fmt::Display for InterestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterestType::Compound => write!(f, "compound"),
            InterestType::Simple => write!(f, "simple"),
        }
    }
}

/// Earn/staking configuration attached to a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarnConfig {
    pub enabled: bool,
    /// Annual percentage yield, in percent (0–100).
    pub apy: f64,
    pub interest_type: InterestType,
    pub payout_interval_hours: u32,
    /// Epoch milliseconds of the last applied payout boundary.
    pub last_payout_at: i64,
}

impl EarnConfig {
    pub fn new(apy: f64, interest_type: InterestType, payout_interval_hours: u32, start: DateTime<Utc>) -> Self {
        Self {
            enabled: true,
            apy,
            interest_type,
            payout_interval_hours,
            last_payout_at: start.timestamp_millis(),
        }
    }

    pub fn interval_ms(&self) -> i64 {
        i64::from(self.payout_interval_hours) * 3_600_000
    }

    /// Epoch milliseconds of the next payout boundary.
    pub fn next_payout_at(&self) -> i64 {
        self.last_payout_at + self.interval_ms()
    }
}

/// A holding of one symbol inside one wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: RecordId,
    pub wallet_id: RecordId,
    pub symbol: String,
    pub amount: f64,
    pub tags: Option<String>,
    pub notes: Option<String>,
    /// `Some(true)`: owned by the exchange auto-importer.
    /// `Some(false)`: entered by the user.
    /// `None`: legacy record created before the flag existed.
    pub auto_sync: Option<bool>,
    pub earn_config: Option<EarnConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    pub fn is_auto_synced(&self) -> bool {
        self.auto_sync == Some(true)
    }

    pub fn matches_symbol(&self, symbol: &str) -> bool {
        self.symbol.eq_ignore_ascii_case(symbol)
    }

    /// An earn position that is currently accruing.
    pub fn is_earning(&self) -> bool {
        self.earn_config.as_ref().is_some_and(|c| c.enabled)
    }

    /// Legacy records with no manual indicators may have been auto-imported
    /// before the `auto_sync` flag existed.
    pub fn looks_like_legacy_import(&self) -> bool {
        self.auto_sync.is_none()
            && self.notes.as_deref().map_or(true, |n| n.trim().is_empty())
            && self.earn_config.is_none()
    }
}

/// Input for creating an asset. The id is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAsset {
    pub wallet_id: RecordId,
    pub symbol: String,
    pub amount: f64,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub auto_sync: Option<bool>,
    #[serde(default)]
    pub earn_config: Option<EarnConfig>,
}

impl NewAsset {
    /// A manually entered holding.
    pub fn manual(wallet_id: RecordId, symbol: impl Into<String>, amount: f64) -> Self {
        Self {
            wallet_id,
            symbol: symbol.into(),
            amount,
            tags: None,
            notes: None,
            auto_sync: Some(false),
            earn_config: None,
        }
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_earn(mut self, earn: EarnConfig) -> Self {
        self.earn_config = Some(earn);
        self
    }

    pub fn into_asset(self, id: RecordId, now: DateTime<Utc>) -> Asset {
        Asset {
            id,
            wallet_id: self.wallet_id,
            symbol: self.symbol,
            amount: self.amount,
            tags: self.tags,
            notes: self.notes,
            auto_sync: self.auto_sync,
            earn_config: self.earn_config,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. `None` leaves the field untouched; `earn_config: Some(None)`
/// removes the earn configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetPatch {
    pub symbol: Option<String>,
    pub amount: Option<f64>,
    pub tags: Option<String>,
    pub notes: Option<String>,
    pub auto_sync: Option<bool>,
    pub earn_config: Option<Option<EarnConfig>>,
}

impl AssetPatch {
    pub fn amount(amount: f64) -> Self {
        Self {
            amount: Some(amount),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.symbol.is_none()
            && self.amount.is_none()
            && self.tags.is_none()
            && self.notes.is_none()
            && self.auto_sync.is_none()
            && self.earn_config.is_none()
    }

    pub fn apply(&self, asset: &mut Asset, now: DateTime<Utc>) {
        if let Some(symbol) = &self.symbol {
            asset.symbol = symbol.clone();
        }
        if let Some(amount) = self.amount {
            asset.amount = amount;
        }
        if let Some(tags) = &self.tags {
            asset.tags = Some(tags.clone());
        }
        if let Some(notes) = &self.notes {
            asset.notes = Some(notes.clone());
        }
        if let Some(auto_sync) = self.auto_sync {
            asset.auto_sync = Some(auto_sync);
        }
        if let Some(earn) = &self.earn_config {
            asset.earn_config = earn.clone();
        }
        asset.updated_at = now;
    }
}

/// An enabled earn position with its payout schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarnPosition {
    pub asset: Asset,
    /// Epoch milliseconds.
    pub next_payout_at: i64,
    pub time_until_payout_ms: i64,
}

//! Wire format of the full-state sync payload and the client-side sync bookkeeping.
//!
//! The server speaks snake_case, browser clients historically spoke camelCase.
//! Every field accepts both spellings on the way in; we always emit snake_case
//! (camelCase inside `earn_config`, which is what the server stores verbatim).

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::CoreError;

use super::asset::{Asset, AssetPatch, EarnConfig, InterestType, NewAsset};
use super::coin::CustomCoin;
use super::ids::RecordId;
use super::wallet::{NewWallet, Wallet, WalletPatch, WalletType};

/// Values above this are treated as epoch milliseconds rather than seconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

const DEFAULT_PAYOUT_INTERVAL_HOURS: u32 = 24;

fn epoch_to_datetime(raw: Option<i64>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return fallback;
    };
    let parsed = if raw.abs() >= MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    };
    parsed.unwrap_or(fallback)
}

// ── Wire DTOs ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireWallet {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", alias = "wallet_type", alias = "walletType")]
    pub wallet_type: WalletType,
    #[serde(default, alias = "exchangeName")]
    pub exchange_name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    /// Epoch seconds.
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEarnConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub apy: f64,
    #[serde(rename = "interestType", alias = "interest_type")]
    pub interest_type: InterestType,
    #[serde(
        rename = "payoutIntervalHours",
        alias = "payout_interval_hours",
        default = "default_payout_interval"
    )]
    pub payout_interval_hours: u32,
    /// Epoch milliseconds.
    #[serde(default, rename = "lastPayoutAt", alias = "last_payout_at")]
    pub last_payout_at: Option<i64>,
}

fn default_true() -> bool {
    true
}

fn default_payout_interval() -> u32 {
    DEFAULT_PAYOUT_INTERVAL_HOURS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireAsset {
    pub id: i64,
    #[serde(alias = "walletId")]
    pub wallet_id: i64,
    pub symbol: String,
    pub amount: f64,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "autoSync")]
    pub auto_sync: Option<bool>,
    #[serde(default, alias = "earnConfig")]
    pub earn_config: Option<WireEarnConfig>,
    /// Epoch seconds.
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<i64>,
    /// Epoch seconds.
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCustomCoin {
    pub id: i64,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "coinGeckoId")]
    pub coin_gecko_id: String,
    #[serde(default, alias = "isCustom")]
    pub is_custom: Option<bool>,
    /// Epoch seconds.
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<i64>,
}

/// Full-state pull response / push request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    #[serde(default)]
    pub wallets: Vec<WireWallet>,
    #[serde(default)]
    pub assets: Vec<WireAsset>,
    #[serde(default, rename = "customCoins", alias = "custom_coins")]
    pub custom_coins: Vec<WireCustomCoin>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// `{success, data, error}` envelope used by every server endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap `data`, turning `success: false` into an API error.
    pub fn into_data(self, provider: &str) -> Result<T, CoreError> {
        if !self.success {
            return Err(CoreError::Api {
                provider: provider.to_string(),
                message: self
                    .error
                    .unwrap_or_else(|| "server returned unsuccessful response".into()),
            });
        }
        self.data.ok_or_else(|| CoreError::Api {
            provider: provider.to_string(),
            message: "response carried no data".into(),
        })
    }
}

// ── Domain → wire ───────────────────────────────────────────────────

impl From<&Wallet> for WireWallet {
    fn from(w: &Wallet) -> Self {
        Self {
            id: w.id.get(),
            name: w.name.clone(),
            wallet_type: w.wallet_type,
            exchange_name: w.exchange_name.clone(),
            color: w.color.clone(),
            created_at: Some(w.created_at.timestamp()),
        }
    }
}

impl From<&EarnConfig> for WireEarnConfig {
    fn from(c: &EarnConfig) -> Self {
        Self {
            enabled: c.enabled,
            apy: c.apy,
            interest_type: c.interest_type,
            payout_interval_hours: c.payout_interval_hours,
            last_payout_at: Some(c.last_payout_at),
        }
    }
}

impl From<&Asset> for WireAsset {
    fn from(a: &Asset) -> Self {
        Self {
            id: a.id.get(),
            wallet_id: a.wallet_id.get(),
            symbol: a.symbol.clone(),
            amount: a.amount,
            tags: a.tags.clone(),
            notes: a.notes.clone(),
            auto_sync: a.auto_sync,
            earn_config: a.earn_config.as_ref().map(WireEarnConfig::from),
            created_at: Some(a.created_at.timestamp()),
            updated_at: Some(a.updated_at.timestamp()),
        }
    }
}

impl From<&CustomCoin> for WireCustomCoin {
    fn from(c: &CustomCoin) -> Self {
        Self {
            id: c.id.get(),
            symbol: c.symbol.clone(),
            name: c.name.clone(),
            coin_gecko_id: c.coin_gecko_id.clone(),
            is_custom: Some(c.is_custom),
            created_at: Some(c.created_at.timestamp()),
        }
    }
}

impl SyncPayload {
    pub fn from_records(wallets: &[Wallet], assets: &[Asset], custom_coins: &[CustomCoin], now: DateTime<Utc>) -> Self {
        Self {
            wallets: wallets.iter().map(WireWallet::from).collect(),
            assets: assets.iter().map(WireAsset::from).collect(),
            custom_coins: custom_coins.iter().map(WireCustomCoin::from).collect(),
            timestamp: Some(now.timestamp_millis()),
        }
    }
}

// ── Wire → domain ───────────────────────────────────────────────────

impl WireWallet {
    pub fn into_wallet(self, now: DateTime<Utc>) -> Result<Wallet, CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::ValidationError(format!("wallet {} has an empty name", self.id)));
        }
        Ok(Wallet {
            id: RecordId(self.id),
            name: self.name,
            wallet_type: self.wallet_type,
            exchange_name: self.exchange_name.map(|n| n.to_lowercase()),
            color: self.color,
            created_at: epoch_to_datetime(self.created_at, now),
        })
    }
}

impl WireEarnConfig {
    pub fn into_config(self, fallback_start: DateTime<Utc>) -> EarnConfig {
        EarnConfig {
            enabled: self.enabled,
            apy: self.apy,
            interest_type: self.interest_type,
            payout_interval_hours: self.payout_interval_hours,
            last_payout_at: self
                .last_payout_at
                .unwrap_or_else(|| fallback_start.timestamp_millis()),
        }
    }
}

impl WireAsset {
    pub fn into_asset(self, now: DateTime<Utc>) -> Result<Asset, CoreError> {
        if self.symbol.trim().is_empty() {
            return Err(CoreError::ValidationError(format!("asset {} has an empty symbol", self.id)));
        }
        if !self.amount.is_finite() {
            return Err(CoreError::ValidationError(format!(
                "asset {} has a non-finite amount",
                self.id
            )));
        }
        let created_at = epoch_to_datetime(self.created_at, now);
        Ok(Asset {
            id: RecordId(self.id),
            wallet_id: RecordId(self.wallet_id),
            symbol: self.symbol,
            amount: self.amount,
            tags: self.tags,
            notes: self.notes,
            auto_sync: self.auto_sync,
            earn_config: self.earn_config.map(|c| c.into_config(created_at)),
            created_at,
            updated_at: epoch_to_datetime(self.updated_at, created_at),
        })
    }
}

impl WireCustomCoin {
    pub fn into_coin(self, now: DateTime<Utc>) -> Result<CustomCoin, CoreError> {
        if self.symbol.trim().is_empty() {
            return Err(CoreError::ValidationError(format!(
                "custom coin {} has an empty symbol",
                self.id
            )));
        }
        Ok(CustomCoin {
            id: RecordId(self.id),
            symbol: self.symbol,
            name: self.name,
            coin_gecko_id: self.coin_gecko_id,
            is_custom: self.is_custom.unwrap_or(true),
            created_at: epoch_to_datetime(self.created_at, now),
        })
    }
}

/// A fully decoded payload. Decoding is all-or-nothing: one malformed
/// record rejects the whole payload so a replace never applies half of it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    pub wallets: Vec<Wallet>,
    pub assets: Vec<Asset>,
    pub custom_coins: Vec<CustomCoin>,
}

impl SyncPayload {
    pub fn decode(self, now: DateTime<Utc>) -> Result<SyncState, CoreError> {
        let wallets = self
            .wallets
            .into_iter()
            .map(|w| w.into_wallet(now))
            .collect::<Result<Vec<_>, _>>()?;
        let assets = self
            .assets
            .into_iter()
            .map(|a| a.into_asset(now))
            .collect::<Result<Vec<_>, _>>()?;
        let custom_coins = self
            .custom_coins
            .into_iter()
            .map(|c| c.into_coin(now))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SyncState {
            wallets,
            assets,
            custom_coins,
        })
    }
}

// ── Client bookkeeping ──────────────────────────────────────────────

/// Foreground sync status surfaced to callers instead of errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// `true` until the first hydration attempt settles.
    pub is_initial_sync: bool,
    pub is_syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub is_online: bool,
    /// Local mutations not yet acknowledged by the server.
    pub pending_ops: usize,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_initial_sync: true,
            is_syncing: false,
            last_sync_time: None,
            error: None,
            is_online: false,
            pending_ops: 0,
        }
    }
}

/// A local mutation the server has not acknowledged yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PendingChange {
    CreateWallet { placeholder: RecordId, wallet: NewWallet },
    UpdateWallet { id: RecordId, patch: WalletPatch },
    DeleteWallet { id: RecordId },
    CreateAsset { placeholder: RecordId, asset: NewAsset },
    UpdateAsset { id: RecordId, patch: AssetPatch },
    DeleteAsset { id: RecordId },
}

impl PendingChange {
    pub fn kind(&self) -> &'static str {
        match self {
            PendingChange::CreateWallet { .. } => "create-wallet",
            PendingChange::UpdateWallet { .. } => "update-wallet",
            PendingChange::DeleteWallet { .. } => "delete-wallet",
            PendingChange::CreateAsset { .. } => "create-asset",
            PendingChange::UpdateAsset { .. } => "update-asset",
            PendingChange::DeleteAsset { .. } => "delete-asset",
        }
    }

    /// Rewrite references after a placeholder wallet got its server id.
    pub fn remap_wallet(&mut self, from: RecordId, to: RecordId) {
        match self {
            PendingChange::CreateWallet { placeholder, .. } if *placeholder == from => *placeholder = to,
            PendingChange::UpdateWallet { id, .. } | PendingChange::DeleteWallet { id } if *id == from => *id = to,
            PendingChange::CreateAsset { asset, .. } if asset.wallet_id == from => asset.wallet_id = to,
            _ => {}
        }
    }

    /// Rewrite references after a placeholder asset got its server id.
    pub fn remap_asset(&mut self, from: RecordId, to: RecordId) {
        match self {
            PendingChange::CreateAsset { placeholder, .. } if *placeholder == from => *placeholder = to,
            PendingChange::UpdateAsset { id, .. } | PendingChange::DeleteAsset { id } if *id == from => *id = to,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOp {
    pub id: Uuid,
    pub queued_at: DateTime<Utc>,
    pub change: PendingChange,
    /// Number of failed replay attempts.
    pub attempts: u32,
}

impl PendingOp {
    pub fn new(change: PendingChange, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            queued_at: now,
            change,
            attempts: 0,
        }
    }
}

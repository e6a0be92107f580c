use async_trait::async_trait;
use std::collections::HashMap;

use crate::errors::CoreError;
use crate::models::asset::{Asset, AssetPatch, NewAsset};
use crate::models::balance::ExchangeBalance;
use crate::models::ids::RecordId;
use crate::models::sync::SyncPayload;
use crate::models::wallet::{NewWallet, Wallet, WalletPatch};

/// Source of latest USD prices.
///
/// Implementations are swappable: the registry tries them in registration
/// order and the rest of the crate never names a concrete provider.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Human-readable name of this provider (for logs/errors).
    fn name(&self) -> &str;

    /// Latest USD price for each requested price id. Ids the provider does
    /// not know are simply absent from the result.
    async fn latest_usd_prices(&self, price_ids: &[String]) -> Result<HashMap<String, f64>, CoreError>;
}

/// Per-exchange balance source. Each call may fail independently.
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_balances(
        &self,
        exchange: &str,
        api_key: &str,
        api_secret: &str,
        password: Option<&str>,
    ) -> Result<Vec<ExchangeBalance>, CoreError>;
}

/// The server-of-record as seen by a client.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap reachability check. Callers bound it with their own timeout.
    async fn health(&self) -> Result<(), CoreError>;

    /// Full-state pull.
    async fn fetch_state(&self) -> Result<SyncPayload, CoreError>;

    /// Full-state push. The server replaces its wallets and assets wholesale.
    async fn replace_state(&self, payload: &SyncPayload) -> Result<(), CoreError>;

    /// Returns the created wallet carrying its server-assigned id.
    async fn create_wallet(&self, wallet: &NewWallet) -> Result<Wallet, CoreError>;
    async fn update_wallet(&self, id: RecordId, patch: &WalletPatch) -> Result<(), CoreError>;
    async fn delete_wallet(&self, id: RecordId) -> Result<(), CoreError>;

    /// Returns the created asset carrying its server-assigned id.
    async fn create_asset(&self, asset: &NewAsset) -> Result<Asset, CoreError>;
    async fn update_asset(&self, id: RecordId, patch: &AssetPatch) -> Result<(), CoreError>;
    async fn delete_asset(&self, id: RecordId) -> Result<(), CoreError>;
}

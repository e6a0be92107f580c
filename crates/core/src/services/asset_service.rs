use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::errors::CoreError;
use crate::models::api_key::{ApiKey, ApiKeySummary, NewApiKey};
use crate::models::asset::{Asset, AssetPatch, EarnPosition, NewAsset};
use crate::models::coin::{CoinResolver, CustomCoin, NewCustomCoin};
use crate::models::ids::RecordId;
use crate::models::wallet::{NewWallet, Wallet, WalletPatch, WalletType};
use crate::storage::encryption::{CredentialCipher, PlainCipher};
use crate::storage::record_store::RecordStore;

use super::earn_service::{self, validate_earn_config, EarnService};

// ── Validation ──────────────────────────────────────────────────────

pub fn validate_new_wallet(wallet: &NewWallet) -> Result<(), CoreError> {
    if wallet.name.trim().is_empty() {
        return Err(CoreError::ValidationError("wallet name cannot be empty".into()));
    }
    if wallet.wallet_type == WalletType::Exchange
        && wallet.exchange_name.as_deref().map_or(true, |n| n.trim().is_empty())
    {
        return Err(CoreError::ValidationError(
            "exchange wallets need an exchange name".into(),
        ));
    }
    Ok(())
}

pub fn validate_wallet_patch(patch: &WalletPatch) -> Result<(), CoreError> {
    if patch.is_empty() {
        return Err(CoreError::ValidationError("no wallet fields to update".into()));
    }
    if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(CoreError::ValidationError("wallet name cannot be empty".into()));
    }
    Ok(())
}

fn validate_amount(amount: f64) -> Result<(), CoreError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(CoreError::ValidationError(format!(
            "amount must be a finite non-negative number, got {amount}"
        )));
    }
    Ok(())
}

pub fn validate_new_asset(asset: &NewAsset) -> Result<(), CoreError> {
    if asset.symbol.trim().is_empty() {
        return Err(CoreError::ValidationError("asset symbol cannot be empty".into()));
    }
    validate_amount(asset.amount)?;
    if let Some(config) = &asset.earn_config {
        validate_earn_config(config)?;
    }
    Ok(())
}

pub fn validate_asset_patch(patch: &AssetPatch) -> Result<(), CoreError> {
    if patch.is_empty() {
        return Err(CoreError::ValidationError("no asset fields to update".into()));
    }
    if patch.symbol.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(CoreError::ValidationError("asset symbol cannot be empty".into()));
    }
    if let Some(amount) = patch.amount {
        validate_amount(amount)?;
    }
    if let Some(Some(config)) = &patch.earn_config {
        validate_earn_config(config)?;
    }
    Ok(())
}

fn normalize_new_wallet(mut wallet: NewWallet) -> NewWallet {
    wallet.name = wallet.name.trim().to_string();
    wallet.exchange_name = wallet.exchange_name.map(|n| n.trim().to_lowercase());
    wallet
}

fn normalize_new_asset(mut asset: NewAsset) -> NewAsset {
    asset.symbol = asset.symbol.trim().to_string();
    asset
}

/// Validated CRUD over one [`RecordStore`]: wallets, assets, exchange
/// credentials and custom coins. Listing assets runs interest accrual first.
#[derive(Clone)]
pub struct AssetService {
    store: Arc<RecordStore>,
    earn: EarnService,
    cipher: Arc<dyn CredentialCipher>,
}

impl AssetService {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self::with_cipher(store, Arc::new(PlainCipher))
    }

    pub fn with_cipher(store: Arc<RecordStore>, cipher: Arc<dyn CredentialCipher>) -> Self {
        Self {
            earn: EarnService::new(store.clone()),
            store,
            cipher,
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    // ── Wallets ─────────────────────────────────────────────────────

    pub async fn create_wallet(&self, wallet: NewWallet, now: DateTime<Utc>) -> Result<Wallet, CoreError> {
        validate_new_wallet(&wallet)?;
        let wallet = normalize_new_wallet(wallet).into_wallet(RecordId(0), now);
        let created = self.store.insert(wallet).await?;
        info!("created wallet {} ({})", created.id, created.name);
        Ok(created)
    }

    pub async fn get_wallet(&self, id: RecordId) -> Result<Wallet, CoreError> {
        self.store.get(id).await
    }

    pub async fn list_wallets(&self) -> Vec<Wallet> {
        self.store.list().await
    }

    pub async fn find_exchange_wallet(&self, exchange: &str) -> Option<Wallet> {
        self.store
            .list_where::<Wallet, _>(|w| w.is_exchange_wallet_for(exchange))
            .await
            .into_iter()
            .next()
    }

    pub async fn update_wallet(&self, id: RecordId, patch: WalletPatch) -> Result<Wallet, CoreError> {
        validate_wallet_patch(&patch)?;
        self.store
            .update::<Wallet, _>(id, move |wallet| {
                patch.apply(wallet);
                if wallet.wallet_type == WalletType::Exchange && wallet.exchange_name.is_none() {
                    return Err(CoreError::ValidationError(
                        "exchange wallets need an exchange name".into(),
                    ));
                }
                Ok(())
            })
            .await
    }

    /// Delete a wallet and every asset it owns. Returns the number of assets removed.
    pub async fn delete_wallet(&self, id: RecordId) -> Result<usize, CoreError> {
        let (wallet, assets) = self.store.delete_wallet_cascade(id).await?;
        info!("deleted wallet {} ({}) with {} assets", wallet.id, wallet.name, assets.len());
        Ok(assets.len())
    }

    // ── Assets ──────────────────────────────────────────────────────

    pub async fn create_asset(&self, asset: NewAsset, now: DateTime<Utc>) -> Result<Asset, CoreError> {
        validate_new_asset(&asset)?;
        let asset = normalize_new_asset(asset).into_asset(RecordId(0), now);
        let created = self.store.insert(asset).await?;
        debug!("created asset {} ({} {})", created.id, created.amount, created.symbol);
        Ok(created)
    }

    pub async fn get_asset(&self, id: RecordId) -> Result<Asset, CoreError> {
        self.store.get(id).await
    }

    /// All assets, after applying any due interest.
    pub async fn list_assets(&self, now: DateTime<Utc>) -> Result<Vec<Asset>, CoreError> {
        match self.earn.accrue_stored(now).await {
            Ok(accrued) if !accrued.is_empty() => {
                info!("accrued interest on {} earn positions", accrued.len());
            }
            Ok(_) => {}
            Err(e) => warn!("accrual not persisted, serving stored amounts: {e}"),
        }
        Ok(self.store.list().await)
    }

    pub async fn list_assets_in_wallet(&self, wallet_id: RecordId, now: DateTime<Utc>) -> Result<Vec<Asset>, CoreError> {
        let assets = self.list_assets(now).await?;
        Ok(assets.into_iter().filter(|a| a.wallet_id == wallet_id).collect())
    }

    pub async fn update_asset(&self, id: RecordId, patch: AssetPatch, now: DateTime<Utc>) -> Result<Asset, CoreError> {
        validate_asset_patch(&patch)?;
        self.store
            .update::<Asset, _>(id, move |asset| {
                patch.apply(asset, now);
                asset.symbol = asset.symbol.trim().to_string();
                Ok(())
            })
            .await
    }

    pub async fn delete_asset(&self, id: RecordId) -> Result<Asset, CoreError> {
        self.store.delete(id).await
    }

    /// Enabled earn positions with their next payout, accrued first.
    pub async fn list_earn_positions(&self, now: DateTime<Utc>) -> Result<Vec<EarnPosition>, CoreError> {
        let assets = self.list_assets(now).await?;
        Ok(assets
            .iter()
            .filter_map(|a| earn_service::earn_position(a, now))
            .collect())
    }

    // ── Exchange credentials ────────────────────────────────────────

    /// Store credentials for an exchange, replacing any existing record for
    /// the same exchange (case-insensitive).
    pub async fn save_api_key(&self, key: NewApiKey, now: DateTime<Utc>) -> Result<ApiKeySummary, CoreError> {
        let exchange = key.exchange.trim().to_lowercase();
        if exchange.is_empty() {
            return Err(CoreError::ValidationError("exchange name cannot be empty".into()));
        }
        if key.api_key.trim().is_empty() || key.api_secret.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "API key and secret are required".into(),
            ));
        }

        let api_key = self.cipher.encrypt(&key.api_key)?;
        let api_secret = self.cipher.encrypt(&key.api_secret)?;
        let password = key
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| self.cipher.encrypt(p))
            .transpose()?;
        let is_encrypted = self.cipher.is_encrypting();

        let saved = self
            .store
            .transaction(move |state, space| {
                let existing = state
                    .api_keys
                    .values()
                    .find(|k| k.exchange.eq_ignore_ascii_case(&exchange))
                    .map(|k| (k.id, k.created_at, k.last_used));
                let (id, created_at, last_used) = match existing {
                    Some(found) => found,
                    None => (state.allocate_id(space), now, None),
                };
                let record = ApiKey {
                    id,
                    exchange,
                    api_key,
                    api_secret,
                    password,
                    is_encrypted,
                    created_at,
                    last_used,
                };
                state.api_keys.insert(id, record.clone());
                Ok(record)
            })
            .await?;

        info!("saved credentials for {}", saved.exchange);
        Ok(ApiKeySummary::from(&saved))
    }

    /// Listing without any secret material.
    pub async fn list_exchanges(&self) -> Vec<ApiKeySummary> {
        self.store
            .list::<ApiKey>()
            .await
            .iter()
            .map(ApiKeySummary::from)
            .collect()
    }

    pub async fn list_api_keys(&self) -> Vec<ApiKey> {
        self.store.list().await
    }

    pub async fn get_api_key(&self, exchange: &str) -> Result<ApiKey, CoreError> {
        self.store
            .list_where::<ApiKey, _>(|k| k.exchange.eq_ignore_ascii_case(exchange))
            .await
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::not_found("api key", exchange))
    }

    pub async fn delete_api_key(&self, exchange: &str) -> Result<(), CoreError> {
        let key = self.get_api_key(exchange).await?;
        self.store.delete::<ApiKey>(key.id).await?;
        info!("deleted credentials for {}", key.exchange);
        Ok(())
    }

    /// Stamp `last_used` after a successful balance fetch.
    pub async fn touch_api_key(&self, id: RecordId, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.store
            .update::<ApiKey, _>(id, move |key| {
                key.last_used = Some(now);
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Plaintext `(api_key, api_secret, password)` for a stored record.
    pub fn reveal(&self, key: &ApiKey) -> Result<(String, String, Option<String>), CoreError> {
        if !key.is_encrypted {
            return Ok((key.api_key.clone(), key.api_secret.clone(), key.password.clone()));
        }
        let api_key = self.cipher.decrypt(&key.api_key)?;
        let api_secret = self.cipher.decrypt(&key.api_secret)?;
        let password = key
            .password
            .as_deref()
            .map(|p| self.cipher.decrypt(p))
            .transpose()?;
        Ok((api_key, api_secret, password))
    }

    // ── Custom coins ────────────────────────────────────────────────

    pub async fn add_custom_coin(&self, coin: NewCustomCoin, now: DateTime<Utc>) -> Result<CustomCoin, CoreError> {
        let symbol = coin.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(CoreError::ValidationError("coin symbol cannot be empty".into()));
        }
        if coin.coin_gecko_id.trim().is_empty() {
            return Err(CoreError::ValidationError("coin price id cannot be empty".into()));
        }
        let record = CustomCoin {
            id: RecordId(0),
            symbol,
            name: coin.name.trim().to_string(),
            coin_gecko_id: coin.coin_gecko_id.trim().to_string(),
            is_custom: true,
            created_at: now,
        };
        self.store.insert(record).await
    }

    pub async fn list_custom_coins(&self) -> Vec<CustomCoin> {
        self.store.list().await
    }

    pub async fn delete_custom_coin(&self, id: RecordId) -> Result<CustomCoin, CoreError> {
        self.store.delete(id).await
    }

    /// Symbol resolver honouring the stored custom coins.
    pub async fn coin_resolver(&self) -> CoinResolver {
        CoinResolver::with_custom_coins(&self.list_custom_coins().await)
    }

    /// Distinct price ids of everything held, sorted.
    pub async fn held_price_ids(&self) -> Vec<String> {
        let resolver = self.coin_resolver().await;
        let ids: BTreeSet<String> = self
            .store
            .read(|s| s.assets.values().map(|a| resolver.resolve(&a.symbol)).collect())
            .await;
        ids.into_iter().collect()
    }
}

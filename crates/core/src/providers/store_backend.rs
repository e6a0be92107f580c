use async_trait::async_trait;
use chrono::Utc;
use log::info;
use std::collections::BTreeSet;

use crate::errors::CoreError;
use crate::models::asset::{Asset, AssetPatch, NewAsset};
use crate::models::ids::{IdSpace, RecordId};
use crate::models::sync::SyncPayload;
use crate::models::wallet::{NewWallet, Wallet, WalletPatch};
use crate::services::asset_service::AssetService;
use super::traits::SyncBackend;

/// In-process server-of-record: serves the sync protocol straight from a
/// server-side record store, with no HTTP in between.
///
/// The daemon embeds the same store; clients in the same process (and tests)
/// talk to it through this adapter.
#[derive(Clone)]
pub struct StoreBackend {
    assets: AssetService,
}

impl StoreBackend {
    /// `assets` must sit on a store allocating server ids.
    pub fn new(assets: AssetService) -> Result<Self, CoreError> {
        if assets.store().id_space() != IdSpace::Server {
            return Err(CoreError::Config(
                "the server-of-record store must allocate server ids".into(),
            ));
        }
        Ok(Self { assets })
    }

    pub fn assets(&self) -> &AssetService {
        &self.assets
    }
}

#[async_trait]
impl SyncBackend for StoreBackend {
    fn name(&self) -> &str {
        "local-store"
    }

    async fn health(&self) -> Result<(), CoreError> {
        if self.assets.store().is_closed() {
            return Err(CoreError::Network("record store is closed".into()));
        }
        Ok(())
    }

    async fn fetch_state(&self) -> Result<SyncPayload, CoreError> {
        let now = Utc::now();
        // Listing assets settles due earn payouts first.
        let assets = self.assets.list_assets(now).await?;
        let wallets = self.assets.list_wallets().await;
        let custom_coins = self.assets.list_custom_coins().await;
        Ok(SyncPayload::from_records(&wallets, &assets, &custom_coins, now))
    }

    async fn replace_state(&self, payload: &SyncPayload) -> Result<(), CoreError> {
        let supplies_coins = !payload.custom_coins.is_empty();
        let state = payload.clone().decode(Utc::now())?;

        let wallet_ids: BTreeSet<RecordId> = state.wallets.iter().map(|w| w.id).collect();
        if let Some(id) = wallet_ids.iter().find(|id| !id.is_server_assigned()) {
            return Err(CoreError::ValidationError(format!("wallet id {id} is not a server id")));
        }
        for asset in &state.assets {
            if !asset.id.is_server_assigned() {
                return Err(CoreError::ValidationError(format!(
                    "asset id {} is not a server id",
                    asset.id
                )));
            }
            if !wallet_ids.contains(&asset.wallet_id) {
                return Err(CoreError::ValidationError(format!(
                    "asset {} references unknown wallet {}",
                    asset.id, asset.wallet_id
                )));
            }
        }

        let custom_coins = if supplies_coins {
            state.custom_coins
        } else {
            self.assets.list_custom_coins().await
        };
        let (wallets, assets) = (state.wallets.len(), state.assets.len());
        self.assets
            .store()
            .replace_sync_state(state.wallets, state.assets, custom_coins)
            .await?;
        info!("state replaced by client push: {wallets} wallets, {assets} assets");
        Ok(())
    }

    async fn create_wallet(&self, wallet: &NewWallet) -> Result<Wallet, CoreError> {
        self.assets.create_wallet(wallet.clone(), Utc::now()).await
    }

    async fn update_wallet(&self, id: RecordId, patch: &WalletPatch) -> Result<(), CoreError> {
        self.assets.update_wallet(id, patch.clone()).await.map(|_| ())
    }

    async fn delete_wallet(&self, id: RecordId) -> Result<(), CoreError> {
        self.assets.delete_wallet(id).await.map(|_| ())
    }

    async fn create_asset(&self, asset: &NewAsset) -> Result<Asset, CoreError> {
        self.assets.create_asset(asset.clone(), Utc::now()).await
    }

    async fn update_asset(&self, id: RecordId, patch: &AssetPatch) -> Result<(), CoreError> {
        self.assets
            .update_asset(id, patch.clone(), Utc::now())
            .await
            .map(|_| ())
    }

    async fn delete_asset(&self, id: RecordId) -> Result<(), CoreError> {
        self.assets.delete_asset(id).await.map(|_| ())
    }
}

pub mod errors;
pub mod models;
pub mod providers;
pub mod services;
pub mod storage;

use chrono::{DateTime, Utc};
use log::info;
use std::sync::Arc;
use tokio::sync::watch;

use errors::CoreError;
use models::{
    api_key::{ApiKeySummary, NewApiKey},
    asset::{Asset, AssetPatch, EarnPosition, NewAsset},
    coin::{CustomCoin, NewCustomCoin},
    ids::{IdSpace, RecordId},
    price::PricePoint,
    settings::Settings,
    snapshot::PortfolioSnapshot,
    sync::SyncStatus,
    wallet::{NewWallet, Wallet, WalletPatch},
};
use providers::{
    balance_gateway::BalanceGatewayProvider,
    http_backend::HttpBackend,
    registry::PriceProviderRegistry,
    store_backend::StoreBackend,
    traits::{BalanceProvider, SyncBackend},
};
use services::{
    asset_service::AssetService,
    import_service::{ExchangeImporter, ImportReport},
    price_service::PriceService,
    scheduler::{spawn_periodic, PeriodicTask},
    snapshot_service::SnapshotService,
    sync_service::{HydrateOutcome, SyncConfig, SyncService},
};
use storage::{
    encryption::{CredentialCipher, PasswordCipher, PlainCipher},
    persistence::{FilePersistence, Persistence},
    record_store::RecordStore,
};

fn credential_cipher(settings: &Settings) -> Arc<dyn CredentialCipher> {
    match &settings.credential_passphrase {
        Some(passphrase) => Arc::new(PasswordCipher::new(passphrase.clone())),
        None => Arc::new(PlainCipher),
    }
}

async fn refresh_prices(assets: &AssetService, prices: &PriceService, tracked: &[String]) -> usize {
    let mut ids = assets.held_price_ids().await;
    ids.extend(tracked.iter().cloned());
    ids.sort();
    ids.dedup();
    prices.refresh_cycle(&ids, Utc::now()).await
}

// ═══════════════════════════════════════════════════════════════════
// Server-of-record
// ═══════════════════════════════════════════════════════════════════

/// The authoritative side: durable record store, exchange auto-import and
/// periodic portfolio snapshots.
#[must_use]
pub struct PortfolioServer {
    settings: Settings,
    assets: AssetService,
    importer: Arc<ExchangeImporter>,
    snapshots: Arc<SnapshotService>,
    prices: Arc<PriceService>,
}

impl std::fmt::Debug for PortfolioServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioServer")
            .field("data_path", &self.settings.data_path)
            .field("import_interval", &self.settings.import_interval())
            .field("snapshot_interval", &self.settings.snapshot_interval())
            .field("price_refresh_interval", &self.settings.price_refresh_interval())
            .finish()
    }
}

impl PortfolioServer {
    /// Open the store at `settings.data_path` and wire the default providers:
    /// the balance gateway for exchanges and CoinGecko for prices.
    pub fn open(settings: Settings) -> Result<Self, CoreError> {
        settings.validate()?;
        let mut persistence = FilePersistence::new(settings.data_path.clone());
        if let Some(passphrase) = &settings.credential_passphrase {
            persistence = persistence.with_passphrase(passphrase.clone());
        }
        let store = RecordStore::open(Arc::new(persistence), IdSpace::Server)?;
        let balances = Arc::new(BalanceGatewayProvider::new(
            settings.balance_gateway_url.clone(),
            settings.request_timeout(),
        ));
        Ok(Self::with_parts(
            settings,
            Arc::new(store),
            balances,
            PriceProviderRegistry::new_with_defaults(),
        ))
    }

    /// Assemble from explicit parts. `store` must allocate server ids.
    pub fn with_parts(
        settings: Settings,
        store: Arc<RecordStore>,
        balances: Arc<dyn BalanceProvider>,
        registry: PriceProviderRegistry,
    ) -> Self {
        let assets = AssetService::with_cipher(store, credential_cipher(&settings));
        let prices = Arc::new(
            PriceService::new(registry).with_history_retention(settings.price_history_retention()),
        );
        let importer = Arc::new(ExchangeImporter::new(assets.clone(), balances));
        let snapshots = Arc::new(SnapshotService::new(
            assets.clone(),
            prices.clone(),
            settings.snapshot_retention(),
        ));
        Self {
            settings,
            assets,
            importer,
            snapshots,
            prices,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn assets(&self) -> &AssetService {
        &self.assets
    }

    pub fn prices(&self) -> &Arc<PriceService> {
        &self.prices
    }

    pub fn importer(&self) -> &Arc<ExchangeImporter> {
        &self.importer
    }

    pub fn snapshots(&self) -> &Arc<SnapshotService> {
        &self.snapshots
    }

    /// The sync protocol served from this store, for in-process clients.
    pub fn backend(&self) -> Result<StoreBackend, CoreError> {
        StoreBackend::new(self.assets.clone())
    }

    // ── Background jobs ─────────────────────────────────────────────

    /// Start the import, snapshot and price-refresh schedulers. Each runs once
    /// right away. Dropping the returned tasks stops them.
    pub fn start_background_jobs(&self) -> Vec<PeriodicTask> {
        let importer = self.importer.clone();
        let import = spawn_periodic("exchange import", self.settings.import_interval(), move || {
            let importer = importer.clone();
            async move {
                importer.try_run().await;
            }
        });

        let snapshots = self.snapshots.clone();
        let snapshot = spawn_periodic("portfolio snapshot", self.settings.snapshot_interval(), move || {
            let snapshots = snapshots.clone();
            async move {
                snapshots.try_capture().await;
            }
        });

        let (assets, prices) = (self.assets.clone(), self.prices.clone());
        let tracked = Arc::new(self.settings.tracked_price_ids.clone());
        let price_refresh = spawn_periodic("price refresh", self.settings.price_refresh_interval(), move || {
            let (assets, prices, tracked) = (assets.clone(), prices.clone(), tracked.clone());
            async move {
                refresh_prices(&assets, &prices, &tracked).await;
            }
        });

        vec![import, snapshot, price_refresh]
    }

    /// Refresh held and tracked prices now. Returns how many were updated.
    pub async fn refresh_prices_now(&self) -> usize {
        refresh_prices(&self.assets, &self.prices, &self.settings.tracked_price_ids).await
    }

    /// Recorded prices of `price_id`, newest first.
    pub async fn price_history(&self, price_id: &str, limit: Option<usize>) -> Vec<PricePoint> {
        self.prices.history(price_id, limit).await
    }

    pub async fn import_now(&self) -> ImportReport {
        self.importer.run_now().await
    }

    pub async fn snapshot_now(&self) -> Result<Option<PortfolioSnapshot>, CoreError> {
        self.snapshots.capture_now().await
    }

    /// Snapshots from the last `hours` hours, oldest first.
    pub async fn snapshot_history(&self, hours: i64) -> Vec<PortfolioSnapshot> {
        self.snapshots.recent(hours, Utc::now()).await
    }

    // ── Credentials & coins ─────────────────────────────────────────

    pub async fn save_api_key(&self, key: NewApiKey) -> Result<ApiKeySummary, CoreError> {
        self.assets.save_api_key(key, Utc::now()).await
    }

    pub async fn list_exchanges(&self) -> Vec<ApiKeySummary> {
        self.assets.list_exchanges().await
    }

    pub async fn delete_api_key(&self, exchange: &str) -> Result<(), CoreError> {
        self.assets.delete_api_key(exchange).await
    }

    pub async fn add_custom_coin(&self, coin: NewCustomCoin) -> Result<CustomCoin, CoreError> {
        self.assets.add_custom_coin(coin, Utc::now()).await
    }

    /// Stop accepting writes and flush the store.
    pub async fn close(&self) -> Result<(), CoreError> {
        info!("closing record store");
        self.assets.store().close().await
    }
}

// ═══════════════════════════════════════════════════════════════════
// Client
// ═══════════════════════════════════════════════════════════════════

/// A client-local cache of the server's wallets and assets, kept in step
/// through [`SyncService`]. Works offline; ids minted offline are
/// placeholders until the next successful hydration.
#[must_use]
pub struct PortfolioClient {
    sync: SyncService,
}

impl std::fmt::Debug for PortfolioClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioClient")
            .field("status", &self.sync.status())
            .finish()
    }
}

impl PortfolioClient {
    /// Local cache in `persistence`, HTTP backend at `settings.server_url`.
    pub fn connect(settings: &Settings, persistence: Arc<dyn Persistence>) -> Result<Self, CoreError> {
        settings.validate()?;
        let store = Arc::new(RecordStore::open(persistence, IdSpace::Placeholder)?);
        let backend = Arc::new(HttpBackend::from_settings(settings));
        Ok(Self::with_backend(store, backend, SyncConfig::from_settings(settings)))
    }

    /// `store` must allocate placeholder ids.
    pub fn with_backend(store: Arc<RecordStore>, backend: Arc<dyn SyncBackend>, config: SyncConfig) -> Self {
        Self {
            sync: SyncService::new(AssetService::new(store), backend, config),
        }
    }

    pub fn sync(&self) -> &SyncService {
        &self.sync
    }

    pub async fn hydrate(&self) -> HydrateOutcome {
        self.sync.hydrate().await
    }

    pub fn status(&self) -> SyncStatus {
        self.sync.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.sync.subscribe()
    }

    pub async fn push_all(&self) -> Result<(), CoreError> {
        self.sync.push_all().await
    }

    // ── Reads (local) ───────────────────────────────────────────────

    pub async fn wallets(&self) -> Vec<Wallet> {
        self.sync.local().list_wallets().await
    }

    pub async fn assets(&self) -> Result<Vec<Asset>, CoreError> {
        self.sync.local().list_assets(Utc::now()).await
    }

    pub async fn earn_positions(&self, now: DateTime<Utc>) -> Result<Vec<EarnPosition>, CoreError> {
        self.sync.local().list_earn_positions(now).await
    }

    // ── Writes (server first) ───────────────────────────────────────

    pub async fn create_wallet(&self, wallet: NewWallet) -> Result<Wallet, CoreError> {
        self.sync.create_wallet(wallet).await
    }

    pub async fn update_wallet(&self, id: RecordId, patch: WalletPatch) -> Result<Wallet, CoreError> {
        self.sync.update_wallet(id, patch).await
    }

    pub async fn delete_wallet(&self, id: RecordId) -> Result<usize, CoreError> {
        self.sync.delete_wallet(id).await
    }

    pub async fn create_asset(&self, asset: NewAsset) -> Result<Asset, CoreError> {
        self.sync.create_asset(asset).await
    }

    pub async fn update_asset(&self, id: RecordId, patch: AssetPatch) -> Result<Asset, CoreError> {
        self.sync.update_asset(id, patch).await
    }

    pub async fn delete_asset(&self, id: RecordId) -> Result<Asset, CoreError> {
        self.sync.delete_asset(id).await
    }

    pub async fn close(&self) -> Result<(), CoreError> {
        self.sync.local().store().close().await
    }
}

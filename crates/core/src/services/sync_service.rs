//! Client side of the sync protocol.
//!
//! - **Hydrate**: check server health, replay the outbox, pull full state and
//!   replace the local wallets, assets and custom coins in one transaction.
//!   Any failure leaves local state untouched and is reported through
//!   [`SyncStatus`], never as an error.
//! - **Write-through**: creates go to the server first so records get server
//!   ids; when the server is unreachable or refuses the create, the record is
//!   created locally under a placeholder id and queued. Updates and deletes always apply locally,
//!   whatever the server said, and are queued when the server was unreachable.
//! - **Full push**: replay the outbox, then replace the server's state with
//!   the local one, rate limited.
//!
//! Hydration holds the write side of a gate, write-throughs the read side, so
//! no write-through starts while a pull is in flight.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;

use crate::errors::CoreError;
use crate::models::asset::{Asset, AssetPatch, NewAsset};
use crate::models::ids::RecordId;
use crate::models::settings::Settings;
use crate::models::sync::{PendingChange, PendingOp, SyncPayload, SyncStatus};
use crate::models::wallet::{NewWallet, Wallet, WalletPatch};
use crate::providers::traits::SyncBackend;

use super::asset_service::{
    validate_asset_patch, validate_new_asset, validate_new_wallet, validate_wallet_patch, AssetService,
};

pub const OFFLINE_MESSAGE: &str = "Backend offline - using local data";
pub const TIMEOUT_MESSAGE: &str = "Sync timeout - using local data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub enabled: bool,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
    pub hydrate_timeout: Duration,
    pub min_push_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl SyncConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            enabled: settings.sync_enabled,
            request_timeout: settings.request_timeout(),
            health_timeout: settings.health_timeout(),
            hydrate_timeout: settings.hydrate_timeout(),
            min_push_interval: settings.min_push_interval(),
        }
    }
}

/// How a hydration attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrateOutcome {
    /// Local state now mirrors the server.
    Synced { wallets: usize, assets: usize, custom_coins: usize, replayed: usize },
    /// Sync is disabled; local state is authoritative.
    Disabled,
    /// The health check failed; local state kept.
    Offline,
    /// The server answered but something failed; local state kept.
    Failed(String),
    /// The overall deadline passed; local state kept.
    TimedOut,
}

enum HydrateError {
    Offline,
    Failed(CoreError),
}

pub struct SyncService {
    local: AssetService,
    backend: Arc<dyn SyncBackend>,
    config: SyncConfig,
    gate: RwLock<()>,
    status: watch::Sender<SyncStatus>,
    last_sync: Mutex<Option<Instant>>,
}

impl SyncService {
    pub fn new(local: AssetService, backend: Arc<dyn SyncBackend>, config: SyncConfig) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            local,
            backend,
            config,
            gate: RwLock::new(()),
            status,
            last_sync: Mutex::new(None),
        }
    }

    pub fn local(&self) -> &AssetService {
        &self.local
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Observe status changes without polling.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    async fn publish<F: FnOnce(&mut SyncStatus)>(&self, f: F) {
        let pending = self.local.store().pending_count().await;
        self.status.send_modify(|status| {
            f(status);
            status.pending_ops = pending;
        });
    }

    fn mark_synced(&self) {
        *self.last_sync.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    async fn with_timeout<T, F>(&self, what: &str, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        match tokio::time::timeout(self.config.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout(format!("{what} exceeded {:?}", self.config.request_timeout))),
        }
    }

    // ── Hydrate ─────────────────────────────────────────────────────

    /// Pull full state from the server and replace local state with it.
    pub async fn hydrate(&self) -> HydrateOutcome {
        let _gate = self.gate.write().await;

        if !self.config.enabled {
            info!("sync disabled, using local storage only");
            self.publish(|s| {
                s.is_initial_sync = false;
                s.is_syncing = false;
                s.is_online = false;
                s.error = None;
            })
            .await;
            return HydrateOutcome::Disabled;
        }

        let has_local_data = self
            .local
            .store()
            .read(|s| !s.wallets.is_empty() || !s.assets.is_empty())
            .await;
        self.publish(|s| {
            if has_local_data {
                s.is_initial_sync = false;
            }
            s.is_syncing = true;
            s.error = None;
        })
        .await;

        let outcome = match tokio::time::timeout(self.config.hydrate_timeout, self.hydrate_inner()).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(HydrateError::Offline)) => HydrateOutcome::Offline,
            Ok(Err(HydrateError::Failed(e))) => HydrateOutcome::Failed(e.to_string()),
            Err(_) => HydrateOutcome::TimedOut,
        };

        match &outcome {
            HydrateOutcome::Synced { .. } => {
                self.mark_synced();
                self.publish(|s| {
                    s.is_initial_sync = false;
                    s.is_syncing = false;
                    s.is_online = true;
                    s.error = None;
                    s.last_sync_time = Some(Utc::now());
                })
                .await;
            }
            HydrateOutcome::Offline => {
                warn!("server unreachable, using local cache");
                self.publish(|s| {
                    s.is_initial_sync = false;
                    s.is_syncing = false;
                    s.is_online = false;
                    s.error = Some(OFFLINE_MESSAGE.to_string());
                })
                .await;
            }
            HydrateOutcome::TimedOut => {
                warn!("hydration exceeded {:?}, using local cache", self.config.hydrate_timeout);
                self.publish(|s| {
                    s.is_initial_sync = false;
                    s.is_syncing = false;
                    s.is_online = false;
                    s.error = Some(TIMEOUT_MESSAGE.to_string());
                })
                .await;
            }
            HydrateOutcome::Failed(message) => {
                warn!("hydration failed, keeping local state: {message}");
                let message = message.clone();
                self.publish(move |s| {
                    s.is_initial_sync = false;
                    s.is_syncing = false;
                    s.error = Some(message);
                })
                .await;
            }
            HydrateOutcome::Disabled => {}
        }
        outcome
    }

    async fn hydrate_inner(&self) -> Result<HydrateOutcome, HydrateError> {
        let health = tokio::time::timeout(self.config.health_timeout, self.backend.health()).await;
        match health {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("health check failed: {e}");
                return Err(HydrateError::Offline);
            }
            Err(_) => {
                debug!("health check timed out after {:?}", self.config.health_timeout);
                return Err(HydrateError::Offline);
            }
        }
        self.publish(|s| s.is_online = true).await;

        // Pending local changes must reach the server before its state
        // replaces ours, otherwise the pull would silently drop them.
        let replayed = self.replay_outbox().await.map_err(HydrateError::Failed)?;

        let payload = self
            .with_timeout("state pull", self.backend.fetch_state())
            .await
            .map_err(HydrateError::Failed)?;
        let state = payload.decode(Utc::now()).map_err(HydrateError::Failed)?;
        let (wallets, assets, custom_coins) = (state.wallets.len(), state.assets.len(), state.custom_coins.len());

        self.local
            .store()
            .replace_sync_state(state.wallets, state.assets, state.custom_coins)
            .await
            .map_err(HydrateError::Failed)?;

        info!("hydration complete: {wallets} wallets, {assets} assets, {custom_coins} custom coins");
        Ok(HydrateOutcome::Synced {
            wallets,
            assets,
            custom_coins,
            replayed,
        })
    }

    // ── Outbox replay ───────────────────────────────────────────────

    /// Send queued operations in order. Acknowledged and rejected operations
    /// leave the queue; a connectivity failure stops the replay and is returned.
    async fn replay_outbox(&self) -> Result<usize, CoreError> {
        let store = self.local.store();
        let ids: Vec<_> = store.pending_ops().await.into_iter().map(|op| op.id).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        info!("replaying {} pending operation(s)", ids.len());

        let mut replayed = 0;
        for id in ids {
            // Earlier creates may have remapped ids inside this op; reload it.
            let Some(op) = store.pending_ops().await.into_iter().find(|op| op.id == id) else {
                continue;
            };
            match self.replay_one(&op.change).await {
                Ok(()) => {
                    store.dequeue(op.id).await?;
                    replayed += 1;
                }
                Err(e) if e.is_connectivity() => {
                    store.record_attempt(op.id).await?;
                    return Err(e);
                }
                Err(e) => {
                    warn!("server rejected pending {}, dropping it: {e}", op.change.kind());
                    store.dequeue(op.id).await?;
                }
            }
        }
        Ok(replayed)
    }

    async fn replay_one(&self, change: &PendingChange) -> Result<(), CoreError> {
        let store = self.local.store();
        match change {
            PendingChange::CreateWallet { placeholder, wallet } => {
                let created = self.with_timeout("wallet create", self.backend.create_wallet(wallet)).await?;
                store.remap::<Wallet>(*placeholder, created.id).await?;
                Ok(())
            }
            PendingChange::UpdateWallet { id, patch } => {
                ensure_server_id("wallet", *id)?;
                self.with_timeout("wallet update", self.backend.update_wallet(*id, patch))
                    .await
            }
            PendingChange::DeleteWallet { id } => {
                if id.is_placeholder() {
                    return Ok(());
                }
                ignore_missing(self.with_timeout("wallet delete", self.backend.delete_wallet(*id)).await)
            }
            PendingChange::CreateAsset { placeholder, asset } => {
                ensure_server_id("wallet", asset.wallet_id)?;
                let created = self.with_timeout("asset create", self.backend.create_asset(asset)).await?;
                store.remap::<Asset>(*placeholder, created.id).await?;
                Ok(())
            }
            PendingChange::UpdateAsset { id, patch } => {
                ensure_server_id("asset", *id)?;
                self.with_timeout("asset update", self.backend.update_asset(*id, patch))
                    .await
            }
            PendingChange::DeleteAsset { id } => {
                if id.is_placeholder() {
                    return Ok(());
                }
                ignore_missing(self.with_timeout("asset delete", self.backend.delete_asset(*id)).await)
            }
        }
    }

    async fn enqueue(&self, change: PendingChange) -> Result<(), CoreError> {
        self.local
            .store()
            .enqueue(PendingOp::new(change, Utc::now()))
            .await?;
        Ok(())
    }

    async fn went_offline(&self, what: &str, e: &CoreError) {
        warn!("{what}: server unreachable, applied locally and queued: {e}");
        self.publish(|s| s.is_online = false).await;
    }

    /// A create the server did not acknowledge lives on under a placeholder id.
    async fn kept_locally(&self, what: &str, e: &CoreError) {
        if e.is_connectivity() {
            self.went_offline(what, e).await;
        } else {
            warn!("{what} rejected by server, kept locally and queued: {e}");
            self.publish(|_| {}).await;
        }
    }

    // ── Write-through ───────────────────────────────────────────────

    pub async fn create_wallet(&self, wallet: NewWallet) -> Result<Wallet, CoreError> {
        let _gate = self.gate.read().await;
        validate_new_wallet(&wallet)?;
        let now = Utc::now();

        if !self.config.enabled {
            return self.local.create_wallet(wallet, now).await;
        }

        match self.with_timeout("wallet create", self.backend.create_wallet(&wallet)).await {
            Ok(created) => self.local.store().upsert(created).await,
            Err(e) => {
                let local = self.local.create_wallet(wallet.clone(), now).await?;
                self.enqueue(PendingChange::CreateWallet {
                    placeholder: local.id,
                    wallet,
                })
                .await?;
                self.kept_locally("wallet create", &e).await;
                Ok(local)
            }
        }
    }

    pub async fn create_asset(&self, asset: NewAsset) -> Result<Asset, CoreError> {
        let _gate = self.gate.read().await;
        validate_new_asset(&asset)?;
        let now = Utc::now();
        self.local.get_wallet(asset.wallet_id).await?;

        if !self.config.enabled {
            return self.local.create_asset(asset, now).await;
        }

        // A wallet the server has never seen cannot own a server-side asset
        // yet; queue behind the wallet's own pending create.
        if asset.wallet_id.is_placeholder() {
            let local = self.queue_asset_create(asset, now).await?;
            self.publish(|_| {}).await;
            return Ok(local);
        }

        match self.with_timeout("asset create", self.backend.create_asset(&asset)).await {
            Ok(created) => self.local.store().upsert(created).await,
            Err(e) => {
                let local = self.queue_asset_create(asset, now).await?;
                self.kept_locally("asset create", &e).await;
                Ok(local)
            }
        }
    }

    async fn queue_asset_create(&self, asset: NewAsset, now: DateTime<Utc>) -> Result<Asset, CoreError> {
        let local = self.local.create_asset(asset.clone(), now).await?;
        self.enqueue(PendingChange::CreateAsset {
            placeholder: local.id,
            asset,
        })
        .await?;
        Ok(local)
    }

    pub async fn update_wallet(&self, id: RecordId, patch: WalletPatch) -> Result<Wallet, CoreError> {
        let _gate = self.gate.read().await;
        validate_wallet_patch(&patch)?;
        self.local.get_wallet(id).await?;

        let queue = self
            .propagate("wallet update", id, self.backend.update_wallet(id, &patch))
            .await;
        let updated = self.local.update_wallet(id, patch.clone()).await?;
        if queue {
            self.enqueue(PendingChange::UpdateWallet { id, patch }).await?;
            self.publish(|_| {}).await;
        }
        Ok(updated)
    }

    /// Deletes the wallet and its assets locally. Returns the number of assets removed.
    pub async fn delete_wallet(&self, id: RecordId) -> Result<usize, CoreError> {
        let _gate = self.gate.read().await;
        self.local.get_wallet(id).await?;

        let queue = self
            .propagate("wallet delete", id, self.backend.delete_wallet(id))
            .await;
        let removed = self.local.delete_wallet(id).await?;
        if queue {
            self.enqueue(PendingChange::DeleteWallet { id }).await?;
            self.publish(|_| {}).await;
        }
        Ok(removed)
    }

    pub async fn update_asset(&self, id: RecordId, patch: AssetPatch) -> Result<Asset, CoreError> {
        let _gate = self.gate.read().await;
        validate_asset_patch(&patch)?;
        self.local.get_asset(id).await?;

        let queue = self
            .propagate("asset update", id, self.backend.update_asset(id, &patch))
            .await;
        let updated = self.local.update_asset(id, patch.clone(), Utc::now()).await?;
        if queue {
            self.enqueue(PendingChange::UpdateAsset { id, patch }).await?;
            self.publish(|_| {}).await;
        }
        Ok(updated)
    }

    pub async fn delete_asset(&self, id: RecordId) -> Result<Asset, CoreError> {
        let _gate = self.gate.read().await;
        self.local.get_asset(id).await?;

        let queue = self
            .propagate("asset delete", id, self.backend.delete_asset(id))
            .await;
        let deleted = self.local.delete_asset(id).await?;
        if queue {
            self.enqueue(PendingChange::DeleteAsset { id }).await?;
            self.publish(|_| {}).await;
        }
        Ok(deleted)
    }

    /// Best-effort server call for an update or delete. Returns `true` when
    /// the change has to be queued for the next hydration.
    async fn propagate<F>(&self, what: &str, id: RecordId, call: F) -> bool
    where
        F: Future<Output = Result<(), CoreError>>,
    {
        if !self.config.enabled {
            return false;
        }
        // The server has never seen placeholder ids; the pending create
        // carries this change once it is replayed.
        if id.is_placeholder() {
            return true;
        }
        match self.with_timeout(what, call).await {
            Ok(()) => false,
            Err(e) if e.is_connectivity() => {
                self.went_offline(what, &e).await;
                true
            }
            Err(e) => {
                warn!("{what} for {id} rejected by server, applied locally anyway: {e}");
                false
            }
        }
    }

    // ── Full push ───────────────────────────────────────────────────

    /// Replace the server's wallets and assets with the local ones.
    ///
    /// Queued operations are replayed first so records created offline carry
    /// server ids. Records still under a placeholder id afterwards (their
    /// create was refused) are left out of the payload.
    pub async fn push_all(&self) -> Result<(), CoreError> {
        let _gate = self.gate.read().await;
        if !self.config.enabled {
            return Err(CoreError::SyncDisabled);
        }

        if let Some(last) = *self.last_sync.lock().unwrap_or_else(|e| e.into_inner()) {
            let since = last.elapsed();
            if since < self.config.min_push_interval {
                let retry_after_ms = (self.config.min_push_interval - since).as_millis() as u64;
                debug!("push rate limited, retry in {retry_after_ms} ms");
                return Err(CoreError::RateLimited { retry_after_ms });
            }
        }

        let now = Utc::now();
        self.publish(|s| s.is_syncing = true).await;
        let result = self.push_inner(now).await;
        match &result {
            Ok((wallets, assets)) => {
                self.mark_synced();
                info!("pushed {wallets} wallets and {assets} assets");
                self.publish(|s| {
                    s.is_syncing = false;
                    s.is_online = true;
                    s.error = None;
                    s.last_sync_time = Some(now);
                })
                .await;
            }
            Err(e) => {
                warn!("state push failed: {e}");
                let message = e.to_string();
                let offline = e.is_connectivity();
                self.publish(move |s| {
                    s.is_syncing = false;
                    if offline {
                        s.is_online = false;
                    }
                    s.error = Some(message);
                })
                .await;
            }
        }
        result.map(|_| ())
    }

    async fn push_inner(&self, now: DateTime<Utc>) -> Result<(usize, usize), CoreError> {
        let replayed = self.replay_outbox().await?;
        if replayed > 0 {
            debug!("replayed {replayed} pending operation(s) before push");
        }

        let (wallets, local_wallets): (Vec<Wallet>, Vec<Wallet>) = self
            .local
            .list_wallets()
            .await
            .into_iter()
            .partition(|w| w.id.is_server_assigned());
        let (assets, local_assets): (Vec<Asset>, Vec<Asset>) = self
            .local
            .list_assets(now)
            .await?
            .into_iter()
            .partition(|a| a.id.is_server_assigned() && a.wallet_id.is_server_assigned());
        if !local_wallets.is_empty() || !local_assets.is_empty() {
            warn!(
                "leaving {} wallet(s) and {} asset(s) without server ids out of the push",
                local_wallets.len(),
                local_assets.len()
            );
        }
        let custom_coins = self.local.list_custom_coins().await;
        let payload = SyncPayload::from_records(&wallets, &assets, &custom_coins, now);

        self.with_timeout("state push", self.backend.replace_state(&payload))
            .await?;
        Ok((wallets.len(), assets.len()))
    }
}

fn ensure_server_id(entity: &'static str, id: RecordId) -> Result<(), CoreError> {
    if id.is_placeholder() {
        Err(CoreError::ValidationError(format!(
            "{entity} {id} was never created on the server"
        )))
    } else {
        Ok(())
    }
}

/// A delete of something the server no longer has is already done.
fn ignore_missing(result: Result<(), CoreError>) -> Result<(), CoreError> {
    match result {
        Err(CoreError::Http { status: 404, .. }) | Err(CoreError::NotFound { .. }) => Ok(()),
        other => other,
    }
}

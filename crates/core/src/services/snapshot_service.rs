use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::errors::CoreError;
use crate::models::asset::Asset;
use crate::models::coin::CoinResolver;
use crate::models::ids::RecordId;
use crate::models::snapshot::{PortfolioSnapshot, SnapshotData};

use super::asset_service::AssetService;
use super::price_service::PriceService;

/// Result of valuing a set of assets.
#[derive(Debug, Clone, PartialEq)]
pub struct Valuation {
    pub total_value: f64,
    pub data: SnapshotData,
    /// Assets for which a positive price was known.
    pub priced_assets: usize,
}

/// Value `assets` against `prices` (keyed by price id). Unknown prices count
/// as zero. Coins are aggregated by upper-cased symbol.
pub fn value_assets(assets: &[Asset], prices: &HashMap<String, f64>, resolver: &CoinResolver) -> Valuation {
    let mut data = SnapshotData::default();
    let mut total_value = 0.0;
    let mut priced_assets = 0;

    for asset in assets {
        if !asset.amount.is_finite() {
            warn!("asset {} has a non-finite amount, left out of the snapshot", asset.id);
            continue;
        }
        let price = prices
            .get(&resolver.resolve(&asset.symbol))
            .copied()
            .unwrap_or(0.0);
        if price > 0.0 {
            priced_assets += 1;
        }
        let value = asset.amount * price;

        *data.wallets.entry(asset.wallet_id).or_insert(0.0) += value;
        let coin = data.coins.entry(asset.symbol.to_uppercase()).or_default();
        coin.amount += asset.amount;
        coin.value += value;
        total_value += value;
    }

    Valuation {
        total_value,
        data,
        priced_assets,
    }
}

/// Periodic portfolio valuation with a rolling retention window.
pub struct SnapshotService {
    assets: AssetService,
    prices: Arc<PriceService>,
    retention: Duration,
    /// How old a cached price may be before the cycle refreshes it.
    price_max_age: Duration,
    run_guard: Mutex<()>,
}

impl SnapshotService {
    pub fn new(assets: AssetService, prices: Arc<PriceService>, retention: Duration) -> Self {
        Self {
            assets,
            prices,
            retention,
            price_max_age: Duration::minutes(5),
            run_guard: Mutex::new(()),
        }
    }

    /// Manual trigger. Waits for an in-flight cycle, then runs.
    pub async fn capture_now(&self) -> Result<Option<PortfolioSnapshot>, CoreError> {
        let _guard = self.run_guard.lock().await;
        self.capture(Utc::now()).await
    }

    /// Scheduled tick. Skips when a cycle is already running; errors are logged.
    pub async fn try_capture(&self) -> Option<PortfolioSnapshot> {
        let Ok(_guard) = self.run_guard.try_lock() else {
            warn!("snapshot cycle still running, skipping this tick");
            return None;
        };
        match self.capture(Utc::now()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("snapshot cycle failed: {e}");
                None
            }
        }
    }

    /// One cycle at `now`: value every asset, insert a snapshot, prune.
    /// Returns `None` (and writes nothing) when there are no assets.
    pub async fn capture(&self, now: DateTime<Utc>) -> Result<Option<PortfolioSnapshot>, CoreError> {
        let assets = self.assets.list_assets(now).await?;
        if assets.is_empty() {
            debug!("no assets, skipping snapshot");
            return Ok(None);
        }

        let resolver = self.assets.coin_resolver().await;
        let price_ids: Vec<String> = assets
            .iter()
            .map(|a| resolver.resolve(&a.symbol))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let prices = self.prices.prices_for(&price_ids, self.price_max_age, now).await;

        let valuation = value_assets(&assets, &prices, &resolver);
        let snapshot = PortfolioSnapshot {
            id: RecordId(0),
            timestamp: now,
            total_value: valuation.total_value,
            snapshot_data: valuation.data,
        };
        let snapshot = self.assets.store().insert(snapshot).await?;
        info!(
            "snapshot saved: ${:.2} ({}/{} assets priced)",
            snapshot.total_value,
            valuation.priced_assets,
            assets.len()
        );

        match self.prune(now - self.retention).await {
            Ok(0) => {}
            Ok(removed) => info!("pruned {removed} snapshots older than the retention window"),
            Err(e) => warn!("snapshot pruning failed: {e}"),
        }
        Ok(Some(snapshot))
    }

    /// Delete snapshots taken before `cutoff`.
    pub async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, CoreError> {
        let any_old = self
            .assets
            .store()
            .read(|s| s.snapshots.values().any(|snap| snap.timestamp < cutoff))
            .await;
        if !any_old {
            return Ok(0);
        }
        self.assets
            .store()
            .transaction(move |state, _| {
                let before = state.snapshots.len();
                state.snapshots.retain(|_, snap| snap.timestamp >= cutoff);
                Ok(before - state.snapshots.len())
            })
            .await
    }

    /// Snapshots taken at or after `since`, oldest first.
    pub async fn history(&self, since: DateTime<Utc>) -> Vec<PortfolioSnapshot> {
        let mut snapshots = self
            .assets
            .store()
            .list_where::<PortfolioSnapshot, _>(|s| s.timestamp >= since)
            .await;
        snapshots.sort_by_key(|s| s.timestamp);
        snapshots
    }

    /// Snapshots from the last `hours` hours.
    pub async fn recent(&self, hours: i64, now: DateTime<Utc>) -> Vec<PortfolioSnapshot> {
        self.history(now - Duration::hours(hours)).await
    }

    pub async fn count(&self) -> usize {
        self.assets.store().count::<PortfolioSnapshot>().await
    }
}

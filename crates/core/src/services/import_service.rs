//! Exchange balance auto-import.
//!
//! For every stored credential: fetch balances, find or create the exchange
//! wallet and reconcile each balance into exactly one auto-synced asset.
//! Assets whose `auto_sync` is not `true` are never modified.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::errors::CoreError;
use crate::models::api_key::ApiKey;
use crate::models::asset::Asset;
use crate::models::balance::ExchangeBalance;
use crate::models::ids::{IdSpace, RecordId};
use crate::models::wallet::NewWallet;
use crate::providers::traits::BalanceProvider;
use crate::storage::record_store::StoreState;

use super::asset_service::AssetService;

/// Amounts closer than this are considered unchanged.
pub const AMOUNT_EPSILON: f64 = 1e-8;

/// What happened to one exchange during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeOutcome {
    pub exchange: String,
    pub wallet_id: Option<RecordId>,
    pub wallet_created: bool,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub migrated: usize,
    /// Set when this exchange was skipped; its assets were left untouched.
    pub error: Option<String>,
}

impl ExchangeOutcome {
    fn failed(exchange: &str, error: &CoreError) -> Self {
        Self {
            exchange: exchange.to_string(),
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn changed(&self) -> usize {
        self.created + self.updated
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exchanges: Vec<ExchangeOutcome>,
}

impl ImportReport {
    pub fn total_changed(&self) -> usize {
        self.exchanges.iter().map(ExchangeOutcome::changed).sum()
    }

    pub fn failed_exchanges(&self) -> Vec<&str> {
        self.exchanges
            .iter()
            .filter(|o| o.error.is_some())
            .map(|o| o.exchange.as_str())
            .collect()
    }
}

/// Reconcile one exchange's balances into `state`.
///
/// Runs inside a single store transaction so a concurrent writer never sees
/// a half-reconciled exchange.
pub fn reconcile_exchange(
    state: &mut StoreState,
    space: IdSpace,
    exchange: &str,
    balances: &[ExchangeBalance],
    now: DateTime<Utc>,
) -> ExchangeOutcome {
    let mut outcome = ExchangeOutcome {
        exchange: exchange.to_string(),
        ..ExchangeOutcome::default()
    };

    let wallet_id = match state
        .wallets
        .values()
        .find(|w| w.is_exchange_wallet_for(exchange))
    {
        Some(wallet) => wallet.id,
        None => {
            let id = state.allocate_id(space);
            let wallet = NewWallet::exchange(exchange).into_wallet(id, now);
            info!("{exchange}: created exchange wallet {} ({})", id, wallet.name);
            state.wallets.insert(id, wallet);
            outcome.wallet_created = true;
            id
        }
    };
    outcome.wallet_id = Some(wallet_id);

    for balance in balances {
        let symbol = balance.symbol.as_str();
        let same_slot = |a: &Asset| a.wallet_id == wallet_id && a.matches_symbol(symbol);

        let mut target = state
            .assets
            .values()
            .find(|a| same_slot(a) && a.is_auto_synced())
            .map(|a| a.id);

        if target.is_none() {
            let legacy: Vec<(RecordId, bool)> = state
                .assets
                .values()
                .filter(|a| same_slot(a) && a.auto_sync.is_none())
                .map(|a| (a.id, a.looks_like_legacy_import()))
                .collect();
            if let [(id, true)] = legacy.as_slice() {
                let id = *id;
                if let Some(asset) = state.assets.get_mut(&id) {
                    asset.auto_sync = Some(true);
                    asset.updated_at = now;
                }
                info!("{exchange}: migrated legacy asset {id} ({symbol}) to auto-sync");
                outcome.migrated += 1;
                target = Some(id);
            } else if legacy.len() > 1 {
                debug!("{exchange}: {} legacy {symbol} candidates, not migrating", legacy.len());
            }
        }

        match target.and_then(|id| state.assets.get_mut(&id)) {
            Some(asset) => {
                if (asset.amount - balance.total).abs() > AMOUNT_EPSILON {
                    debug!("{exchange}: {symbol} {} -> {}", asset.amount, balance.total);
                    asset.amount = balance.total;
                    asset.updated_at = now;
                    outcome.updated += 1;
                } else {
                    outcome.unchanged += 1;
                }
            }
            None => {
                let id = state.allocate_id(space);
                let asset = Asset {
                    id,
                    wallet_id,
                    symbol: symbol.to_string(),
                    amount: balance.total,
                    tags: None,
                    notes: Some(format!("Auto-imported from {}", exchange.to_uppercase())),
                    auto_sync: Some(true),
                    earn_config: None,
                    created_at: now,
                    updated_at: now,
                };
                debug!("{exchange}: added {symbol} {} as asset {id}", balance.total);
                state.assets.insert(id, asset);
                outcome.created += 1;
            }
        }
    }

    outcome
}

/// Periodic exchange balance importer.
///
/// Runs never overlap: scheduled ticks skip while a run is in progress,
/// manual triggers wait for it to finish and then run.
pub struct ExchangeImporter {
    assets: AssetService,
    balances: Arc<dyn BalanceProvider>,
    run_guard: Mutex<()>,
}

impl ExchangeImporter {
    pub fn new(assets: AssetService, balances: Arc<dyn BalanceProvider>) -> Self {
        Self {
            assets,
            balances,
            run_guard: Mutex::new(()),
        }
    }

    /// Manual trigger. Waits for an in-flight run, then runs.
    pub async fn run_now(&self) -> ImportReport {
        let _guard = self.run_guard.lock().await;
        self.run_locked(Utc::now()).await
    }

    /// Scheduled tick. Returns `None` when a run is already in progress.
    pub async fn try_run(&self) -> Option<ImportReport> {
        let Ok(_guard) = self.run_guard.try_lock() else {
            warn!("exchange import still running, skipping this tick");
            return None;
        };
        Some(self.run_locked(Utc::now()).await)
    }

    async fn run_locked(&self, started_at: DateTime<Utc>) -> ImportReport {
        let keys = self.assets.list_api_keys().await;
        if keys.is_empty() {
            debug!("no exchange credentials configured, skipping import");
        } else {
            info!("importing balances from {} exchange(s)", keys.len());
        }

        let mut exchanges = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = match self.import_one(&key).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("{}: import failed: {e}", key.exchange);
                    ExchangeOutcome::failed(&key.exchange, &e)
                }
            };
            exchanges.push(outcome);
        }

        let report = ImportReport {
            started_at,
            finished_at: Utc::now(),
            exchanges,
        };
        info!(
            "exchange import finished in {} ms: {} assets changed, {} exchange(s) failed",
            (report.finished_at - report.started_at).num_milliseconds(),
            report.total_changed(),
            report.failed_exchanges().len()
        );
        report
    }

    async fn import_one(&self, key: &ApiKey) -> Result<ExchangeOutcome, CoreError> {
        let exchange = key.exchange.as_str();
        let (api_key, api_secret, password) = self.assets.reveal(key)?;
        let fetched = self
            .balances
            .fetch_balances(exchange, &api_key, &api_secret, password.as_deref())
            .await?;

        let now = Utc::now();
        if let Err(e) = self.assets.touch_api_key(key.id, now).await {
            warn!("{exchange}: could not record last use: {e}");
        }

        let holdings: Vec<ExchangeBalance> = fetched.into_iter().filter(ExchangeBalance::is_holding).collect();
        if holdings.is_empty() {
            debug!("{exchange}: no balances to import");
            return Ok(ExchangeOutcome {
                exchange: exchange.to_string(),
                ..ExchangeOutcome::default()
            });
        }

        let exchange_name = exchange.to_string();
        let outcome = self
            .assets
            .store()
            .transaction(move |state, space| Ok(reconcile_exchange(state, space, &exchange_name, &holdings, now)))
            .await?;

        info!(
            "{exchange}: {} created, {} updated, {} unchanged, {} migrated",
            outcome.created, outcome.updated, outcome.unchanged, outcome.migrated
        );
        Ok(outcome)
    }
}

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::sync::Arc;

use crate::errors::CoreError;
use crate::models::asset::{Asset, EarnConfig, EarnPosition, InterestType};
use crate::storage::record_store::RecordStore;

const HOURS_PER_YEAR: f64 = 365.0 * 24.0;

/// Round to 8 decimal places, the smallest unit most exchanges report.
pub fn round8(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

/// Reject configurations the accrual math cannot handle.
pub fn validate_earn_config(config: &EarnConfig) -> Result<(), CoreError> {
    if config.payout_interval_hours == 0 {
        return Err(CoreError::ValidationError(
            "payout interval must be at least one hour".into(),
        ));
    }
    if !config.apy.is_finite() || config.apy < 0.0 {
        return Err(CoreError::ValidationError(format!(
            "APY must be a finite non-negative percentage, got {}",
            config.apy
        )));
    }
    Ok(())
}

/// Number of whole payout periods elapsed at `now`. Zero for disabled or
/// absent configurations.
pub fn due_periods(asset: &Asset, now: DateTime<Utc>) -> i64 {
    match &asset.earn_config {
        Some(config) if config.enabled && config.payout_interval_hours > 0 => {
            let elapsed = now.timestamp_millis() - config.last_payout_at;
            if elapsed <= 0 {
                0
            } else {
                elapsed / config.interval_ms()
            }
        }
        _ => 0,
    }
}

/// Apply every payout period that completed since `last_payout_at`.
///
/// The payout anchor advances by whole periods, never to `now`, so irregular
/// invocation timing does not drift the schedule. Returns `true` when the
/// asset changed. Calling it again within the same period is a no-op.
pub fn accrue(asset: &mut Asset, now: DateTime<Utc>) -> Result<bool, CoreError> {
    let Some(config) = asset.earn_config.as_ref() else {
        return Ok(false);
    };
    if !config.enabled {
        return Ok(false);
    }
    validate_earn_config(config)?;
    if !asset.amount.is_finite() {
        return Err(CoreError::ValidationError(format!(
            "asset {} has a non-finite amount",
            asset.id
        )));
    }

    let periods = due_periods(asset, now);
    if periods <= 0 {
        return Ok(false);
    }

    let hours = f64::from(config.payout_interval_hours);
    let rate_per_period = (config.apy / 100.0) / (HOURS_PER_YEAR / hours);
    let new_amount = match config.interest_type {
        InterestType::Compound => asset.amount * (1.0 + rate_per_period).powf(periods as f64),
        InterestType::Simple => asset.amount + asset.amount * rate_per_period * periods as f64,
    };
    if !new_amount.is_finite() {
        return Err(CoreError::ValidationError(format!(
            "accrual for asset {} overflowed",
            asset.id
        )));
    }

    let advance = periods
        .checked_mul(config.interval_ms())
        .and_then(|ms| config.last_payout_at.checked_add(ms))
        .ok_or_else(|| CoreError::ValidationError(format!("payout anchor overflow for asset {}", asset.id)))?;

    asset.amount = round8(new_amount);
    if let Some(config) = asset.earn_config.as_mut() {
        config.last_payout_at = advance;
    }
    asset.updated_at = now;
    Ok(true)
}

/// Accrue every due asset in place and return the mutated subset.
/// A failure on one asset is logged and skipped.
pub fn accrue_due(assets: &mut [Asset], now: DateTime<Utc>) -> Vec<Asset> {
    let mut mutated = Vec::new();
    for asset in assets.iter_mut() {
        match accrue(asset, now) {
            Ok(true) => {
                debug!("accrued interest on asset {} ({}): {}", asset.id, asset.symbol, asset.amount);
                mutated.push(asset.clone());
            }
            Ok(false) => {}
            Err(e) => warn!("skipping accrual for asset {}: {e}", asset.id),
        }
    }
    mutated
}

/// Due for a payout and carrying a configuration [`accrue`] accepts.
fn is_accruable(asset: &Asset, now: DateTime<Utc>) -> bool {
    due_periods(asset, now) > 0
        && asset.amount.is_finite()
        && asset
            .earn_config
            .as_ref()
            .is_some_and(|c| validate_earn_config(c).is_ok())
}

/// Earn schedule of an asset as of `now`.
pub fn earn_position(asset: &Asset, now: DateTime<Utc>) -> Option<EarnPosition> {
    let config = asset.earn_config.as_ref().filter(|c| c.enabled)?;
    let next_payout_at = config.next_payout_at();
    Some(EarnPosition {
        asset: asset.clone(),
        next_payout_at,
        time_until_payout_ms: (next_payout_at - now.timestamp_millis()).max(0),
    })
}

/// Runs accrual against a [`RecordStore`].
#[derive(Clone)]
pub struct EarnService {
    store: Arc<RecordStore>,
}

impl EarnService {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Accrue all due assets in the store as one atomic read-compute-write.
    ///
    /// A read-only pass first checks whether anything is due, so the common
    /// case does not commit. Accrual inside the transaction is recomputed on
    /// the latest state, which keeps concurrent writers from interleaving.
    pub async fn accrue_stored(&self, now: DateTime<Utc>) -> Result<Vec<Asset>, CoreError> {
        let any_due = self
            .store
            .read(|s| s.assets.values().any(|a| is_accruable(a, now)))
            .await;
        if !any_due {
            return Ok(Vec::new());
        }

        let mutated = self
            .store
            .transaction_if_changed(move |state, _| {
                let mut mutated = Vec::new();
                for asset in state.assets.values_mut() {
                    match accrue(asset, now) {
                        Ok(true) => mutated.push(asset.clone()),
                        Ok(false) => {}
                        Err(e) => warn!("skipping accrual for asset {}: {e}", asset.id),
                    }
                }
                Ok((!mutated.is_empty()).then_some(mutated))
            })
            .await?;
        Ok(mutated.unwrap_or_default())
    }

    /// Write back assets accrued outside the store. Assets deleted in the
    /// meantime are ignored; otherwise last writer wins.
    pub async fn persist(&self, mutated: Vec<Asset>) -> Result<usize, CoreError> {
        if mutated.is_empty() {
            return Ok(0);
        }
        self.store
            .transaction(move |state, _| {
                let mut written = 0;
                for asset in mutated {
                    if let Some(slot) = state.assets.get_mut(&asset.id) {
                        *slot = asset;
                        written += 1;
                    }
                }
                Ok(written)
            })
            .await
    }
}

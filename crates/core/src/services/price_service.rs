use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::errors::CoreError;
use crate::models::price::{PriceBook, PricePoint};
use crate::providers::registry::PriceProviderRegistry;

/// Points served by [`PriceService::history`] when no limit is given:
/// a week of five-minute refreshes.
pub const DEFAULT_HISTORY_LIMIT: usize = 2016;

/// Keeps a [`PriceBook`] of latest USD prices fresh and its history bounded.
///
/// Cache strategy:
/// - prices younger than `max_age` are served without a network call;
/// - stale or missing ids are refreshed in one registry lookup;
/// - a failed refresh keeps serving the last known price, so valuations
///   degrade to slightly old numbers instead of zeros.
///
/// Every refreshed price is also appended to the history, which
/// [`refresh_cycle`](Self::refresh_cycle) prunes to `history_retention`.
pub struct PriceService {
    registry: PriceProviderRegistry,
    book: RwLock<PriceBook>,
    history_retention: Duration,
}

impl PriceService {
    pub fn new(registry: PriceProviderRegistry) -> Self {
        Self::with_book(registry, PriceBook::new())
    }

    /// Start from previously known prices.
    pub fn with_book(registry: PriceProviderRegistry, book: PriceBook) -> Self {
        Self {
            registry,
            book: RwLock::new(book),
            history_retention: Duration::days(30),
        }
    }

    pub fn with_history_retention(mut self, retention: Duration) -> Self {
        self.history_retention = retention;
        self
    }

    /// Fetch `price_ids` and record them. Returns how many were updated.
    pub async fn refresh(&self, price_ids: &[String], now: DateTime<Utc>) -> Result<usize, CoreError> {
        if price_ids.is_empty() {
            return Ok(0);
        }
        let prices = self.registry.latest_usd_prices(price_ids).await?;
        let mut book = self.book.write().await;
        for (id, price) in &prices {
            book.set(id.clone(), *price, now);
        }
        debug!("refreshed {}/{} prices", prices.len(), price_ids.len());
        Ok(prices.len())
    }

    /// Latest known prices for `price_ids`, refreshing those older than
    /// `max_age` first. Ids with no known price are absent.
    pub async fn prices_for(
        &self,
        price_ids: &[String],
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> HashMap<String, f64> {
        let stale: Vec<String> = {
            let book = self.book.read().await;
            price_ids
                .iter()
                .filter(|id| book.is_stale(id, now, max_age))
                .cloned()
                .collect()
        };
        if !stale.is_empty() {
            if let Err(e) = self.refresh(&stale, now).await {
                warn!("price refresh failed, using last known prices: {e}");
            }
        }

        let book = self.book.read().await;
        price_ids
            .iter()
            .filter_map(|id| book.get(id).map(|p| (id.clone(), p)))
            .collect()
    }

    pub async fn latest(&self, price_id: &str) -> Option<f64> {
        self.book.read().await.get(price_id)
    }

    /// Record a price obtained elsewhere.
    pub async fn set_price(&self, price_id: &str, price_usd: f64, at: DateTime<Utc>) -> Result<(), CoreError> {
        if !price_usd.is_finite() || price_usd < 0.0 {
            return Err(CoreError::ValidationError(format!(
                "price for {price_id} must be finite and non-negative"
            )));
        }
        self.book.write().await.set(price_id, price_usd, at);
        Ok(())
    }

    // ── History ─────────────────────────────────────────────────────

    /// One scheduled refresh: fetch `price_ids`, then drop history older than
    /// the retention window. A failed fetch is logged and counts as zero.
    pub async fn refresh_cycle(&self, price_ids: &[String], now: DateTime<Utc>) -> usize {
        let refreshed = match self.refresh(price_ids, now).await {
            Ok(n) => n,
            Err(e) => {
                warn!("price refresh failed, will retry next cycle: {e}");
                0
            }
        };
        let pruned = self.prune_history(now - self.history_retention).await;
        if pruned > 0 {
            info!("pruned {pruned} price history points older than the retention window");
        }
        refreshed
    }

    /// Up to `limit` most recent points for `price_id`, newest first.
    pub async fn history(&self, price_id: &str, limit: Option<usize>) -> Vec<PricePoint> {
        self.book
            .read()
            .await
            .history(price_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
    }

    /// Points for `price_id` between `from` and `to` inclusive, oldest first.
    pub async fn history_range(&self, price_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<PricePoint> {
        self.book.read().await.history_range(price_id, from, to)
    }

    pub async fn prune_history(&self, cutoff: DateTime<Utc>) -> usize {
        self.book.write().await.prune_history(cutoff)
    }

    pub async fn book(&self) -> PriceBook {
        self.book.read().await.clone()
    }
}

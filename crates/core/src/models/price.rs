use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Latest known USD price of one price id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatestPrice {
    pub price_usd: f64,
    pub last_updated: DateTime<Utc>,
}

/// One recorded observation in a price id's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price_usd: f64,
}

/// Latest USD prices keyed by price-provider id (e.g. "bitcoin"), plus the
/// history of every recorded observation.
///
/// A failed refresh leaves the previous price in place so valuations keep
/// working offline. History is kept sorted by timestamp with at most one
/// point per (id, timestamp) and only shrinks through [`PriceBook::prune_history`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceBook {
    entries: HashMap<String, LatestPrice>,
    history: HashMap<String, Vec<PricePoint>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, price_id: &str) -> Option<f64> {
        self.entries.get(price_id).map(|p| p.price_usd)
    }

    /// Record an observation: it becomes the latest price unless a newer one
    /// is already known, and joins the history.
    pub fn set(&mut self, price_id: impl Into<String>, price_usd: f64, at: DateTime<Utc>) {
        let price_id = price_id.into();

        let points = self.history.entry(price_id.clone()).or_default();
        if let Err(pos) = points.binary_search_by_key(&at, |p| p.timestamp) {
            points.insert(
                pos,
                PricePoint {
                    timestamp: at,
                    price_usd,
                },
            );
        }

        let newer_known = self
            .entries
            .get(&price_id)
            .is_some_and(|p| p.last_updated > at);
        if !newer_known {
            self.entries.insert(
                price_id,
                LatestPrice {
                    price_usd,
                    last_updated: at,
                },
            );
        }
    }

    /// `true` when the price is missing or older than `max_age`.
    pub fn is_stale(&self, price_id: &str, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        self.entries
            .get(price_id)
            .map_or(true, |p| now - p.last_updated > max_age)
    }

    /// Up to `limit` most recent points, newest first.
    pub fn history(&self, price_id: &str, limit: usize) -> Vec<PricePoint> {
        self.history
            .get(price_id)
            .map(|points| points.iter().rev().take(limit).copied().collect())
            .unwrap_or_default()
    }

    /// Points with `from <= timestamp <= to`, oldest first.
    pub fn history_range(&self, price_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<PricePoint> {
        self.history
            .get(price_id)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.timestamp >= from && p.timestamp <= to)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop history points older than `cutoff`. Latest prices are kept.
    pub fn prune_history(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.history.retain(|_, points| {
            let before = points.len();
            points.retain(|p| p.timestamp >= cutoff);
            removed += before - points.len();
            !points.is_empty()
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

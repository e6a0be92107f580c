use std::collections::HashMap;

use log::warn;

use crate::errors::CoreError;

use super::coingecko::CoinGeckoProvider;
use super::traits::PriceProvider;

/// Ordered list of price providers.
///
/// New providers can be added without touching callers. Lookups walk the
/// list and ask each provider only for the ids still missing.
pub struct PriceProviderRegistry {
    providers: Vec<Box<dyn PriceProvider>>,
}

impl PriceProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Registry with CoinGecko (no API key needed).
    pub fn new_with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CoinGeckoProvider::new()));
        registry
    }

    /// Register a new price provider. Earlier registrations take priority.
    pub fn register(&mut self, provider: Box<dyn PriceProvider>) {
        self.providers.push(provider);
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolve as many `price_ids` as possible, falling back provider by
    /// provider. Only finite, non-negative prices are accepted.
    ///
    /// Fails only when every provider failed and nothing was resolved.
    pub async fn latest_usd_prices(&self, price_ids: &[String]) -> Result<HashMap<String, f64>, CoreError> {
        let mut resolved: HashMap<String, f64> = HashMap::new();
        let mut last_error: Option<CoreError> = None;

        for provider in &self.providers {
            let missing: Vec<String> = price_ids
                .iter()
                .filter(|id| !resolved.contains_key(*id))
                .cloned()
                .collect();
            if missing.is_empty() {
                break;
            }

            match provider.latest_usd_prices(&missing).await {
                Ok(prices) => {
                    for (id, price) in prices {
                        if price.is_finite() && price >= 0.0 && missing.contains(&id) {
                            resolved.insert(id, price);
                        }
                    }
                }
                Err(e) => {
                    warn!("price provider {} failed: {e}", provider.name());
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if resolved.is_empty() && !price_ids.is_empty() => Err(e),
            _ => Ok(resolved),
        }
    }
}

impl Default for PriceProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

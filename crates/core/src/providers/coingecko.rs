use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::CoreError;
use super::traits::PriceProvider;

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Maximum number of ids per `simple/price` request.
const MAX_IDS_PER_REQUEST: usize = 100;

/// CoinGecko public API provider.
///
/// - **Free**: no API key required, modest rate limits.
/// - **Endpoint**: `/simple/price?ids=...&vs_currencies=usd`
///
/// Ids are CoinGecko ids ("bitcoin", "ethereum"); symbol resolution happens
/// upstream in `CoinResolver`.
pub struct CoinGeckoProvider {
    client: Client,
    base_url: String,
}

impl CoinGeckoProvider {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Point the provider at a mirror or proxy of the CoinGecko API.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for CoinGeckoProvider {
    fn default() -> Self {
        Self::new()
    }
}

// ── CoinGecko API response types ────────────────────────────────────

#[derive(Deserialize)]
struct SimplePriceEntry {
    usd: Option<f64>,
}

#[async_trait]
impl PriceProvider for CoinGeckoProvider {
    fn name(&self) -> &str {
        "CoinGecko"
    }

    async fn latest_usd_prices(&self, price_ids: &[String]) -> Result<HashMap<String, f64>, CoreError> {
        let mut prices = HashMap::new();

        for chunk in price_ids.chunks(MAX_IDS_PER_REQUEST) {
            let ids = chunk.join(",");
            let url = format!("{}/simple/price", self.base_url);

            let resp: HashMap<String, SimplePriceEntry> = self
                .client
                .get(&url)
                .query(&[("ids", ids.as_str()), ("vs_currencies", "usd")])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
                .map_err(|e| CoreError::Api {
                    provider: "CoinGecko".into(),
                    message: format!("Failed to parse simple/price response: {e}"),
                })?;

            for (id, entry) in resp {
                if let Some(usd) = entry.usd {
                    prices.insert(id, usd);
                }
            }
        }

        debug!("CoinGecko resolved {}/{} prices", prices.len(), price_ids.len());
        Ok(prices)
    }
}

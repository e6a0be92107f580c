// ═══════════════════════════════════════════════════════════════════
// Provider Tests — price registry, balance gateway, HTTP sync backend
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crypto_portfolio_core::errors::CoreError;
use crypto_portfolio_core::models::balance::{BalanceResponse, ExchangeBalance};
use crypto_portfolio_core::providers::balance_gateway::{merge_duplicate_symbols, BalanceGatewayProvider};
use crypto_portfolio_core::providers::coingecko::CoinGeckoProvider;
use crypto_portfolio_core::providers::http_backend::HttpBackend;
use crypto_portfolio_core::providers::registry::PriceProviderRegistry;
use crypto_portfolio_core::providers::traits::{BalanceProvider, PriceProvider, SyncBackend};

/// Nothing listens here; connections are refused right away.
const DEAD_ENDPOINT: &str = "http://127.0.0.1:1";

// ═══════════════════════════════════════════════════════════════════
// Test Helpers — Mock Providers
// ═══════════════════════════════════════════════════════════════════

/// Knows a fixed set of prices and counts the ids it was asked for.
struct MockProvider {
    name: &'static str,
    prices: HashMap<String, f64>,
    asked: Arc<AtomicUsize>,
}

impl MockProvider {
    fn new(name: &'static str, prices: &[(&str, f64)]) -> Self {
        Self {
            name,
            prices: prices.iter().map(|(id, p)| (id.to_string(), *p)).collect(),
            asked: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl PriceProvider for MockProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn latest_usd_prices(&self, price_ids: &[String]) -> Result<HashMap<String, f64>, CoreError> {
        self.asked.fetch_add(price_ids.len(), Ordering::SeqCst);
        Ok(price_ids
            .iter()
            .filter_map(|id| self.prices.get(id).map(|p| (id.clone(), *p)))
            .collect())
    }
}

struct FailingProvider;

#[async_trait]
impl PriceProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn latest_usd_prices(&self, _price_ids: &[String]) -> Result<HashMap<String, f64>, CoreError> {
        Err(CoreError::Network("unreachable".into()))
    }
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ═══════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════

mod registry {
    use super::*;

    #[test]
    fn defaults_register_coingecko() {
        let registry = PriceProviderRegistry::new_with_defaults();
        assert_eq!(registry.len(), 1);
        assert!(PriceProviderRegistry::new().is_empty());
    }

    #[tokio::test]
    async fn later_providers_only_see_missing_ids() {
        let first = MockProvider::new("first", &[("bitcoin", 100.0)]);
        let second = MockProvider::new("second", &[("bitcoin", 1.0), ("ethereum", 50.0)]);
        let second_asked = second.asked.clone();

        let mut registry = PriceProviderRegistry::new();
        registry.register(Box::new(first));
        registry.register(Box::new(second));

        let prices = registry.latest_usd_prices(&ids(&["bitcoin", "ethereum"])).await.unwrap();
        assert_eq!(prices["bitcoin"], 100.0);
        assert_eq!(prices["ethereum"], 50.0);
        assert_eq!(second_asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_once_everything_is_resolved() {
        let second = MockProvider::new("second", &[]);
        let second_asked = second.asked.clone();

        let mut registry = PriceProviderRegistry::new();
        registry.register(Box::new(MockProvider::new("first", &[("solana", 20.0)])));
        registry.register(Box::new(second));

        registry.latest_usd_prices(&ids(&["solana"])).await.unwrap();
        assert_eq!(second_asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_provider_falls_through() {
        let mut registry = PriceProviderRegistry::new();
        registry.register(Box::new(FailingProvider));
        registry.register(Box::new(MockProvider::new("backup", &[("tether", 1.0)])));

        let prices = registry.latest_usd_prices(&ids(&["tether"])).await.unwrap();
        assert_eq!(prices["tether"], 1.0);
    }

    #[tokio::test]
    async fn all_failing_is_an_error() {
        let mut registry = PriceProviderRegistry::new();
        registry.register(Box::new(FailingProvider));
        let err = registry.latest_usd_prices(&ids(&["bitcoin"])).await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn partial_answer_is_not_an_error() {
        let mut registry = PriceProviderRegistry::new();
        registry.register(Box::new(MockProvider::new("known", &[("bitcoin", 10.0)])));
        registry.register(Box::new(FailingProvider));

        let prices = registry.latest_usd_prices(&ids(&["bitcoin", "obscure"])).await.unwrap();
        assert_eq!(prices.len(), 1);
    }

    #[tokio::test]
    async fn rejects_negative_and_non_finite_prices() {
        let mut registry = PriceProviderRegistry::new();
        registry.register(Box::new(MockProvider::new(
            "broken",
            &[("a", -1.0), ("b", f64::NAN), ("c", f64::INFINITY), ("d", 0.0)],
        )));

        let prices = registry.latest_usd_prices(&ids(&["a", "b", "c", "d"])).await.unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices["d"], 0.0);
    }

    #[tokio::test]
    async fn empty_request_is_empty_answer() {
        let mut registry = PriceProviderRegistry::new();
        registry.register(Box::new(FailingProvider));
        assert!(registry.latest_usd_prices(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn coingecko_unreachable_is_a_connectivity_error() {
        let provider = CoinGeckoProvider::with_base_url(DEAD_ENDPOINT);
        let err = provider.latest_usd_prices(&ids(&["bitcoin"])).await.unwrap_err();
        assert!(err.is_connectivity(), "{err:?}");
    }
}

// ═══════════════════════════════════════════════════════════════════
// Balance gateway
// ═══════════════════════════════════════════════════════════════════

mod balance_gateway {
    use super::*;

    #[test]
    fn duplicates_are_summed_case_insensitively() {
        let merged = merge_duplicate_symbols(vec![
            ExchangeBalance::new("USDT", 10.0),
            ExchangeBalance::new("BTC", 0.5),
            ExchangeBalance::new("usdt", 5.0),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].symbol, "USDT");
        assert_eq!(merged[0].total, 15.0);
        assert_eq!(merged[0].free, 15.0);
        assert_eq!(merged[1].total, 0.5);
    }

    #[test]
    fn holding_filter() {
        assert!(ExchangeBalance::new("BTC", 0.1).is_holding());
        assert!(!ExchangeBalance::new("BTC", 0.0).is_holding());
        assert!(!ExchangeBalance::new("BTC", -2.0).is_holding());
        assert!(!ExchangeBalance::new("BTC", f64::NAN).is_holding());
    }

    #[test]
    fn response_parses_with_optional_fields() {
        let resp: BalanceResponse = serde_json::from_value(serde_json::json!({
            "success": true,
            "exchange": "okx",
            "data": [{ "symbol": "ETH", "total": 2.5 }]
        }))
        .unwrap();
        assert!(resp.success);
        assert_eq!(resp.data[0].total, 2.5);
        assert_eq!(resp.data[0].free, 0.0);
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_connectivity_error() {
        let provider = BalanceGatewayProvider::new(DEAD_ENDPOINT, Duration::from_secs(2));
        let err = provider
            .fetch_balances("okx", "key", "secret", None)
            .await
            .unwrap_err();
        assert!(err.is_connectivity(), "{err:?}");
    }
}

// ═══════════════════════════════════════════════════════════════════
// HTTP sync backend
// ═══════════════════════════════════════════════════════════════════

mod http_backend {
    use super::*;
    use crypto_portfolio_core::models::ids::RecordId;
    use crypto_portfolio_core::models::settings::Settings;

    #[tokio::test]
    async fn unreachable_server_fails_health_check() {
        let backend = HttpBackend::new(DEAD_ENDPOINT, Duration::from_secs(2), Duration::from_millis(500));
        let err = backend.health().await.unwrap_err();
        assert!(err.is_connectivity(), "{err:?}");
    }

    #[tokio::test]
    async fn unreachable_server_fails_writes_as_connectivity() {
        let settings = Settings {
            server_url: format!("{DEAD_ENDPOINT}/"),
            ..Settings::default()
        };
        let backend = HttpBackend::from_settings(&settings);
        assert_eq!(backend.name(), "http");
        let err = backend.delete_asset(RecordId(4)).await.unwrap_err();
        assert!(err.is_connectivity(), "{err:?}");
    }
}

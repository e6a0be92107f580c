// ═══════════════════════════════════════════════════════════════════
// Service Tests — earn accrual, AssetService, PriceService,
// SnapshotService
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crypto_portfolio_core::errors::CoreError;
use crypto_portfolio_core::models::api_key::NewApiKey;
use crypto_portfolio_core::models::asset::{Asset, AssetPatch, EarnConfig, InterestType, NewAsset};
use crypto_portfolio_core::models::coin::{CoinResolver, NewCustomCoin};
use crypto_portfolio_core::models::ids::{IdSpace, RecordId};
use crypto_portfolio_core::models::snapshot::PortfolioSnapshot;
use crypto_portfolio_core::models::wallet::{NewWallet, WalletPatch, WalletType};
use crypto_portfolio_core::providers::registry::PriceProviderRegistry;
use crypto_portfolio_core::providers::traits::PriceProvider;
use crypto_portfolio_core::services::asset_service::AssetService;
use crypto_portfolio_core::services::earn_service::{self, accrue, accrue_due, due_periods, earn_position, round8};
use crypto_portfolio_core::services::price_service::PriceService;
use crypto_portfolio_core::services::snapshot_service::{value_assets, SnapshotService};
use crypto_portfolio_core::storage::encryption::{KdfParams, PasswordCipher};
use crypto_portfolio_core::storage::persistence::{MemoryPersistence, Persistence};
use crypto_portfolio_core::storage::record_store::{RecordStore, StoreState};

// ═══════════════════════════════════════════════════════════════════
// Helpers & mocks
// ═══════════════════════════════════════════════════════════════════

const DAY_MS: i64 = 86_400_000;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
}

fn earning(amount: f64, apy: f64, interest_type: InterestType, interval_hours: u32) -> Asset {
    NewAsset::manual(RecordId(1), "USDT", amount)
        .with_earn(EarnConfig::new(apy, interest_type, interval_hours, t0()))
        .into_asset(RecordId(1), t0())
}

/// Counts committed images.
#[derive(Default)]
struct CountingPersistence {
    inner: MemoryPersistence,
    commits: AtomicUsize,
}

impl Persistence for CountingPersistence {
    fn load(&self) -> Result<Option<StoreState>, CoreError> {
        self.inner.load()
    }

    fn commit(&self, state: &StoreState) -> Result<(), CoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit(state)
    }
}

fn service() -> AssetService {
    AssetService::new(Arc::new(RecordStore::in_memory(IdSpace::Server)))
}

struct MockPriceProvider {
    prices: HashMap<String, f64>,
    calls: AtomicUsize,
}

impl MockPriceProvider {
    fn new(prices: &[(&str, f64)]) -> Self {
        Self {
            prices: prices.iter().map(|(id, p)| ((*id).to_string(), *p)).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PriceProvider for MockPriceProvider {
    fn name(&self) -> &str {
        "MockProvider"
    }

    async fn latest_usd_prices(&self, price_ids: &[String]) -> Result<HashMap<String, f64>, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(price_ids
            .iter()
            .filter_map(|id| self.prices.get(id).map(|p| (id.clone(), *p)))
            .collect())
    }
}

/// A mock that always fails (for testing fallback behavior).
struct FailingMockProvider;

#[async_trait]
impl PriceProvider for FailingMockProvider {
    fn name(&self) -> &str {
        "FailingMock"
    }

    async fn latest_usd_prices(&self, _price_ids: &[String]) -> Result<HashMap<String, f64>, CoreError> {
        Err(CoreError::Network("simulated outage".into()))
    }
}

fn registry_with(provider: impl PriceProvider + 'static) -> PriceProviderRegistry {
    let mut registry = PriceProviderRegistry::new();
    registry.register(Box::new(provider));
    registry
}

// ═══════════════════════════════════════════════════════════════════
// Earn accrual — pure functions
// ═══════════════════════════════════════════════════════════════════

mod earn_accrual {
    use super::*;

    #[test]
    fn round8_rounds_to_eight_places() {
        assert_eq!(round8(1.123456789), 1.12345679);
        assert_eq!(round8(2.0), 2.0);
    }

    #[test]
    fn nothing_due_before_first_boundary() {
        let mut asset = earning(1000.0, 10.0, InterestType::Compound, 24);
        let now = t0() + Duration::hours(23);
        assert_eq!(due_periods(&asset, now), 0);
        assert!(!accrue(&mut asset, now).unwrap());
        assert_eq!(asset.amount, 1000.0);
    }

    #[test]
    fn compound_one_period() {
        let mut asset = earning(1000.0, 10.0, InterestType::Compound, 24);
        assert!(accrue(&mut asset, t0() + Duration::days(1)).unwrap());
        let expected = round8(1000.0 * (1.0 + 0.1 / 365.0));
        assert!((asset.amount - expected).abs() < 1e-8);
    }

    #[test]
    fn compound_multiple_periods_compounds() {
        let mut asset = earning(1000.0, 10.0, InterestType::Compound, 24);
        accrue(&mut asset, t0() + Duration::days(3)).unwrap();
        let expected = 1000.0 * (1.0 + 0.1 / 365.0_f64).powi(3);
        assert!((asset.amount - expected).abs() < 1e-6);
    }

    #[test]
    fn simple_interest_is_linear_in_periods() {
        let mut asset = earning(1000.0, 10.0, InterestType::Simple, 24);
        accrue(&mut asset, t0() + Duration::days(2)).unwrap();
        let expected = 1000.0 + 1000.0 * (0.1 / 365.0) * 2.0;
        assert!((asset.amount - expected).abs() < 1e-6);
    }

    #[test]
    fn daily_payout_after_twenty_five_hours_matches_closed_form() {
        let now = t0() + Duration::hours(25);
        let rate = 0.12 / 365.0;

        let mut compound = earning(10_000.0, 12.0, InterestType::Compound, 24);
        assert!(accrue(&mut compound, now).unwrap());
        assert!((compound.amount - 10_000.0 * (1.0 + rate)).abs() < 1e-8);

        let mut simple = earning(10_000.0, 12.0, InterestType::Simple, 24);
        assert!(accrue(&mut simple, now).unwrap());
        assert!((simple.amount - (10_000.0 + 10_000.0 * rate)).abs() < 1e-8);
    }

    #[test]
    fn weekly_payout_accrues_nothing_after_twenty_five_hours() {
        for interest_type in [InterestType::Compound, InterestType::Simple] {
            let mut weekly = earning(10_000.0, 12.0, interest_type, 168);
            let before = weekly.earn_config.clone();
            assert!(!accrue(&mut weekly, t0() + Duration::hours(25)).unwrap());
            assert_eq!(weekly.amount, 10_000.0);
            assert_eq!(weekly.earn_config, before);
        }
    }

    #[test]
    fn anchor_advances_by_whole_periods() {
        let mut asset = earning(1000.0, 10.0, InterestType::Compound, 24);
        let now = t0() + Duration::hours(60);
        accrue(&mut asset, now).unwrap();
        let anchor = asset.earn_config.as_ref().unwrap().last_payout_at;
        assert_eq!(anchor, t0().timestamp_millis() + 2 * DAY_MS);
    }

    #[test]
    fn accrual_is_idempotent_within_a_period() {
        let mut asset = earning(1000.0, 10.0, InterestType::Compound, 24);
        let now = t0() + Duration::hours(30);
        assert!(accrue(&mut asset, now).unwrap());
        let after_first = asset.amount;
        assert!(!accrue(&mut asset, now).unwrap());
        assert!(!accrue(&mut asset, now + Duration::hours(5)).unwrap());
        assert_eq!(asset.amount, after_first);
    }

    #[test]
    fn split_invocations_match_a_single_catch_up() {
        let mut stepwise = earning(1000.0, 12.0, InterestType::Compound, 8);
        let mut catch_up = stepwise.clone();
        for h in [9, 17, 40, 49] {
            accrue(&mut stepwise, t0() + Duration::hours(h)).unwrap();
        }
        accrue(&mut catch_up, t0() + Duration::hours(49)).unwrap();
        assert!((stepwise.amount - catch_up.amount).abs() < 1e-6);
        assert_eq!(stepwise.earn_config, catch_up.earn_config);
    }

    #[test]
    fn disabled_config_never_accrues() {
        let mut asset = earning(1000.0, 10.0, InterestType::Compound, 24);
        asset.earn_config.as_mut().unwrap().enabled = false;
        assert_eq!(due_periods(&asset, t0() + Duration::days(10)), 0);
        assert!(!accrue(&mut asset, t0() + Duration::days(10)).unwrap());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut asset = earning(1000.0, 10.0, InterestType::Compound, 24);
        asset.earn_config.as_mut().unwrap().payout_interval_hours = 0;
        assert!(matches!(
            accrue(&mut asset, t0() + Duration::days(1)),
            Ok(false) | Err(CoreError::ValidationError(_))
        ));
        assert_eq!(asset.amount, 1000.0);
    }

    #[test]
    fn accrue_due_returns_only_mutated_assets() {
        let mut assets = vec![
            earning(1000.0, 10.0, InterestType::Compound, 24),
            NewAsset::manual(RecordId(1), "BTC", 1.0).into_asset(RecordId(2), t0()),
        ];
        let mutated = accrue_due(&mut assets, t0() + Duration::days(1));
        assert_eq!(mutated.len(), 1);
        assert_eq!(mutated[0].symbol, "USDT");
    }

    #[test]
    fn earn_position_reports_time_until_payout() {
        let asset = earning(1000.0, 10.0, InterestType::Compound, 24);
        let position = earn_position(&asset, t0() + Duration::hours(6)).unwrap();
        assert_eq!(position.next_payout_at, t0().timestamp_millis() + DAY_MS);
        assert_eq!(position.time_until_payout_ms, 18 * 3_600_000);

        let plain = NewAsset::manual(RecordId(1), "BTC", 1.0).into_asset(RecordId(2), t0());
        assert!(earn_service::earn_position(&plain, t0()).is_none());
    }
}

// ═══════════════════════════════════════════════════════════════════
// AssetService — wallets & assets
// ═══════════════════════════════════════════════════════════════════

mod asset_service_crud {
    use super::*;

    #[tokio::test]
    async fn create_wallet_validates_name() {
        let svc = service();
        let err = svc
            .create_wallet(NewWallet::new("   ", WalletType::Hot), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[tokio::test]
    async fn exchange_wallet_needs_exchange_name() {
        let svc = service();
        let err = svc
            .create_wallet(NewWallet::new("Binance", WalletType::Exchange), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[tokio::test]
    async fn find_exchange_wallet_is_case_insensitive() {
        let svc = service();
        let created = svc.create_wallet(NewWallet::exchange("Binance"), t0()).await.unwrap();
        assert_eq!(created.name, "BINANCE");
        assert_eq!(created.exchange_name.as_deref(), Some("binance"));
        assert_eq!(svc.find_exchange_wallet("BINANCE").await.unwrap().id, created.id);
    }

    #[tokio::test]
    async fn update_wallet_applies_patch() {
        let svc = service();
        let w = svc.create_wallet(NewWallet::new("Old", WalletType::Hot), t0()).await.unwrap();
        let patch = WalletPatch {
            name: Some("Ledger".into()),
            wallet_type: Some(WalletType::Cold),
            ..WalletPatch::default()
        };
        let updated = svc.update_wallet(w.id, patch).await.unwrap();
        assert_eq!(updated.name, "Ledger");
        assert_eq!(updated.wallet_type, WalletType::Cold);
    }

    #[tokio::test]
    async fn create_asset_rejects_negative_amount_and_unknown_wallet() {
        let svc = service();
        let w = svc.create_wallet(NewWallet::new("Main", WalletType::Hot), t0()).await.unwrap();
        assert!(matches!(
            svc.create_asset(NewAsset::manual(w.id, "BTC", -1.0), t0()).await,
            Err(CoreError::ValidationError(_))
        ));
        assert!(matches!(
            svc.create_asset(NewAsset::manual(RecordId(99), "BTC", 1.0), t0()).await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_asset_can_remove_earn_config() {
        let svc = service();
        let w = svc.create_wallet(NewWallet::new("Main", WalletType::Hot), t0()).await.unwrap();
        let a = svc
            .create_asset(
                NewAsset::manual(w.id, "USDT", 100.0).with_earn(EarnConfig::new(5.0, InterestType::Simple, 24, t0())),
                t0(),
            )
            .await
            .unwrap();

        let patch = AssetPatch {
            earn_config: Some(None),
            ..AssetPatch::default()
        };
        let updated = svc.update_asset(a.id, patch, t0()).await.unwrap();
        assert!(updated.earn_config.is_none());
    }

    #[tokio::test]
    async fn delete_wallet_reports_removed_assets() {
        let svc = service();
        let w = svc.create_wallet(NewWallet::new("Main", WalletType::Hot), t0()).await.unwrap();
        svc.create_asset(NewAsset::manual(w.id, "BTC", 1.0), t0()).await.unwrap();
        svc.create_asset(NewAsset::manual(w.id, "ETH", 1.0), t0()).await.unwrap();
        assert_eq!(svc.delete_wallet(w.id).await.unwrap(), 2);
        assert!(svc.list_assets(t0()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_assets_persists_due_interest() {
        let svc = service();
        let w = svc.create_wallet(NewWallet::new("Earn", WalletType::Hot), t0()).await.unwrap();
        let a = svc
            .create_asset(
                NewAsset::manual(w.id, "USDT", 1000.0)
                    .with_earn(EarnConfig::new(10.0, InterestType::Compound, 24, t0())),
                t0(),
            )
            .await
            .unwrap();

        let later = t0() + Duration::days(1) + Duration::minutes(1);
        let listed = svc.list_assets(later).await.unwrap();
        assert!(listed[0].amount > 1000.0);

        // Stored, not just computed.
        let stored = svc.get_asset(a.id).await.unwrap();
        assert_eq!(stored.amount, listed[0].amount);

        // A second listing in the same period does not accrue again.
        let again = svc.list_assets(later + Duration::hours(1)).await.unwrap();
        assert_eq!(again[0].amount, listed[0].amount);
    }

    #[tokio::test]
    async fn two_phase_accrual_writes_back_only_live_assets() {
        let store = Arc::new(RecordStore::in_memory(IdSpace::Server));
        let svc = AssetService::new(store.clone());
        let w = svc.create_wallet(NewWallet::new("Earn", WalletType::Hot), t0()).await.unwrap();
        let earn = EarnConfig::new(12.0, InterestType::Simple, 24, t0());
        let kept = svc
            .create_asset(NewAsset::manual(w.id, "USDC", 500.0).with_earn(earn.clone()), t0())
            .await
            .unwrap();
        let gone = svc
            .create_asset(NewAsset::manual(w.id, "DAI", 500.0).with_earn(earn), t0())
            .await
            .unwrap();

        let mut snapshot: Vec<Asset> = store.list().await;
        let mutated = accrue_due(&mut snapshot, t0() + Duration::hours(25));
        assert_eq!(mutated.len(), 2);

        svc.delete_asset(gone.id).await.unwrap();
        let written = earn_service::EarnService::new(store.clone()).persist(mutated).await.unwrap();
        assert_eq!(written, 1);
        assert!(svc.get_asset(kept.id).await.unwrap().amount > 500.0);
        assert!(svc.get_asset(gone.id).await.is_err());
    }

    #[tokio::test]
    async fn unusable_earn_config_does_not_rewrite_the_store() {
        let persistence = Arc::new(CountingPersistence::default());
        let store = Arc::new(RecordStore::open(persistence.clone(), IdSpace::Server).unwrap());
        let svc = AssetService::new(store.clone());
        let w = svc.create_wallet(NewWallet::new("Earn", WalletType::Hot), t0()).await.unwrap();

        // Bypasses service validation, as a hydrated payload would.
        let mut broken = NewAsset::manual(w.id, "USDT", 100.0)
            .with_earn(EarnConfig::new(5.0, InterestType::Simple, 24, t0()))
            .into_asset(RecordId(0), t0());
        broken.earn_config.as_mut().unwrap().apy = f64::NAN;
        store.insert(broken).await.unwrap();

        let commits = persistence.commits.load(Ordering::SeqCst);
        let listed = svc.list_assets(t0() + Duration::days(3)).await.unwrap();
        assert_eq!(listed[0].amount, 100.0);
        svc.list_assets(t0() + Duration::days(4)).await.unwrap();
        assert_eq!(persistence.commits.load(Ordering::SeqCst), commits);
    }

    #[tokio::test]
    async fn earn_positions_only_include_enabled_configs() {
        let svc = service();
        let w = svc.create_wallet(NewWallet::new("Main", WalletType::Hot), t0()).await.unwrap();
        svc.create_asset(NewAsset::manual(w.id, "BTC", 1.0), t0()).await.unwrap();
        svc.create_asset(
            NewAsset::manual(w.id, "USDC", 50.0).with_earn(EarnConfig::new(4.0, InterestType::Simple, 24, t0())),
            t0(),
        )
        .await
        .unwrap();

        let positions = svc.list_earn_positions(t0()).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].asset.symbol, "USDC");
    }
}

// ═══════════════════════════════════════════════════════════════════
// AssetService — credentials & custom coins
// ═══════════════════════════════════════════════════════════════════

mod asset_service_credentials {
    use super::*;

    fn sealed_service() -> AssetService {
        let params = KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        };
        AssetService::with_cipher(
            Arc::new(RecordStore::in_memory(IdSpace::Server)),
            Arc::new(PasswordCipher::with_params("pw", params)),
        )
    }

    #[tokio::test]
    async fn one_credential_per_exchange() {
        let svc = service();
        let first = svc.save_api_key(NewApiKey::new("OKX", "k1", "s1"), t0()).await.unwrap();
        let second = svc
            .save_api_key(NewApiKey::new("okx", "k2", "s2"), t0() + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.created_at, t0());
        assert_eq!(svc.list_exchanges().await.len(), 1);
        assert_eq!(svc.get_api_key("OKX").await.unwrap().api_key, "k2");
    }

    #[tokio::test]
    async fn secrets_are_sealed_at_rest() {
        let svc = sealed_service();
        svc.save_api_key(NewApiKey::new("kucoin", "key", "secret").with_password("phrase"), t0())
            .await
            .unwrap();

        let stored = svc.get_api_key("kucoin").await.unwrap();
        assert!(stored.is_encrypted);
        assert_ne!(stored.api_secret, "secret");
        assert_ne!(stored.password.as_deref(), Some("phrase"));

        let (key, secret, password) = svc.reveal(&stored).unwrap();
        assert_eq!(key, "key");
        assert_eq!(secret, "secret");
        assert_eq!(password.as_deref(), Some("phrase"));
    }

    #[tokio::test]
    async fn debug_output_hides_secrets() {
        let svc = service();
        svc.save_api_key(NewApiKey::new("okx", "visible-key", "hidden-secret"), t0())
            .await
            .unwrap();
        let rendered = format!("{:?}", svc.get_api_key("okx").await.unwrap());
        assert!(!rendered.contains("hidden-secret"));
        assert!(!rendered.contains("visible-key"));
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let svc = service();
        assert!(svc.save_api_key(NewApiKey::new("", "k", "s"), t0()).await.is_err());
        assert!(svc.save_api_key(NewApiKey::new("okx", "k", " "), t0()).await.is_err());
    }

    #[tokio::test]
    async fn delete_api_key_by_exchange() {
        let svc = service();
        svc.save_api_key(NewApiKey::new("okx", "k", "s"), t0()).await.unwrap();
        svc.delete_api_key("OKX").await.unwrap();
        assert!(matches!(svc.get_api_key("okx").await, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn custom_coins_override_resolution() {
        let svc = service();
        assert_eq!(svc.coin_resolver().await.resolve("PEPE"), "pepe");

        svc.add_custom_coin(NewCustomCoin::new("pepe", "Pepe", "pepe-token"), t0())
            .await
            .unwrap();
        assert_eq!(svc.coin_resolver().await.resolve("PEPE"), "pepe-token");

        let dup = svc
            .add_custom_coin(NewCustomCoin::new("PEPE", "Again", "x"), t0())
            .await;
        assert!(matches!(dup, Err(CoreError::ValidationError(_))));
    }

    #[tokio::test]
    async fn deleting_a_custom_coin_restores_the_fallback() {
        let svc = service();
        let coin = svc
            .add_custom_coin(NewCustomCoin::new("ETH", "Staked", "staked-ether"), t0())
            .await
            .unwrap();
        assert_eq!(svc.coin_resolver().await.resolve("eth"), "staked-ether");

        svc.delete_custom_coin(coin.id).await.unwrap();
        assert_eq!(svc.coin_resolver().await.resolve("eth"), "ethereum");
        assert!(svc.delete_custom_coin(coin.id).await.is_err());
    }
}

// ═══════════════════════════════════════════════════════════════════
// PriceService
// ═══════════════════════════════════════════════════════════════════

mod price_service {
    use super::*;

    #[tokio::test]
    async fn fresh_prices_are_served_from_cache() {
        let provider = Arc::new(MockPriceProvider::new(&[("bitcoin", 60_000.0)]));
        let mut registry = PriceProviderRegistry::new();
        registry.register(Box::new(SharedProvider(provider.clone())));
        let prices = PriceService::new(registry);

        let ids = vec!["bitcoin".to_string()];
        prices.prices_for(&ids, Duration::minutes(5), t0()).await;
        prices.prices_for(&ids, Duration::minutes(5), t0() + Duration::minutes(1)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        prices.prices_for(&ids, Duration::minutes(5), t0() + Duration::minutes(10)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_known_price() {
        let prices = PriceService::new(registry_with(FailingMockProvider));
        prices.set_price("bitcoin", 50_000.0, t0() - Duration::hours(1)).await.unwrap();

        let got = prices
            .prices_for(&["bitcoin".to_string()], Duration::minutes(5), t0())
            .await;
        assert_eq!(got.get("bitcoin"), Some(&50_000.0));
    }

    #[tokio::test]
    async fn registry_falls_back_to_next_provider() {
        let mut registry = PriceProviderRegistry::new();
        registry.register(Box::new(FailingMockProvider));
        registry.register(Box::new(MockPriceProvider::new(&[("ethereum", 3_000.0)])));
        let prices = PriceService::new(registry);

        assert_eq!(prices.refresh(&["ethereum".to_string()], t0()).await.unwrap(), 1);
        assert_eq!(prices.latest("ethereum").await, Some(3_000.0));
    }

    #[tokio::test]
    async fn set_price_rejects_nonsense() {
        let prices = PriceService::new(PriceProviderRegistry::new());
        assert!(prices.set_price("x", f64::NAN, t0()).await.is_err());
        assert!(prices.set_price("x", -1.0, t0()).await.is_err());
    }

    #[tokio::test]
    async fn refreshes_accumulate_history_newest_first() {
        let prices = PriceService::new(registry_with(MockPriceProvider::new(&[("bitcoin", 60_000.0)])));
        let ids = vec!["bitcoin".to_string()];
        for minutes in [0, 5, 10] {
            prices.refresh(&ids, t0() + Duration::minutes(minutes)).await.unwrap();
        }
        // Same timestamp twice keeps one point.
        prices.refresh(&ids, t0() + Duration::minutes(10)).await.unwrap();

        let history = prices.history("bitcoin", None).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].timestamp, t0() + Duration::minutes(10));
        assert_eq!(prices.history("bitcoin", Some(2)).await.len(), 2);
        assert!(prices.history("ethereum", None).await.is_empty());

        let range = prices
            .history_range("bitcoin", t0() + Duration::minutes(5), t0() + Duration::minutes(10))
            .await;
        assert_eq!(range.len(), 2);
        assert!(range[0].timestamp < range[1].timestamp);
    }

    #[tokio::test]
    async fn late_observation_joins_history_without_replacing_latest() {
        let prices = PriceService::new(PriceProviderRegistry::new());
        prices.set_price("solana", 150.0, t0()).await.unwrap();
        prices.set_price("solana", 120.0, t0() - Duration::hours(1)).await.unwrap();

        assert_eq!(prices.latest("solana").await, Some(150.0));
        let history = prices.history("solana", None).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].price_usd, 120.0);
    }

    #[tokio::test]
    async fn refresh_cycle_prunes_history_past_retention() {
        let prices = PriceService::new(registry_with(MockPriceProvider::new(&[("ethereum", 3_000.0)])))
            .with_history_retention(Duration::days(30));
        prices.set_price("ethereum", 2_000.0, t0() - Duration::days(45)).await.unwrap();
        prices.set_price("ethereum", 2_500.0, t0() - Duration::days(10)).await.unwrap();

        let refreshed = prices.refresh_cycle(&["ethereum".to_string()], t0()).await;
        assert_eq!(refreshed, 1);

        let history = prices.history("ethereum", None).await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|p| p.timestamp >= t0() - Duration::days(30)));
        assert_eq!(prices.latest("ethereum").await, Some(3_000.0));
    }

    #[tokio::test]
    async fn failed_refresh_cycle_still_prunes() {
        let prices = PriceService::new(registry_with(FailingMockProvider)).with_history_retention(Duration::days(1));
        prices.set_price("bitcoin", 50_000.0, t0() - Duration::days(2)).await.unwrap();

        assert_eq!(prices.refresh_cycle(&["bitcoin".to_string()], t0()).await, 0);
        assert!(prices.history("bitcoin", None).await.is_empty());
        // The latest price outlives its history.
        assert_eq!(prices.latest("bitcoin").await, Some(50_000.0));
    }

    struct SharedProvider(Arc<MockPriceProvider>);

    #[async_trait]
    impl PriceProvider for SharedProvider {
        fn name(&self) -> &str {
            self.0.name()
        }

        async fn latest_usd_prices(&self, price_ids: &[String]) -> Result<HashMap<String, f64>, CoreError> {
            self.0.latest_usd_prices(price_ids).await
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Snapshots
// ═══════════════════════════════════════════════════════════════════

mod snapshots {
    use super::*;

    fn snapshot_service(assets: AssetService, prices: &[(&str, f64)]) -> SnapshotService {
        let prices = Arc::new(PriceService::new(registry_with(MockPriceProvider::new(prices))));
        SnapshotService::new(assets, prices, Duration::days(30))
    }

    #[test]
    fn valuation_aggregates_by_wallet_and_symbol() {
        let assets = vec![
            NewAsset::manual(RecordId(1), "BTC", 0.5).into_asset(RecordId(10), t0()),
            NewAsset::manual(RecordId(2), "btc", 0.25).into_asset(RecordId(11), t0()),
            NewAsset::manual(RecordId(2), "UNKNOWN", 100.0).into_asset(RecordId(12), t0()),
        ];
        let prices: HashMap<String, f64> = [("bitcoin".to_string(), 40_000.0)].into_iter().collect();

        let valuation = value_assets(&assets, &prices, &CoinResolver::new());
        assert_eq!(valuation.total_value, 30_000.0);
        assert_eq!(valuation.priced_assets, 2);
        assert_eq!(valuation.data.wallets[&RecordId(1)], 20_000.0);
        assert_eq!(valuation.data.wallets[&RecordId(2)], 10_000.0);

        let btc = valuation.data.coins["BTC"];
        assert_eq!(btc.amount, 0.75);
        assert_eq!(btc.value, 30_000.0);
        // Unknown prices count as zero but the holding is still recorded.
        assert_eq!(valuation.data.coins["UNKNOWN"].value, 0.0);
    }

    #[tokio::test]
    async fn no_assets_means_no_snapshot() {
        let svc = snapshot_service(service(), &[]);
        assert!(svc.capture(t0()).await.unwrap().is_none());
        assert_eq!(svc.count().await, 0);
    }

    #[tokio::test]
    async fn capture_stores_valuation() {
        let assets = service();
        let w = assets.create_wallet(NewWallet::new("Main", WalletType::Hot), t0()).await.unwrap();
        assets.create_asset(NewAsset::manual(w.id, "ETH", 2.0), t0()).await.unwrap();

        let svc = snapshot_service(assets, &[("ethereum", 2_500.0)]);
        let snapshot: PortfolioSnapshot = svc.capture(t0()).await.unwrap().unwrap();
        assert_eq!(snapshot.total_value, 5_000.0);
        assert_eq!(snapshot.snapshot_data.wallets[&w.id], 5_000.0);
        assert_eq!(svc.count().await, 1);
    }

    #[tokio::test]
    async fn old_snapshots_are_pruned() {
        let assets = service();
        let w = assets.create_wallet(NewWallet::new("Main", WalletType::Hot), t0()).await.unwrap();
        assets.create_asset(NewAsset::manual(w.id, "ETH", 1.0), t0()).await.unwrap();
        let svc = snapshot_service(assets, &[("ethereum", 1.0)]);

        svc.capture(t0() - Duration::days(40)).await.unwrap();
        svc.capture(t0() - Duration::days(10)).await.unwrap();
        svc.capture(t0()).await.unwrap();

        let history = svc.history(t0() - Duration::days(365)).await;
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp < history[1].timestamp);
        assert_eq!(svc.recent(24, t0()).await.len(), 1);
    }
}

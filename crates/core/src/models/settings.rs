use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::CoreError;

/// Runtime configuration shared by the client engine and the daemon.
///
/// Loaded from an optional config file, then overridden by `PORTFOLIO__*`
/// environment variables (e.g. `PORTFOLIO__SERVER_URL`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the server-of-record, e.g. `http://localhost:3001`.
    pub server_url: String,
    /// When `false` the sync engine never talks to the server.
    pub sync_enabled: bool,
    pub request_timeout_secs: u64,
    pub health_timeout_secs: u64,
    /// Upper bound on a whole hydration, health check and replay included.
    pub hydrate_timeout_secs: u64,
    /// Minimum spacing between two full-state pushes.
    pub min_push_interval_ms: u64,
    pub import_interval_secs: u64,
    pub snapshot_interval_secs: u64,
    pub snapshot_retention_days: u32,
    pub price_refresh_interval_secs: u64,
    /// How long recorded price points are kept.
    pub price_history_retention_days: u32,
    /// Price ids refreshed on every cycle even when nothing holds them.
    pub tracked_price_ids: Vec<String>,
    /// Store file location for durable persistence.
    pub data_path: PathBuf,
    /// Endpoint of the exchange balance gateway.
    pub balance_gateway_url: String,
    /// When set, exchange secrets are sealed at rest with this passphrase.
    pub credential_passphrase: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3001".to_string(),
            sync_enabled: true,
            request_timeout_secs: 10,
            health_timeout_secs: 3,
            hydrate_timeout_secs: 60,
            min_push_interval_ms: 1000,
            import_interval_secs: 300,
            snapshot_interval_secs: 300,
            snapshot_retention_days: 30,
            price_refresh_interval_secs: 300,
            price_history_retention_days: 30,
            tracked_price_ids: ["bitcoin", "ethereum", "solana", "binancecoin", "tether", "usd-coin"]
                .into_iter()
                .map(String::from)
                .collect(),
            data_path: PathBuf::from("portfolio.store"),
            balance_gateway_url: "http://localhost:3001/api/exchange/balance".to_string(),
            credential_passphrase: None,
        }
    }
}

impl Settings {
    /// Layer `path` (any format the `config` crate knows, optional) under
    /// `PORTFOLIO__*` environment variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let file = path.as_ref().to_string_lossy().into_owned();
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .add_source(config::Environment::with_prefix("PORTFOLIO").separator("__"))
            .build()?;

        let settings: Settings = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.sync_enabled && self.server_url.trim().is_empty() {
            return Err(CoreError::Config("server_url is required when sync is enabled".into()));
        }
        if self.import_interval_secs == 0
            || self.snapshot_interval_secs == 0
            || self.price_refresh_interval_secs == 0
        {
            return Err(CoreError::Config("task intervals must be positive".into()));
        }
        if self.snapshot_retention_days == 0 {
            return Err(CoreError::Config("snapshot_retention_days must be positive".into()));
        }
        if self.price_history_retention_days == 0 {
            return Err(CoreError::Config("price_history_retention_days must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn hydrate_timeout(&self) -> Duration {
        Duration::from_secs(self.hydrate_timeout_secs)
    }

    pub fn min_push_interval(&self) -> Duration {
        Duration::from_millis(self.min_push_interval_ms)
    }

    pub fn import_interval(&self) -> Duration {
        Duration::from_secs(self.import_interval_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn snapshot_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.snapshot_retention_days))
    }

    pub fn price_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.price_refresh_interval_secs)
    }

    pub fn price_history_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.price_history_retention_days))
    }
}

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::errors::CoreError;
use crate::models::asset::{Asset, AssetPatch, NewAsset};
use crate::models::ids::RecordId;
use crate::models::settings::Settings;
use crate::models::sync::{ApiEnvelope, SyncPayload, WireAsset, WireEarnConfig, WireWallet};
use crate::models::wallet::{NewWallet, Wallet, WalletPatch};
use super::traits::SyncBackend;

const PROVIDER: &str = "server";

/// reqwest client for the server-of-record REST API.
///
/// Endpoints: `/health`, `GET|POST /api/sync`, `/api/wallets[/:id]`,
/// `/api/assets[/:id]`. Every response uses the `{success, data, error}`
/// envelope; non-2xx statuses become `CoreError::Http`.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    health_timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration, health_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.server_url.clone(),
            settings.request_timeout(),
            settings.health_timeout(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Turn a non-2xx response into `CoreError::Http`, keeping the server's
/// `error` message when it sent one.
async fn check_status(resp: Response) -> Result<String, CoreError> {
    let status = resp.status();
    let text = resp.text().await?;
    if status.is_success() {
        return Ok(text);
    }
    let message = serde_json::from_str::<ApiEnvelope<Value>>(&text)
        .ok()
        .and_then(|env| env.error)
        .unwrap_or_else(|| status.to_string());
    Err(CoreError::Http {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, CoreError> {
    let text = check_status(resp).await?;
    let envelope: ApiEnvelope<T> = serde_json::from_str(&text)?;
    envelope.into_data(PROVIDER)
}

async fn expect_success(resp: Response) -> Result<(), CoreError> {
    let text = check_status(resp).await?;
    if text.trim().is_empty() {
        return Ok(());
    }
    let envelope: ApiEnvelope<Value> = serde_json::from_str(&text)?;
    if envelope.success {
        Ok(())
    } else {
        Err(CoreError::Api {
            provider: PROVIDER.into(),
            message: envelope
                .error
                .unwrap_or_else(|| "server returned unsuccessful response".into()),
        })
    }
}

// Entity bodies go out camelCase, which is what the per-entity routes read.

fn wallet_body(wallet: &NewWallet) -> Value {
    json!({
        "name": wallet.name,
        "type": wallet.wallet_type,
        "exchangeName": wallet.exchange_name,
        "color": wallet.color,
    })
}

fn wallet_patch_body(patch: &WalletPatch) -> Value {
    let mut body = Map::new();
    if let Some(name) = &patch.name {
        body.insert("name".into(), json!(name));
    }
    if let Some(wallet_type) = patch.wallet_type {
        body.insert("type".into(), json!(wallet_type));
    }
    if let Some(exchange_name) = &patch.exchange_name {
        body.insert("exchangeName".into(), json!(exchange_name));
    }
    if let Some(color) = &patch.color {
        body.insert("color".into(), json!(color));
    }
    Value::Object(body)
}

fn asset_body(asset: &NewAsset) -> Value {
    json!({
        "walletId": asset.wallet_id.get(),
        "symbol": asset.symbol,
        "amount": asset.amount,
        "tags": asset.tags,
        "notes": asset.notes,
        "autoSync": asset.auto_sync,
        "earnConfig": asset.earn_config.as_ref().map(WireEarnConfig::from),
    })
}

fn asset_patch_body(patch: &AssetPatch) -> Value {
    let mut body = Map::new();
    if let Some(symbol) = &patch.symbol {
        body.insert("symbol".into(), json!(symbol));
    }
    if let Some(amount) = patch.amount {
        body.insert("amount".into(), json!(amount));
    }
    if let Some(tags) = &patch.tags {
        body.insert("tags".into(), json!(tags));
    }
    if let Some(notes) = &patch.notes {
        body.insert("notes".into(), json!(notes));
    }
    if let Some(auto_sync) = patch.auto_sync {
        body.insert("autoSync".into(), json!(auto_sync));
    }
    if let Some(earn) = &patch.earn_config {
        body.insert("earnConfig".into(), json!(earn.as_ref().map(WireEarnConfig::from)));
    }
    Value::Object(body)
}

#[async_trait]
impl SyncBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn health(&self) -> Result<(), CoreError> {
        let resp = self
            .client
            .get(self.url("/health"))
            .timeout(self.health_timeout)
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }

    async fn fetch_state(&self) -> Result<SyncPayload, CoreError> {
        let resp = self.client.get(self.url("/api/sync")).send().await?;
        let payload: SyncPayload = decode(resp).await?;
        debug!(
            "pulled {} wallets, {} assets, {} custom coins",
            payload.wallets.len(),
            payload.assets.len(),
            payload.custom_coins.len()
        );
        Ok(payload)
    }

    async fn replace_state(&self, payload: &SyncPayload) -> Result<(), CoreError> {
        let resp = self.client.post(self.url("/api/sync")).json(payload).send().await?;
        expect_success(resp).await
    }

    async fn create_wallet(&self, wallet: &NewWallet) -> Result<Wallet, CoreError> {
        let resp = self
            .client
            .post(self.url("/api/wallets"))
            .json(&wallet_body(wallet))
            .send()
            .await?;
        let created: WireWallet = decode(resp).await?;
        created.into_wallet(Utc::now())
    }

    async fn update_wallet(&self, id: RecordId, patch: &WalletPatch) -> Result<(), CoreError> {
        let resp = self
            .client
            .put(self.url(&format!("/api/wallets/{id}")))
            .json(&wallet_patch_body(patch))
            .send()
            .await?;
        expect_success(resp).await
    }

    async fn delete_wallet(&self, id: RecordId) -> Result<(), CoreError> {
        let resp = self
            .client
            .delete(self.url(&format!("/api/wallets/{id}")))
            .send()
            .await?;
        expect_success(resp).await
    }

    async fn create_asset(&self, asset: &NewAsset) -> Result<Asset, CoreError> {
        let resp = self
            .client
            .post(self.url("/api/assets"))
            .json(&asset_body(asset))
            .send()
            .await?;
        let created: WireAsset = decode(resp).await?;
        let mut created = created.into_asset(Utc::now())?;
        // Older servers echo only the columns they store.
        if created.auto_sync.is_none() {
            created.auto_sync = asset.auto_sync;
        }
        if created.earn_config.is_none() {
            created.earn_config = asset.earn_config.clone();
        }
        Ok(created)
    }

    async fn update_asset(&self, id: RecordId, patch: &AssetPatch) -> Result<(), CoreError> {
        let resp = self
            .client
            .put(self.url(&format!("/api/assets/{id}")))
            .json(&asset_patch_body(patch))
            .send()
            .await?;
        expect_success(resp).await
    }

    async fn delete_asset(&self, id: RecordId) -> Result<(), CoreError> {
        let resp = self
            .client
            .delete(self.url(&format!("/api/assets/{id}")))
            .send()
            .await?;
        expect_success(resp).await
    }
}

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::errors::CoreError;
use crate::models::balance::{BalanceResponse, ExchangeBalance};
use super::traits::BalanceProvider;

/// Balance provider backed by an HTTP gateway that wraps the exchange APIs.
///
/// - **Request**: `POST {url}` with `{exchange, apiKey, apiSecret, password?}`
/// - **Response**: `{success, exchange, count, data: [{symbol, free, used, total}], timestamp}`
///
/// Several account types of one exchange may report the same symbol; those
/// entries are summed so the reconciler sees one entry per symbol.
pub struct BalanceGatewayProvider {
    client: Client,
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceRequest<'a> {
    exchange: &'a str,
    api_key: &'a str,
    api_secret: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
}

impl BalanceGatewayProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

/// Sum duplicate symbols (case-insensitive, first spelling wins).
pub fn merge_duplicate_symbols(balances: Vec<ExchangeBalance>) -> Vec<ExchangeBalance> {
    let mut merged: Vec<ExchangeBalance> = Vec::with_capacity(balances.len());
    for entry in balances {
        match merged.iter_mut().find(|b| b.symbol.eq_ignore_ascii_case(&entry.symbol)) {
            Some(existing) => {
                existing.free += entry.free;
                existing.used += entry.used;
                existing.total += entry.total;
            }
            None => merged.push(entry),
        }
    }
    merged
}

#[async_trait]
impl BalanceProvider for BalanceGatewayProvider {
    fn name(&self) -> &str {
        "BalanceGateway"
    }

    async fn fetch_balances(
        &self,
        exchange: &str,
        api_key: &str,
        api_secret: &str,
        password: Option<&str>,
    ) -> Result<Vec<ExchangeBalance>, CoreError> {
        let body = BalanceRequest {
            exchange,
            api_key,
            api_secret,
            password,
        };

        let resp = self.client.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        let parsed: BalanceResponse = resp.json().await.map_err(|e| CoreError::Api {
            provider: "BalanceGateway".into(),
            message: format!("Failed to parse balance response for {exchange}: {e}"),
        })?;

        if !status.is_success() || !parsed.success {
            let message = parsed
                .error
                .unwrap_or_else(|| format!("balance fetch for {exchange} failed"));
            return Err(if status.is_success() {
                CoreError::Api {
                    provider: "BalanceGateway".into(),
                    message,
                }
            } else {
                CoreError::Http {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        debug!("{exchange}: gateway returned {} balance entries", parsed.data.len());
        Ok(merge_duplicate_symbols(parsed.data))
    }
}

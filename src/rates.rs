use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::time::Duration;

use crate::model::RatesSnapshot;
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
struct RatesResponse {
    result: Option<String>,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    base_code: Option<String>,
    time_last_update_utc: Option<String>,
    conversion_rates: Option<BTreeMap<String, f64>>,
}

/// Client for a single exchange-rate snapshot endpoint. The URL embeds the
/// provider key, so it is never logged.
pub struct RatesClient {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

impl RatesClient {
    pub fn new(url: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            retry,
        })
    }

    pub async fn fetch(&self) -> Result<RatesSnapshot> {
        let request = self
            .client
            .get(&self.url)
            .build()
            .map_err(|e| anyhow!("invalid exchange-rate URL: {}", e.without_url()))?;
        let response = self
            .retry
            .send(&self.client, request)
            .await
            .map_err(|e| anyhow!("exchange-rate request failed: {}", e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            bail!("failed to retrieve exchange rates: HTTP {}", status);
        }

        let body: RatesResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("malformed exchange-rate response: {}", e.without_url()))?;

        if body.result.as_deref() == Some("error") {
            bail!(
                "exchange-rate provider returned an error: {}",
                body.error_type.as_deref().unwrap_or("unknown")
            );
        }

        Ok(RatesSnapshot {
            base_code: body.base_code.unwrap_or_else(|| "USD".to_string()),
            time_last_update_utc: body.time_last_update_utc,
            conversion_rates: body
                .conversion_rates
                .ok_or_else(|| anyhow!("exchange-rate response has no conversion_rates"))?,
            captured_at: Utc::now(),
        })
    }
}

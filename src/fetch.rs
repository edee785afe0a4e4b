use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Client;
use serde_json::Value;
use tokio::time::Duration;
use tracing::{error, info};

use crate::error::FetchError;
use crate::retry::RetryPolicy;

pub const DEFAULT_API_URL: &str = "https://api.coingecko.com/api/v3/coins/markets";
pub const PER_PAGE: u32 = 250;

const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-cg-demo-api-key");

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    /// Bounds each attempt, not the whole retry sequence.
    pub timeout: Duration,
    /// Idle connections kept per host; match it to the worker count.
    pub pool_size: usize,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(10),
            pool_size: 5,
            retry: RetryPolicy::default(),
        }
    }
}

/// Client for the paginated `coins/markets` listing.
pub struct MarketsClient {
    client: Client,
    api_url: String,
    retry: RetryPolicy,
}

impl MarketsClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key.as_deref() {
            let mut value =
                HeaderValue::from_str(key).context("API key is not a valid header value")?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_size)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            api_url: config.api_url,
            retry: config.retry,
        })
    }

    /// Fetches one listing page, surfacing why it failed.
    pub async fn try_fetch_page(&self, page: u32) -> Result<Vec<Value>, FetchError> {
        let request = self
            .client
            .get(&self.api_url)
            .query(&page_query(page))
            .build()
            .map_err(|source| FetchError::Transport { page, source })?;

        let response = self
            .retry
            .send(&self.client, request)
            .await
            .map_err(|source| FetchError::Transport { page, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { page, status });
        }

        let body = response
            .text()
            .await
            .map_err(|source| FetchError::Transport { page, source })?;

        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Array(items)) => Ok(items),
            Ok(other) => Err(FetchError::Decode {
                page,
                reason: format!("expected a JSON array, got {}", json_kind(&other)),
            }),
            Err(e) => Err(FetchError::Decode {
                page,
                reason: e.to_string(),
            }),
        }
    }

    /// Fetches one listing page. A page that fails after retries is logged
    /// and contributes no rows.
    pub async fn fetch_page(&self, page: u32) -> Vec<Value> {
        match self.try_fetch_page(page).await {
            Ok(items) => {
                info!("Fetched page {} ({} assets)", page, items.len());
                items
            }
            Err(err) => {
                error!("Error fetching page {}: {}", page, err);
                Vec::new()
            }
        }
    }
}

fn page_query(page: u32) -> [(&'static str, String); 5] {
    [
        ("vs_currency", "usd".to_string()),
        ("order", "market_cap_desc".to_string()),
        ("per_page", PER_PAGE.to_string()),
        ("page", page.to_string()),
        ("sparkline", "false".to_string()),
    ]
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

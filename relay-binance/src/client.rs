//! Binance REST client
//!
//! Thin proxy over the public REST API, used by the polling fallback and
//! the snapshot endpoint.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument};

use relay_core::{normalize_symbol, RelayError, RelayResult, TickerSnapshot};

use crate::types::{RestError, Ticker24hrResponse, BINANCE_REST_BASE};

/// Binance REST API client
#[derive(Clone)]
pub struct BinanceRestClient {
    client: Client,
    base_url: String,
}

impl BinanceRestClient {
    /// Create a client against the public endpoint
    pub fn new() -> RelayResult<Self> {
        Self::with_base_url(BINANCE_REST_BASE)
    }

    /// Create a client against a custom endpoint
    pub fn with_base_url(base_url: impl Into<String>) -> RelayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RelayError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the rolling 24hr ticker for a symbol
    #[instrument(skip(self))]
    pub async fn ticker_24hr(&self, symbol: &str) -> RelayResult<TickerSnapshot> {
        let symbol = normalize_symbol(symbol)?;
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        debug!("Fetching 24hr ticker: {}?symbol={}", url, symbol);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol.as_str())])
            .send()
            .await
            .map_err(|e| RelayError::api(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<RestError>().await {
                Ok(err) => format!("{} (code {})", err.msg, err.code),
                Err(_) => status.to_string(),
            };
            return Err(RelayError::api(format!(
                "ticker request for {} failed: {}",
                symbol, message
            )));
        }

        let raw: Ticker24hrResponse = response
            .json()
            .await
            .map_err(|e| RelayError::parse(format!("invalid ticker response: {}", e)))?;

        Ok(raw.into())
    }
}

impl std::fmt::Debug for BinanceRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceRestClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

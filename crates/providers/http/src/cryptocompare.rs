//! A [`PriceProvider`] backed by the CryptoCompare historical price API.

use async_trait::async_trait;
use fbscan_core::{PriceProvider, ProviderError};
use reqwest::{Client, header::AUTHORIZATION};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::trace;
use url::Url;

/// Base URL of the public CryptoCompare API.
pub const CRYPTOCOMPARE_URL: &str = "https://min-api.cryptocompare.com/";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriceResponse {
    Error {
        #[serde(rename = "Response")]
        response: String,
        #[serde(rename = "Message")]
        message: String,
    },
    Prices(HashMap<String, HashMap<String, f64>>),
}

/// Looks up the historical FCT price in USD.
#[derive(Debug, Clone)]
pub struct CryptoCompareClient {
    base: Url,
    inner: Client,
    api_key: Option<String>,
    symbol: String,
    currency: String,
}

impl CryptoCompareClient {
    /// Creates a new [`CryptoCompareClient`] for the API rooted at `base`.
    pub fn new(base: Url, api_key: Option<String>) -> Self {
        Self {
            base,
            inner: Client::new(),
            api_key,
            symbol: "FCT".to_string(),
            currency: "USD".to_string(),
        }
    }

    fn price_url(&self, timestamp: u64) -> Result<Url, ProviderError> {
        let mut url = self
            .base
            .join("data/pricehistorical")
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("fsym", &self.symbol)
            .append_pair("tsyms", &self.currency)
            .append_pair("ts", &timestamp.to_string());
        Ok(url)
    }

    fn parse_price(&self, body: &[u8]) -> Result<f64, ProviderError> {
        let response: PriceResponse = serde_json::from_slice(body)
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
        match response {
            PriceResponse::Error { response, message } => {
                Err(ProviderError::Remote { code: 0, message: format!("{response}: {message}") })
            }
            PriceResponse::Prices(prices) => prices
                .get(&self.symbol)
                .and_then(|quotes| quotes.get(&self.currency))
                .copied()
                .ok_or_else(|| {
                    ProviderError::InvalidResponse(format!(
                        "no {}/{} quote in response",
                        self.symbol, self.currency
                    ))
                }),
        }
    }
}

#[async_trait]
impl PriceProvider for CryptoCompareClient {
    async fn price_at(&self, timestamp: u64) -> Result<f64, ProviderError> {
        let url = self.price_url(timestamp)?;
        trace!(target: "cryptocompare", %url, "Requesting price");

        let mut request = self.inner.get(url);
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Apikey {key}"));
        }
        let response =
            request.send().await.map_err(|err| ProviderError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|err| ProviderError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(ProviderError::Transport(format!("HTTP status {status}")));
        }
        self.parse_price(&body)
    }
}

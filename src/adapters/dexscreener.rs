//! DexScreener Price Adapter
//!
//! Spot prices from the public DexScreener token endpoint. The API
//! returns `priceUsd` as a string, so parsing failures are surfaced as
//! malformed responses rather than missing prices.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::ports::oracles::{OracleError, PriceOracle};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_PRICE_API_URL: &str = "https://api.dexscreener.com/latest/dex/tokens";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Deserialize)]
pub struct Pair {
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DexScreenerClient {
    client: reqwest::Client,
    base_url: String,
}

impl DexScreenerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| OracleError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Listed pairs for a token, `None` when the token has no pairs.
    pub async fn token_pairs(&self, contract: &str) -> Result<Option<Vec<Pair>>, OracleError> {
        let url = format!("{}/{}", self.base_url, contract);
        let data: TokenResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        Ok(data.pairs.filter(|pairs| !pairs.is_empty()))
    }
}

#[async_trait]
impl PriceOracle for DexScreenerClient {
    async fn current_price(&self, contract: &str) -> Result<Option<f64>, OracleError> {
        let pairs = match self.token_pairs(contract).await? {
            Some(pairs) => pairs,
            None => return Ok(None),
        };
        // First pair is the most liquid listing.
        match pairs.first().and_then(|p| p.price_usd.as_deref()) {
            Some(raw) => raw
                .parse::<f64>()
                .map(Some)
                .map_err(|e| OracleError::Malformed(format!("priceUsd {:?}: {}", raw, e))),
            None => Ok(None),
        }
    }
}

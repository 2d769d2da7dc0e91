//! Chain Explorer HTTP Client
//!
//! Thin client over an Etherscan-style explorer API (BscScan in the
//! default deployment). Covers the four calls the engine needs: ABI
//! presence, token balance, transaction target, and transfer listings.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::ports::oracles::{BalanceCheck, BalanceOracle, OracleError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("explorer request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("explorer API key not configured")]
    MissingApiKey,
    #[error("unexpected explorer response: {0}")]
    Unexpected(String),
}

impl From<ScanError> for OracleError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::MissingApiKey => {
                OracleError::NotConfigured("explorer API key".to_string())
            }
            ScanError::Http(e) => OracleError::Network(e.to_string()),
            ScanError::Unexpected(msg) => OracleError::Malformed(msg),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: Option<String>,
    message: Option<String>,
    result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProxyResponse {
    result: Option<TransactionResult>,
}

#[derive(Debug, Deserialize)]
struct TransactionResult {
    to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferEntry {
    #[serde(rename = "contractAddress")]
    contract_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScanClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    wallet: String,
}

impl ScanClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        wallet: impl Into<String>,
    ) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            wallet: wallet.into(),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn require_key(&self) -> Result<(), ScanError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(ScanError::MissingApiKey)
        }
    }

    /// True if the explorer knows the address as a contract. An unverified
    /// contract still counts: the explorer answers with a distinct marker
    /// string instead of status "1".
    pub async fn contract_abi_known(&self, contract: &str) -> Result<bool, ScanError> {
        self.require_key()?;
        let url = format!(
            "{}?module=contract&action=getabi&address={}&apikey={}",
            self.base_url, contract, self.api_key
        );
        let data: StatusResponse = self.client.get(&url).send().await?.json().await?;
        let unverified = data
            .result
            .as_ref()
            .and_then(|r| r.as_str())
            .map(|s| s == "Contract source code not verified")
            .unwrap_or(false);
        Ok(data.status.as_deref() == Some("1") || unverified)
    }

    /// Raw token balance of the configured wallet.
    pub async fn token_balance(&self, wallet: &str, token: &str) -> Result<u128, ScanError> {
        self.require_key()?;
        let url = format!(
            "{}?module=account&action=tokenbalance&contractaddress={}&address={}&tag=latest&apikey={}",
            self.base_url, token, wallet, self.api_key
        );
        let data: StatusResponse = self.client.get(&url).send().await?.json().await?;
        if data.status.as_deref() != Some("1") {
            return Err(ScanError::Unexpected(
                data.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        data.result
            .as_ref()
            .and_then(|r| r.as_str())
            .and_then(|s| s.parse::<u128>().ok())
            .ok_or_else(|| ScanError::Unexpected("non-numeric balance result".to_string()))
    }

    /// `to` address of a transaction, usually the contract it called.
    pub async fn transaction_target(&self, tx_hash: &str) -> Result<Option<String>, ScanError> {
        self.require_key()?;
        let url = format!(
            "{}?module=proxy&action=eth_getTransactionByHash&txhash={}&apikey={}",
            self.base_url, tx_hash, self.api_key
        );
        let data: ProxyResponse = self.client.get(&url).send().await?.json().await?;
        Ok(data.result.and_then(|tx| tx.to))
    }

    /// Contract addresses touched by a transaction's internal transfers.
    pub async fn internal_transfer_contracts(
        &self,
        tx_hash: &str,
    ) -> Result<Vec<String>, ScanError> {
        self.transfer_contracts("txlistinternal", tx_hash).await
    }

    /// Contract addresses from a transaction's token transfer events.
    pub async fn token_transfer_contracts(&self, tx_hash: &str) -> Result<Vec<String>, ScanError> {
        self.transfer_contracts("tokentx", tx_hash).await
    }

    async fn transfer_contracts(
        &self,
        action: &str,
        tx_hash: &str,
    ) -> Result<Vec<String>, ScanError> {
        self.require_key()?;
        let url = format!(
            "{}?module=account&action={}&txhash={}&apikey={}",
            self.base_url, action, tx_hash, self.api_key
        );
        let data: StatusResponse = self.client.get(&url).send().await?.json().await?;
        let entries: Vec<TransferEntry> = match data.result {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| ScanError::Unexpected(e.to_string()))?,
            None => Vec::new(),
        };
        Ok(entries
            .into_iter()
            .filter_map(|e| e.contract_address)
            .filter(|c| !c.is_empty())
            .collect())
    }
}

#[async_trait::async_trait]
impl BalanceOracle for ScanClient {
    async fn has_balance(&self, wallet: &str, token: &str) -> Result<BalanceCheck, OracleError> {
        let wallet = if wallet.is_empty() {
            self.wallet.as_str()
        } else {
            wallet
        };
        if wallet.is_empty() {
            return Err(OracleError::NotConfigured("wallet address".to_string()));
        }
        let balance = self.token_balance(wallet, token).await?;
        Ok(if balance > 0 {
            BalanceCheck {
                has_balance: true,
                detail: format!("balance: {}", balance),
            }
        } else {
            BalanceCheck {
                has_balance: false,
                detail: "zero balance".to_string(),
            }
        })
    }
}

//! Chain Oracle Ports
//!
//! Read-side traits over external chain data: contract validation, spot
//! prices, wallet balances, and transaction lookup. Adapters implement
//! these against HTTP explorers; tests implement them with mocks.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle network error: {0}")]
    Network(String),
    #[error("oracle not configured: {0}")]
    NotConfigured(String),
    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

/// Validation result with a human-readable reason for the operator.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub valid: bool,
    pub reason: String,
}

impl Verdict {
    pub fn valid(reason: impl Into<String>) -> Self {
        Self {
            valid: true,
            reason: reason.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
        }
    }
}

/// Whether the configured wallet currently holds a token.
#[derive(Debug, Clone)]
pub struct BalanceCheck {
    pub has_balance: bool,
    pub detail: String,
}

/// Decides whether a contract address is worth trading at all.
#[async_trait]
pub trait ContractValidator: Send + Sync {
    async fn verify(&self, contract: &str) -> Result<Verdict, OracleError>;
}

/// Spot price source. `Ok(None)` means the source answered but lists no
/// price for the token, which is distinct from a transport failure.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn current_price(&self, contract: &str) -> Result<Option<f64>, OracleError>;
}

/// On-chain holdings check used to cross-validate agent claims.
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    async fn has_balance(&self, wallet: &str, token: &str) -> Result<BalanceCheck, OracleError>;
}

/// Resolves the token contract a transaction touched, for confirmations
/// that carry only a tx hash.
#[async_trait]
pub trait TransactionLookup: Send + Sync {
    async fn resolve_contract(&self, tx_hash: &str) -> Result<Option<String>, OracleError>;
}

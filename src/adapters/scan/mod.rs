//! Explorer-Backed Oracles
//!
//! Contract validation and transaction lookup built on the explorer
//! client plus the DEX price API.

pub mod client;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::adapters::dexscreener::DexScreenerClient;
use crate::ports::oracles::{
    ContractValidator, OracleError, TransactionLookup, Verdict,
};

pub use client::{ScanClient, ScanError};

/// Validates contracts against the explorer and the DEX listing.
///
/// Order matters: a known ABI is the strongest signal, a live trading
/// pair is the fallback. With no explorer key configured, a token with
/// no pair cannot be fully validated and is rejected with that reason.
pub struct ChainContractValidator {
    scan: Option<Arc<ScanClient>>,
    dex: Arc<DexScreenerClient>,
}

impl ChainContractValidator {
    pub fn new(scan: Option<Arc<ScanClient>>, dex: Arc<DexScreenerClient>) -> Self {
        Self { scan, dex }
    }
}

#[async_trait]
impl ContractValidator for ChainContractValidator {
    async fn verify(&self, contract: &str) -> Result<Verdict, OracleError> {
        if let Some(scan) = &self.scan {
            match scan.contract_abi_known(contract).await {
                Ok(true) => return Ok(Verdict::valid("contract known to explorer")),
                Ok(false) => {}
                Err(e) => warn!(contract, error = %e, "explorer ABI check failed"),
            }
        }

        if self.dex.token_pairs(contract).await?.is_some() {
            return Ok(Verdict::valid("trading pair listed"));
        }

        if self.scan.is_none() {
            return Ok(Verdict::invalid(
                "explorer API key not configured and no trading pair found",
            ));
        }
        Ok(Verdict::invalid(
            "no trading pair found, possibly a new or unlisted contract",
        ))
    }
}

/// Resolves the token contract behind a transaction hash.
///
/// Tries the direct transaction target first, then internal transfers,
/// then token transfer events. The first two candidates are re-validated
/// before use; the token transfer listing is trusted as-is since it only
/// ever names token contracts.
pub struct TxContractResolver {
    scan: Arc<ScanClient>,
    validator: Arc<dyn ContractValidator>,
}

impl TxContractResolver {
    pub fn new(scan: Arc<ScanClient>, validator: Arc<dyn ContractValidator>) -> Self {
        Self { scan, validator }
    }

    async fn validated(&self, contract: &str) -> bool {
        match self.validator.verify(contract).await {
            Ok(verdict) => verdict.valid,
            Err(e) => {
                warn!(contract, error = %e, "validation during tx lookup failed");
                false
            }
        }
    }
}

#[async_trait]
impl TransactionLookup for TxContractResolver {
    async fn resolve_contract(&self, tx_hash: &str) -> Result<Option<String>, OracleError> {
        match self.scan.transaction_target(tx_hash).await {
            Ok(Some(target)) => {
                if self.validated(&target).await {
                    return Ok(Some(target));
                }
            }
            Ok(None) => {}
            Err(e) => warn!(tx_hash, error = %e, "transaction target lookup failed"),
        }

        match self.scan.internal_transfer_contracts(tx_hash).await {
            Ok(contracts) => {
                for contract in contracts {
                    if self.validated(&contract).await {
                        return Ok(Some(contract));
                    }
                }
            }
            Err(e) => warn!(tx_hash, error = %e, "internal transfer lookup failed"),
        }

        match self.scan.token_transfer_contracts(tx_hash).await {
            Ok(contracts) => Ok(contracts.into_iter().next()),
            Err(e) => {
                warn!(tx_hash, error = %e, "token transfer lookup failed");
                Ok(None)
            }
        }
    }
}

//! Mock Port Implementations
//!
//! Hand-rolled recording mocks for unit and integration tests. Each mock
//! records the calls it receives and replays scripted responses; when a
//! script runs down to its last step, that step repeats, which keeps
//! steady-state scenarios short to set up.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::ports::messaging::{InboundMessage, MessageTarget, Messaging, MessagingError};
use crate::ports::oracles::{
    BalanceCheck, BalanceOracle, ContractValidator, OracleError, PriceOracle, TransactionLookup,
    Verdict,
};

fn next_step<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

// ============================================================================
// Messaging
// ============================================================================

#[derive(Debug, Default)]
pub struct MockMessaging {
    sent: Mutex<Vec<(MessageTarget, String)>>,
    fail_sends: Mutex<bool>,
}

impl MockMessaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let mock = Self::default();
        *mock.fail_sends.lock().unwrap() = true;
        mock
    }

    pub fn sent(&self) -> Vec<(MessageTarget, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Messages sent to a specific target, in order.
    pub fn sent_to(&self, target: &MessageTarget) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Messaging for MockMessaging {
    async fn send(&self, target: &MessageTarget, text: &str) -> Result<(), MessagingError> {
        if *self.fail_sends.lock().unwrap() {
            return Err(MessagingError::SendFailed("mock send failure".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((target.clone(), text.to_string()));
        Ok(())
    }
}

/// Convenience constructor for inbound messages in tests.
pub fn inbound(sender: i64, text: &str) -> InboundMessage {
    InboundMessage {
        sender,
        sender_username: None,
        text: text.to_string(),
        entity_urls: Vec::new(),
    }
}

// ============================================================================
// Contract validation
// ============================================================================

#[derive(Debug, Default)]
pub struct MockValidator {
    verdicts: Mutex<HashMap<String, Verdict>>,
    calls: Mutex<Vec<String>>,
}

impl MockValidator {
    /// Validator that accepts every contract.
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn with_verdict(self, contract: &str, verdict: Verdict) -> Self {
        self.verdicts
            .lock()
            .unwrap()
            .insert(contract.to_string(), verdict);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContractValidator for MockValidator {
    async fn verify(&self, contract: &str) -> Result<Verdict, OracleError> {
        self.calls.lock().unwrap().push(contract.to_string());
        Ok(self
            .verdicts
            .lock()
            .unwrap()
            .get(contract)
            .cloned()
            .unwrap_or_else(|| Verdict::valid("mock: accepted")))
    }
}

// ============================================================================
// Prices
// ============================================================================

type PriceStep = Result<Option<f64>, String>;

#[derive(Debug, Default)]
pub struct MockPriceOracle {
    scripts: Mutex<HashMap<String, VecDeque<PriceStep>>>,
    calls: Mutex<Vec<String>>,
}

impl MockPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, contract: &str, step: PriceStep) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(contract.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn with_price(self, contract: &str, price: f64) -> Self {
        self.push(contract, Ok(Some(price)))
    }

    pub fn with_missing(self, contract: &str) -> Self {
        self.push(contract, Ok(None))
    }

    pub fn with_error(self, contract: &str, message: &str) -> Self {
        self.push(contract, Err(message.to_string()))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, contract: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == contract)
            .count()
    }
}

#[async_trait]
impl PriceOracle for MockPriceOracle {
    async fn current_price(&self, contract: &str) -> Result<Option<f64>, OracleError> {
        self.calls.lock().unwrap().push(contract.to_string());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(contract)
            .and_then(next_step);
        match step {
            Some(Ok(price)) => Ok(price),
            Some(Err(message)) => Err(OracleError::Network(message)),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Balances
// ============================================================================

type BalanceStep = Result<bool, String>;

#[derive(Debug, Default)]
pub struct MockBalanceOracle {
    scripts: Mutex<HashMap<String, VecDeque<BalanceStep>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockBalanceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, token: &str, step: BalanceStep) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(token.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn with_balance(self, token: &str) -> Self {
        self.push(token, Ok(true))
    }

    pub fn with_zero_balance(self, token: &str) -> Self {
        self.push(token, Ok(false))
    }

    pub fn with_error(self, token: &str, message: &str) -> Self {
        self.push(token, Err(message.to_string()))
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BalanceOracle for MockBalanceOracle {
    async fn has_balance(&self, wallet: &str, token: &str) -> Result<BalanceCheck, OracleError> {
        self.calls
            .lock()
            .unwrap()
            .push((wallet.to_string(), token.to_string()));
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(token)
            .and_then(next_step);
        match step {
            Some(Ok(has_balance)) => Ok(BalanceCheck {
                has_balance,
                detail: "mock".to_string(),
            }),
            Some(Err(message)) => Err(OracleError::Network(message)),
            None => Ok(BalanceCheck {
                has_balance: false,
                detail: "mock: unscripted token".to_string(),
            }),
        }
    }
}

// ============================================================================
// Transaction lookup
// ============================================================================

#[derive(Debug, Default)]
pub struct MockLookup {
    contracts: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl MockLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contract(self, tx_hash: &str, contract: &str) -> Self {
        self.contracts
            .lock()
            .unwrap()
            .insert(tx_hash.to_string(), contract.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionLookup for MockLookup {
    async fn resolve_contract(&self, tx_hash: &str) -> Result<Option<String>, OracleError> {
        self.calls.lock().unwrap().push(tx_hash.to_string());
        Ok(self.contracts.lock().unwrap().get(tx_hash).cloned())
    }
}

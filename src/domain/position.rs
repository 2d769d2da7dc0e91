//! Position Book
//!
//! Open, monitored holdings resulting from confirmed buys. At most one
//! position exists per contract. Exit evaluation removes a position at
//! decision time (optimistic close); the sell confirmation may still be
//! lost, a race this design accepts in exchange for never double-selling.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ledger::SellReason;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub contract: String,
    /// Entry price in USD.
    pub buy_price: f64,
    pub buy_time: DateTime<Utc>,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// Chat id of the operator to notify about this position.
    pub owner: i64,
    /// Whether an independent ledger lookup has corroborated the buy.
    pub balance_confirmed: bool,
    /// Whether the owner has been warned about an ambiguous balance.
    /// Suppresses repeat notifications within one episode.
    pub balance_notified: bool,
    /// Whether the next reconciliation pass should re-check the balance.
    pub needs_balance_check: bool,
}

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("a position is already open for {0}")]
    AlreadyOpen(String),
    #[error("invalid buy price: {0}")]
    InvalidBuyPrice(f64),
}

impl Position {
    pub fn new(
        contract: String,
        buy_price: f64,
        owner: i64,
        take_profit_pct: f64,
        stop_loss_pct: f64,
    ) -> Result<Self, PositionError> {
        if buy_price <= 0.0 || !buy_price.is_finite() {
            return Err(PositionError::InvalidBuyPrice(buy_price));
        }
        Ok(Self {
            contract,
            buy_price,
            buy_time: Utc::now(),
            take_profit_pct,
            stop_loss_pct,
            owner,
            balance_confirmed: false,
            balance_notified: false,
            needs_balance_check: true,
        })
    }

    /// Percentage gain at the given price relative to entry.
    pub fn gain_pct(&self, current_price: f64) -> f64 {
        (current_price - self.buy_price) / self.buy_price * 100.0
    }
}

/// Exit instruction produced by evaluation, consumed by the caller to
/// dispatch a sell and notify the owner.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub contract: String,
    pub owner: i64,
    pub buy_price: f64,
    pub sell_price: f64,
    pub gain_pct: f64,
    pub reason: SellReason,
}

/// The set of open positions, keyed by contract address.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: HashMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new position. Fails if the contract already has one.
    pub fn open(&mut self, position: Position) -> Result<(), PositionError> {
        if self.positions.contains_key(&position.contract) {
            return Err(PositionError::AlreadyOpen(position.contract));
        }
        self.positions.insert(position.contract.clone(), position);
        Ok(())
    }

    /// Check exit conditions for every position with an available price
    /// sample. Positions whose threshold fired are removed from the open
    /// set and returned as decisions; positions without a price sample are
    /// left untouched.
    pub fn evaluate(&mut self, prices: &HashMap<String, f64>) -> Vec<ExitDecision> {
        let mut decisions = Vec::new();
        let fired: Vec<String> = self
            .positions
            .values()
            .filter_map(|p| {
                let price = *prices.get(&p.contract)?;
                let gain = p.gain_pct(price);
                let reason = if gain >= p.take_profit_pct {
                    SellReason::TakeProfit
                } else if gain <= -p.stop_loss_pct {
                    SellReason::StopLoss
                } else {
                    return None;
                };
                decisions.push(ExitDecision {
                    contract: p.contract.clone(),
                    owner: p.owner,
                    buy_price: p.buy_price,
                    sell_price: price,
                    gain_pct: gain,
                    reason,
                });
                Some(p.contract.clone())
            })
            .collect();
        for contract in fired {
            self.positions.remove(&contract);
        }
        decisions
    }

    /// Remove a position unconditionally (zero on-chain balance, abandoned
    /// buy, confirmed sell).
    pub fn force_close(&mut self, contract: &str) -> Option<Position> {
        self.positions.remove(contract)
    }

    pub fn get(&self, contract: &str) -> Option<&Position> {
        self.positions.get(contract)
    }

    pub fn contains(&self, contract: &str) -> bool {
        self.positions.contains_key(contract)
    }

    pub fn contracts(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// Contracts whose balance should be re-checked this pass.
    pub fn needing_balance_check(&self, continuous: bool) -> Vec<String> {
        self.positions
            .values()
            .filter(|p| p.needs_balance_check || continuous)
            .map(|p| p.contract.clone())
            .collect()
    }

    pub fn mark_balance_confirmed(&mut self, contract: &str) {
        if let Some(p) = self.positions.get_mut(contract) {
            p.balance_confirmed = true;
            p.needs_balance_check = false;
        }
    }

    /// Record that the owner was warned about an ambiguous balance.
    /// Returns true if this is the first warning of the episode.
    pub fn mark_balance_notified(&mut self, contract: &str) -> bool {
        match self.positions.get_mut(contract) {
            Some(p) if !p.balance_notified => {
                p.balance_notified = true;
                p.needs_balance_check = false;
                true
            }
            Some(p) => {
                p.needs_balance_check = false;
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

//! Relay Trader
//!
//! Automates trading through a human-style chat trading agent. Operators
//! paste a contract address; the engine validates it, issues buy and
//! sell commands as chat messages, classifies the agent's free-text
//! replies, and reconciles claimed fills against on-chain balances and a
//! live price feed.
//!
//! Layout follows ports-and-adapters: `domain` holds the pure trading
//! state machine, `ports` the trait seams, `adapters` the HTTP-backed
//! implementations, and `application` the engine and its loop.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use application::{EngineSettings, ReconciliationLoop, TradingEngine};
pub use config::{load_config, Config};

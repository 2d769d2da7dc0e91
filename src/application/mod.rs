//! Application Layer
//!
//! The trading engine and the periodic reconciliation loop that drives
//! it.

pub mod engine;
pub mod monitor;

pub use engine::{EngineSettings, TradingEngine};
pub use monitor::ReconciliationLoop;

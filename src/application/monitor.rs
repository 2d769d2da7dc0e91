//! Reconciliation Loop
//!
//! Periodic pass over engine state: expire stale pending transactions,
//! cross-check balances on chain, then evaluate prices and dispatch any
//! exits. Each tick is independent; a failed step logs and the loop
//! moves on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::application::engine::TradingEngine;

pub struct ReconciliationLoop {
    engine: Arc<TradingEngine>,
    interval: Duration,
    is_running: Arc<RwLock<bool>>,
    shutdown_requested: Arc<RwLock<bool>>,
}

impl ReconciliationLoop {
    pub fn new(engine: Arc<TradingEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            is_running: Arc::new(RwLock::new(false)),
            shutdown_requested: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn shutdown(&self) {
        info!("Reconciliation loop shutdown requested");
        *self.shutdown_requested.write().await = true;
    }

    /// Run ticks until shutdown is requested.
    pub async fn run(&self) {
        *self.is_running.write().await = true;
        info!(interval_secs = self.interval.as_secs(), "Reconciliation loop started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if *self.shutdown_requested.read().await {
                break;
            }
            self.tick().await;
        }

        *self.is_running.write().await = false;
        info!("Reconciliation loop stopped");
    }

    /// One reconciliation pass. Order matters: stale entries go first so
    /// a dead buy cannot be confirmed by this tick's price action, and
    /// balances are squared with the chain before exits are evaluated.
    pub async fn tick(&self) {
        debug!("reconciliation tick");
        self.engine.expire_stale().await;
        self.engine.reconcile_balances().await;
        self.engine.check_positions().await;
    }
}

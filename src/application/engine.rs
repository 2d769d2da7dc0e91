//! Trading Engine
//!
//! Routes inbound chat traffic, drives the trade lifecycle, and issues
//! commands to the execution agent. Operators trigger buys by pasting a
//! contract address; the agent's free-text replies move pending
//! transactions through confirmation, retry, or abandonment; the
//! reconciliation loop calls back in for exits and balance checks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::{
    ExitDecision, FailureOutcome, PendingTransaction, Position, PositionBook, RetryOutcome,
    RetryPolicy, SellReason, SignalClassifier, TradeKind, TradeLog, TradeRecord, TradeSignal,
    TransactionLedger, Vocabulary,
};
use crate::ports::messaging::{InboundMessage, MessageTarget, Messaging};
use crate::ports::oracles::{BalanceOracle, ContractValidator, PriceOracle, TransactionLookup};

/// Engine parameters, flattened out of the config file.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub buy_amount: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub max_transaction_retries: u32,
    pub retry_delay: Duration,
    pub buy_confirmation_delay: Duration,
    pub check_balance_only_after_transaction: bool,
    pub wallet_address: String,
    pub authorized_users: Vec<i64>,
    pub agent_username: String,
    pub agent_chat_id: i64,
    pub dispatch_target: MessageTarget,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            buy_amount: config.trading.buy_amount,
            take_profit_pct: config.trading.take_profit_pct,
            stop_loss_pct: config.trading.stop_loss_pct,
            max_transaction_retries: config.retry.max_transaction_retries,
            retry_delay: Duration::from_secs(config.retry.retry_delay_secs),
            buy_confirmation_delay: Duration::from_secs(config.retry.buy_confirmation_delay_secs),
            check_balance_only_after_transaction: config
                .monitor
                .check_balance_only_after_transaction,
            wallet_address: config.chain.wallet_address.clone(),
            authorized_users: config.chat.authorized_users.clone(),
            agent_username: config.chat.bot_username.clone(),
            agent_chat_id: config.chat.bot_chat_id,
            dispatch_target: config.chat.dispatch_target(),
        }
    }
}

pub struct TradingEngine {
    settings: EngineSettings,
    ledger: Arc<RwLock<TransactionLedger>>,
    positions: Arc<RwLock<PositionBook>>,
    classifier: SignalClassifier,
    validator: Arc<dyn ContractValidator>,
    prices: Arc<dyn PriceOracle>,
    balances: Arc<dyn BalanceOracle>,
    lookup: Option<Arc<dyn TransactionLookup>>,
    messaging: Arc<dyn Messaging>,
    trade_log: TradeLog,
    price_retry: RetryPolicy,
    balance_retry: RetryPolicy,
}

impl TradingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: EngineSettings,
        validator: Arc<dyn ContractValidator>,
        prices: Arc<dyn PriceOracle>,
        balances: Arc<dyn BalanceOracle>,
        lookup: Option<Arc<dyn TransactionLookup>>,
        messaging: Arc<dyn Messaging>,
        trade_log: TradeLog,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            settings,
            ledger: Arc::new(RwLock::new(TransactionLedger::new())),
            positions: Arc::new(RwLock::new(PositionBook::new())),
            classifier: SignalClassifier::new(Vocabulary::default())?,
            validator,
            prices,
            balances,
            lookup,
            messaging,
            trade_log,
            price_retry: RetryPolicy::fixed(3, Duration::from_secs(2)),
            balance_retry: RetryPolicy::fixed(3, Duration::from_secs(5)),
        })
    }

    /// Swap the retry timing, mainly so tests run on millisecond delays.
    pub fn with_retry_policies(mut self, price: RetryPolicy, balance: RetryPolicy) -> Self {
        self.price_retry = price;
        self.balance_retry = balance;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn pending_count(&self) -> usize {
        self.ledger.read().await.len()
    }

    pub async fn open_position(&self, contract: &str) -> Option<Position> {
        self.positions.read().await.get(contract).cloned()
    }

    fn is_agent(&self, msg: &InboundMessage) -> bool {
        if self.settings.agent_chat_id != 0 && msg.sender == self.settings.agent_chat_id {
            return true;
        }
        msg.sender_username
            .as_deref()
            .map(|u| u.eq_ignore_ascii_case(&self.settings.agent_username))
            .unwrap_or(false)
    }

    /// Entry point for every inbound chat message.
    pub async fn handle_message(&self, msg: &InboundMessage) {
        if self.is_agent(msg) {
            self.handle_agent_reply(msg).await;
        } else {
            self.handle_operator_message(msg).await;
        }
    }

    async fn notify(&self, owner: i64, text: &str) {
        if let Err(e) = self
            .messaging
            .send(&MessageTarget::ChatId(owner), text)
            .await
        {
            error!(owner, error = %e, "failed to notify operator");
        }
    }

    async fn dispatch(&self, command: &str) -> bool {
        match self
            .messaging
            .send(&self.settings.dispatch_target, command)
            .await
        {
            Ok(()) => {
                info!(command, "command dispatched");
                true
            }
            Err(e) => {
                error!(command, error = %e, "command dispatch failed");
                false
            }
        }
    }

    fn fallback_owner(&self) -> i64 {
        self.settings.authorized_users.first().copied().unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Operator path
    // ------------------------------------------------------------------

    async fn handle_operator_message(&self, msg: &InboundMessage) {
        let text = msg.text.trim();

        // Slash commands are for other bots, never trade triggers.
        if text.starts_with('/') {
            debug!(sender = msg.sender, "ignoring slash command");
            return;
        }
        if !(text.starts_with("0x") && text.len() == 42) {
            return;
        }
        let contract = text.to_string();

        if !self.settings.authorized_users.contains(&msg.sender) {
            warn!(sender = msg.sender, "unauthorized trade attempt");
            self.notify(msg.sender, "You are not authorized to use this bot.")
                .await;
            return;
        }

        info!(contract, sender = msg.sender, "contract address received");
        match self.validator.verify(&contract).await {
            Ok(verdict) if verdict.valid => {}
            Ok(verdict) => {
                self.notify(
                    msg.sender,
                    &format!("Contract {} rejected: {}", contract, verdict.reason),
                )
                .await;
                return;
            }
            Err(e) => {
                warn!(contract, error = %e, "contract validation failed");
                self.notify(
                    msg.sender,
                    &format!("Could not validate contract {}: {}", contract, e),
                )
                .await;
                return;
            }
        }

        let opened = self.ledger.write().await.open(
            &contract,
            TradeKind::Buy,
            msg.sender,
            None,
            self.settings.max_transaction_retries,
            Instant::now(),
        );
        if opened.is_err() {
            self.notify(
                msg.sender,
                &format!("A buy for {} is already pending.", contract),
            )
            .await;
            return;
        }

        let command = format!("/buy {} {}", contract, self.settings.buy_amount);
        if !self.dispatch(&command).await {
            self.ledger.write().await.confirm(&contract, TradeKind::Buy);
            self.notify(
                msg.sender,
                &format!("Failed to send buy command for {}.", contract),
            )
            .await;
            return;
        }
        self.notify(msg.sender, &format!("Buy command sent for {}.", contract))
            .await;

        // Give the agent time to act before this handler returns. Each
        // message runs in its own task, so only this trade is paced.
        tokio::time::sleep(self.settings.buy_confirmation_delay).await;
    }

    // ------------------------------------------------------------------
    // Agent reply path
    // ------------------------------------------------------------------

    pub async fn handle_agent_reply(&self, msg: &InboundMessage) {
        match self.classifier.classify(&msg.text) {
            TradeSignal::BuyConfirmed { contract } => {
                self.on_buy_confirmed(msg, contract).await;
            }
            TradeSignal::SellConfirmed { contract } => {
                self.on_sell_confirmed(msg, contract).await;
            }
            TradeSignal::TradeFailed => {
                self.on_trade_failed(msg).await;
            }
            TradeSignal::Unrecognized => {
                debug!("unrecognized agent message");
            }
        }
    }

    /// Contract named in the reply, or resolved from a linked tx hash.
    async fn resolve_reply_contract(
        &self,
        msg: &InboundMessage,
        direct: Option<String>,
    ) -> Option<String> {
        if direct.is_some() {
            return direct;
        }
        let lookup = self.lookup.as_ref()?;
        let tx_hash = self.classifier.extract_tx_hash(&msg.text, &msg.entity_urls)?;
        match lookup.resolve_contract(&tx_hash).await {
            Ok(contract) => contract,
            Err(e) => {
                warn!(tx_hash, error = %e, "tx contract resolution failed");
                None
            }
        }
    }

    async fn on_buy_confirmed(&self, msg: &InboundMessage, direct: Option<String>) {
        let resolved = self.resolve_reply_contract(msg, direct).await;

        // Only fills this engine requested become positions. The agent
        // chat can carry confirmations of other people's trades.
        let (contract, entry) = {
            let mut ledger = self.ledger.write().await;
            match resolved {
                Some(ca) => match ledger.confirm(&ca, TradeKind::Buy) {
                    Some(entry) => (ca, entry),
                    None => {
                        warn!(
                            contract = ca,
                            "buy confirmation for a trade this engine never issued"
                        );
                        return;
                    }
                },
                None => match ledger.confirm_most_recent(TradeKind::Buy) {
                    Some(entry) => (entry.contract.clone(), entry),
                    None => {
                        warn!("buy confirmation with no contract and no pending buy");
                        return;
                    }
                },
            }
        };
        let owner = entry.owner;
        info!(contract, owner, "buy confirmed by agent");

        let prices = self.prices.clone();
        let ca = contract.clone();
        let outcome = self
            .price_retry
            .run_until(
                move || {
                    let prices = prices.clone();
                    let ca = ca.clone();
                    async move { prices.current_price(&ca).await }
                },
                |price| price.is_some(),
            )
            .await;

        let price = match outcome {
            RetryOutcome::Accepted(Some(price)) => price,
            _ => {
                warn!(contract, "no price available after buy confirmation");
                self.notify(
                    owner,
                    &format!(
                        "Buy of {} confirmed, but no price is available. \
                         The position will not be monitored.",
                        contract
                    ),
                )
                .await;
                return;
            }
        };

        let position = match Position::new(
            contract.clone(),
            price,
            owner,
            self.settings.take_profit_pct,
            self.settings.stop_loss_pct,
        ) {
            Ok(position) => position,
            Err(e) => {
                error!(contract, error = %e, "refusing to open position");
                return;
            }
        };
        if let Err(e) = self.positions.write().await.open(position) {
            warn!(contract, error = %e, "position already tracked");
        } else {
            info!(contract, price, "position opened");
        }

        self.record_trade(&contract, TradeKind::Buy, price, &self.buy_amount_str(), owner);
        self.notify(
            owner,
            &format!(
                "Bought {} at {:.8}. Monitoring for take-profit/stop-loss.",
                contract, price
            ),
        )
        .await;

        self.corroborate_buy_balance(&contract, owner).await;
    }

    fn buy_amount_str(&self) -> String {
        self.settings.buy_amount.to_string()
    }

    /// Cross-check the agent's buy claim against the chain. A missing
    /// balance is worth a warning but not a forced close; the token may
    /// simply land late.
    async fn corroborate_buy_balance(&self, contract: &str, owner: i64) {
        if self.settings.wallet_address.is_empty() {
            return;
        }
        let balances = self.balances.clone();
        let wallet = self.settings.wallet_address.clone();
        let ca = contract.to_string();
        let outcome = self
            .balance_retry
            .run_until(
                move || {
                    let balances = balances.clone();
                    let wallet = wallet.clone();
                    let ca = ca.clone();
                    async move { balances.has_balance(&wallet, &ca).await }
                },
                |check| check.has_balance,
            )
            .await;

        match outcome {
            RetryOutcome::Accepted(_) => {
                self.positions.write().await.mark_balance_confirmed(contract);
                info!(contract, "buy corroborated on chain");
            }
            RetryOutcome::Exhausted(_) => {
                warn!(contract, "buy reported but no balance detected on chain");
                if self.positions.write().await.mark_balance_notified(contract) {
                    self.notify(
                        owner,
                        &format!(
                            "Warning: the agent reported a buy of {}, but no token \
                             balance is visible on chain. Price monitoring continues.",
                            contract
                        ),
                    )
                    .await;
                }
            }
        }
    }

    async fn on_sell_confirmed(&self, msg: &InboundMessage, direct: Option<String>) {
        let resolved = self.resolve_reply_contract(msg, direct).await;

        let (contract, entry) = {
            let mut ledger = self.ledger.write().await;
            match resolved {
                Some(ca) => {
                    let entry = ledger.confirm(&ca, TradeKind::Sell);
                    (ca, entry)
                }
                None => match ledger.confirm_most_recent(TradeKind::Sell) {
                    Some(entry) => (entry.contract.clone(), Some(entry)),
                    None => {
                        warn!("sell confirmation with no contract and no pending sell");
                        return;
                    }
                },
            }
        };
        let owner = entry
            .as_ref()
            .map(|e| e.owner)
            .unwrap_or_else(|| self.fallback_owner());
        info!(contract, owner, "sell confirmed by agent");

        if !self.positions.read().await.contains(&contract) {
            info!(contract, "sell confirmed for unmonitored contract");
            return;
        }

        if self.settings.wallet_address.is_empty() {
            self.positions.write().await.force_close(&contract);
            self.notify(
                owner,
                &format!("Sell of {} confirmed; monitoring stopped.", contract),
            )
            .await;
            return;
        }

        let balances = self.balances.clone();
        let wallet = self.settings.wallet_address.clone();
        let ca = contract.clone();
        let outcome = self
            .balance_retry
            .run_until(
                move || {
                    let balances = balances.clone();
                    let wallet = wallet.clone();
                    let ca = ca.clone();
                    async move { balances.has_balance(&wallet, &ca).await }
                },
                |check| !check.has_balance,
            )
            .await;

        match outcome {
            RetryOutcome::Exhausted(Some(check)) if check.has_balance => {
                warn!(contract, "sell reported but balance still on chain");
                if self.positions.write().await.mark_balance_notified(&contract) {
                    self.notify(
                        owner,
                        &format!(
                            "Warning: the agent reported a sell of {}, but the chain \
                             still shows a balance. Price monitoring continues.",
                            contract
                        ),
                    )
                    .await;
                }
            }
            _ => {
                self.positions.write().await.force_close(&contract);
                self.notify(
                    owner,
                    &format!(
                        "Chain confirms {} fully sold; monitoring stopped.",
                        contract
                    ),
                )
                .await;
            }
        }
    }

    async fn on_trade_failed(&self, msg: &InboundMessage) {
        let outcome = self.ledger.write().await.fail_most_recent(Instant::now());
        match outcome {
            Some(FailureOutcome::Retry { attempt }) => {
                info!(
                    contract = attempt.contract,
                    retry = attempt.retry_count,
                    max = attempt.max_retries,
                    "trade failed, scheduling retry"
                );
                self.notify(
                    attempt.owner,
                    &format!(
                        "{} of {} failed, retrying ({}/{})...",
                        capitalize(&attempt.kind.to_string()),
                        attempt.contract,
                        attempt.retry_count,
                        attempt.max_retries
                    ),
                )
                .await;
                self.schedule_redispatch(attempt);
            }
            Some(FailureOutcome::Abandon { entry }) => {
                warn!(
                    contract = entry.contract,
                    attempts = entry.max_retries,
                    "trade abandoned after exhausting retries"
                );
                let mut text = format!(
                    "Warning: {} of {} failed after {} attempts. Reason: {}\n",
                    entry.kind, entry.contract, entry.max_retries, msg.text
                );
                match entry.kind {
                    TradeKind::Buy => {
                        text.push_str("Check slippage settings or try again later.");
                        if self
                            .positions
                            .write()
                            .await
                            .force_close(&entry.contract)
                            .is_some()
                        {
                            info!(contract = entry.contract, "monitoring stopped after failed buy");
                        }
                    }
                    TradeKind::Sell => {
                        text.push_str(
                            "Price monitoring continues. Check manually or sell again later.",
                        );
                    }
                }
                self.notify(entry.owner, &text).await;
            }
            None => {
                warn!("trade failure reported with no pending transaction");
                self.notify(
                    self.fallback_owner(),
                    &format!(
                        "Warning: the agent reported a trade failure, but no pending \
                         transaction matched. Reason: {}",
                        msg.text
                    ),
                )
                .await;
            }
        }
    }

    fn command_for(&self, entry: &PendingTransaction) -> String {
        match entry.kind {
            TradeKind::Buy => format!("/buy {} {}", entry.contract, self.settings.buy_amount),
            TradeKind::Sell => format!("/sell {} 100", entry.contract),
        }
    }

    fn schedule_redispatch(&self, attempt: PendingTransaction) {
        let command = self.command_for(&attempt);
        let messaging = self.messaging.clone();
        let target = self.settings.dispatch_target.clone();
        let delay = self.settings.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = messaging.send(&target, &command).await {
                error!(command, error = %e, "retry dispatch failed");
            } else {
                info!(command, "retry dispatched");
            }
        });
    }

    // ------------------------------------------------------------------
    // Reconciliation hooks, driven by the monitor loop
    // ------------------------------------------------------------------

    /// Drop pending entries whose reply never came. No retry here; a
    /// silent agent gets nothing resent.
    pub async fn expire_stale(&self) {
        let stale = self.ledger.write().await.expire(Instant::now());
        for entry in stale {
            warn!(
                contract = entry.contract,
                kind = %entry.kind,
                "pending transaction expired without a reply"
            );
            self.notify(
                entry.owner,
                &format!(
                    "No reply for the {} of {} within 5 minutes; the request was dropped.",
                    entry.kind, entry.contract
                ),
            )
            .await;
        }
    }

    /// Probe balances for positions flagged for a check (or all of them,
    /// when continuous checking is configured). A zero balance means the
    /// position is gone on chain and monitoring stops.
    pub async fn reconcile_balances(&self) {
        if self.settings.wallet_address.is_empty() {
            return;
        }
        let continuous = !self.settings.check_balance_only_after_transaction;
        let contracts = self
            .positions
            .read()
            .await
            .needing_balance_check(continuous);

        for contract in contracts {
            let balances = self.balances.clone();
            let wallet = self.settings.wallet_address.clone();
            let ca = contract.clone();
            let outcome = self
                .balance_retry
                .run_until(
                    move || {
                        let balances = balances.clone();
                        let wallet = wallet.clone();
                        let ca = ca.clone();
                        async move { balances.has_balance(&wallet, &ca).await }
                    },
                    |check| !check.has_balance,
                )
                .await;

            match outcome {
                RetryOutcome::Accepted(_) => {
                    let closed = self.positions.write().await.force_close(&contract);
                    if let Some(position) = closed {
                        info!(contract, "zero balance on chain, monitoring stopped");
                        self.notify(
                            position.owner,
                            &format!(
                                "Chain shows zero balance for {}; monitoring stopped.",
                                contract
                            ),
                        )
                        .await;
                    }
                }
                RetryOutcome::Exhausted(Some(check)) if check.has_balance => {
                    let (owner, first_notice) = {
                        let mut book = self.positions.write().await;
                        book.mark_balance_confirmed(&contract);
                        let owner = book.get(&contract).map(|p| p.owner);
                        (owner, book.mark_balance_notified(&contract))
                    };
                    if first_notice {
                        if let Some(owner) = owner {
                            self.notify(
                                owner,
                                &format!(
                                    "Still holding {} on chain; monitoring continues.",
                                    contract
                                ),
                            )
                            .await;
                        }
                    }
                }
                RetryOutcome::Exhausted(_) => {
                    warn!(contract, "balance probe failed, will retry next tick");
                }
            }
        }
    }

    /// Fetch prices for every open position and dispatch sells for the
    /// ones that crossed a threshold. One fetch attempt per tick; a miss
    /// just waits for the next round.
    pub async fn check_positions(&self) {
        let contracts = self.positions.read().await.contracts();
        if contracts.is_empty() {
            return;
        }

        let mut current = HashMap::new();
        for contract in &contracts {
            match self.prices.current_price(contract).await {
                Ok(Some(price)) => {
                    current.insert(contract.clone(), price);
                }
                Ok(None) => warn!(contract, "no price listed this tick"),
                Err(e) => warn!(contract, error = %e, "price fetch failed"),
            }
        }

        let decisions = self.positions.write().await.evaluate(&current);
        for decision in decisions {
            self.dispatch_sell(decision).await;
        }
    }

    /// Issue a sell command for a threshold crossing. The position was
    /// already removed by the evaluation; the chain check path reopens
    /// nothing if the sell later proves wrong, which is an accepted race.
    pub async fn dispatch_sell(&self, decision: ExitDecision) {
        let opened = self.ledger.write().await.open(
            &decision.contract,
            TradeKind::Sell,
            decision.owner,
            Some(decision.reason),
            self.settings.max_transaction_retries,
            Instant::now(),
        );
        if opened.is_err() {
            warn!(contract = decision.contract, "sell already pending, skipping");
            return;
        }

        let command = format!("/sell {} 100", decision.contract);
        if !self.dispatch(&command).await {
            self.ledger
                .write()
                .await
                .confirm(&decision.contract, TradeKind::Sell);
            self.notify(
                decision.owner,
                &format!(
                    "Failed to send sell command for {}. Sell manually.",
                    decision.contract
                ),
            )
            .await;
            return;
        }

        self.record_trade(
            &decision.contract,
            TradeKind::Sell,
            decision.sell_price,
            "100%",
            decision.owner,
        );

        let label = match decision.reason {
            SellReason::TakeProfit => "Take-profit",
            SellReason::StopLoss => "Stop-loss",
            SellReason::Manual => "Manual sell",
        };
        self.notify(
            decision.owner,
            &format!(
                "{} hit for {}: bought at {:.8}, now {:.8} ({:+.2}%). Sell command sent.",
                label, decision.contract, decision.buy_price, decision.sell_price, decision.gain_pct
            ),
        )
        .await;
    }

    fn record_trade(&self, contract: &str, action: TradeKind, price: f64, amount: &str, owner: i64) {
        let record = TradeRecord {
            timestamp: Utc::now(),
            contract: contract.to_string(),
            action,
            price,
            amount: amount.to_string(),
            owner,
        };
        if let Err(e) = self.trade_log.append(&record) {
            error!(contract, error = %e, "failed to append trade record");
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::{
        inbound, MockBalanceOracle, MockMessaging, MockPriceOracle, MockValidator,
    };
    use crate::ports::oracles::Verdict;
    use tempfile::TempDir;

    const CA: &str = "0x1111111111111111111111111111111111112222";
    const OPERATOR: i64 = 42;
    const AGENT: i64 = 900;

    struct Harness {
        engine: TradingEngine,
        messaging: Arc<MockMessaging>,
        prices: Arc<MockPriceOracle>,
        _dir: TempDir,
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            buy_amount: 0.1,
            take_profit_pct: 50.0,
            stop_loss_pct: 20.0,
            max_transaction_retries: 3,
            retry_delay: Duration::from_millis(1),
            buy_confirmation_delay: Duration::from_millis(1),
            check_balance_only_after_transaction: true,
            wallet_address: String::new(),
            authorized_users: vec![OPERATOR],
            agent_username: "trade_agent_bot".to_string(),
            agent_chat_id: AGENT,
            dispatch_target: MessageTarget::ChatId(AGENT),
        }
    }

    fn harness(validator: MockValidator, prices: MockPriceOracle) -> Harness {
        harness_with(validator, prices, Arc::new(MockMessaging::new()))
    }

    fn harness_with(
        validator: MockValidator,
        prices: MockPriceOracle,
        messaging: Arc<MockMessaging>,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let prices = Arc::new(prices);
        let engine = TradingEngine::new(
            settings(),
            Arc::new(validator),
            prices.clone(),
            Arc::new(MockBalanceOracle::new()),
            None,
            messaging.clone(),
            TradeLog::new(dir.path().join("trades.jsonl")),
        )
        .unwrap()
        .with_retry_policies(
            RetryPolicy::fixed(3, Duration::from_millis(1)),
            RetryPolicy::fixed(3, Duration::from_millis(1)),
        );
        Harness {
            engine,
            messaging,
            prices,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_operator_contract_triggers_buy_dispatch() {
        let h = harness(MockValidator::accepting(), MockPriceOracle::new());
        h.engine.handle_message(&inbound(OPERATOR, CA)).await;

        let sent = h.messaging.sent_to(&MessageTarget::ChatId(AGENT));
        assert_eq!(sent, vec![format!("/buy {} 0.1", CA)]);
        assert_eq!(h.engine.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_unauthorized_sender_is_denied() {
        let h = harness(MockValidator::accepting(), MockPriceOracle::new());
        h.engine.handle_message(&inbound(777, CA)).await;

        assert!(h.messaging.sent_to(&MessageTarget::ChatId(AGENT)).is_empty());
        let denials = h.messaging.sent_to(&MessageTarget::ChatId(777));
        assert_eq!(denials, vec!["You are not authorized to use this bot."]);
        assert_eq!(h.engine.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_contract_is_rejected() {
        let validator =
            MockValidator::accepting().with_verdict(CA, Verdict::invalid("no trading pair"));
        let h = harness(validator, MockPriceOracle::new());
        h.engine.handle_message(&inbound(OPERATOR, CA)).await;

        assert!(h.messaging.sent_to(&MessageTarget::ChatId(AGENT)).is_empty());
        let replies = h.messaging.sent_to(&MessageTarget::ChatId(OPERATOR));
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("no trading pair"));
    }

    #[tokio::test]
    async fn test_slash_commands_and_chatter_are_ignored() {
        let h = harness(MockValidator::accepting(), MockPriceOracle::new());
        h.engine.handle_message(&inbound(OPERATOR, "/start")).await;
        h.engine
            .handle_message(&inbound(OPERATOR, "what a day"))
            .await;
        h.engine.handle_message(&inbound(OPERATOR, "0xshort")).await;

        assert!(h.messaging.sent().is_empty());
        assert_eq!(h.engine.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_buy_is_rejected_while_pending() {
        let h = harness(MockValidator::accepting(), MockPriceOracle::new());
        h.engine.handle_message(&inbound(OPERATOR, CA)).await;
        h.engine.handle_message(&inbound(OPERATOR, CA)).await;

        let sent = h.messaging.sent_to(&MessageTarget::ChatId(AGENT));
        assert_eq!(sent.len(), 1);
        let replies = h.messaging.sent_to(&MessageTarget::ChatId(OPERATOR));
        assert!(replies.iter().any(|t| t.contains("already pending")));
    }

    #[tokio::test]
    async fn test_buy_confirmation_opens_position_at_fetched_price() {
        let prices = MockPriceOracle::new().with_price(CA, 10.0);
        let h = harness(MockValidator::accepting(), prices);
        h.engine.handle_message(&inbound(OPERATOR, CA)).await;

        let mut reply = inbound(AGENT, &format!("已成功买入 {}", CA));
        reply.sender_username = Some("trade_agent_bot".to_string());
        h.engine.handle_message(&reply).await;

        assert_eq!(h.engine.pending_count().await, 0);
        let position = h.engine.open_position(CA).await.unwrap();
        assert_eq!(position.buy_price, 10.0);
        assert_eq!(position.owner, OPERATOR);
    }

    #[tokio::test]
    async fn test_price_retry_exhaustion_leaves_position_unmonitored() {
        let prices = MockPriceOracle::new().with_missing(CA);
        let h = harness(MockValidator::accepting(), prices);
        h.engine.handle_message(&inbound(OPERATOR, CA)).await;

        let reply = inbound(AGENT, &format!("successfully bought {}", CA));
        h.engine.handle_message(&reply).await;

        assert!(h.engine.open_position(CA).await.is_none());
        let replies = h.messaging.sent_to(&MessageTarget::ChatId(OPERATOR));
        assert!(replies.iter().any(|t| t.contains("not be monitored")));
    }

    #[tokio::test]
    async fn test_failure_retries_then_abandons() {
        let h = harness(MockValidator::accepting(), MockPriceOracle::new());
        h.engine.handle_message(&inbound(OPERATOR, CA)).await;

        let failure = inbound(AGENT, "链上交易失败");
        h.engine.handle_message(&failure).await;
        h.engine.handle_message(&failure).await;
        h.engine.handle_message(&failure).await;

        assert_eq!(h.engine.pending_count().await, 0);
        let replies = h.messaging.sent_to(&MessageTarget::ChatId(OPERATOR));
        assert!(replies.iter().any(|t| t.contains("retrying (1/3)")));
        assert!(replies.iter().any(|t| t.contains("retrying (2/3)")));
        assert!(replies.iter().any(|t| t.contains("failed after 3 attempts")));
    }

    #[tokio::test]
    async fn test_take_profit_dispatches_sell() {
        let prices = MockPriceOracle::new().with_price(CA, 10.0).with_price(CA, 16.0);
        let h = harness(MockValidator::accepting(), prices);
        h.engine.handle_message(&inbound(OPERATOR, CA)).await;
        h.engine
            .handle_message(&inbound(AGENT, &format!("已成功买入 {}", CA)))
            .await;

        h.engine.check_positions().await;

        assert!(h.engine.open_position(CA).await.is_none());
        let sent = h.messaging.sent_to(&MessageTarget::ChatId(AGENT));
        assert!(sent.contains(&format!("/sell {} 100", CA)));
        let replies = h.messaging.sent_to(&MessageTarget::ChatId(OPERATOR));
        assert!(replies.iter().any(|t| t.contains("Take-profit")));
    }

    #[tokio::test]
    async fn test_fresh_entries_survive_expiry_pass() {
        let h = harness(MockValidator::accepting(), MockPriceOracle::new());
        h.engine.handle_message(&inbound(OPERATOR, CA)).await;

        // Fresh entry, nothing should expire.
        h.engine.expire_stale().await;
        assert_eq!(h.engine.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_unrequested_buy_confirmation_opens_nothing() {
        let prices = MockPriceOracle::new().with_price(CA, 10.0);
        let h = harness(MockValidator::accepting(), prices);

        // Confirmation for a trade nobody here requested.
        h.engine
            .handle_message(&inbound(AGENT, &format!("已成功买入 {}", CA)))
            .await;

        assert!(h.engine.open_position(CA).await.is_none());
        assert_eq!(h.prices.call_count(CA), 0);
        assert!(h.messaging.sent().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_failure_rolls_back_ledger_entry() {
        let messaging = Arc::new(MockMessaging::failing());
        let h = harness_with(
            MockValidator::accepting(),
            MockPriceOracle::new(),
            messaging,
        );
        h.engine.handle_message(&inbound(OPERATOR, CA)).await;

        // Undelivered command must not leave a live entry behind.
        assert_eq!(h.engine.pending_count().await, 0);
        assert!(h.messaging.sent().is_empty());
    }

    #[tokio::test]
    async fn test_price_errors_consume_retry_attempts() {
        let prices = MockPriceOracle::new()
            .with_error(CA, "feed down")
            .with_error(CA, "feed down")
            .with_price(CA, 10.0);
        let h = harness(MockValidator::accepting(), prices);
        h.engine.handle_message(&inbound(OPERATOR, CA)).await;

        h.engine
            .handle_message(&inbound(AGENT, &format!("已成功买入 {}", CA)))
            .await;

        // Two transport failures, then the price lands on the last try.
        assert_eq!(h.prices.call_count(CA), 3);
        let position = h.engine.open_position(CA).await.unwrap();
        assert_eq!(position.buy_price, 10.0);
        assert!(h
            .messaging
            .sent_texts()
            .iter()
            .any(|t| t.contains("Bought")));
    }
}

//! Relay Trader - Chat-Driven Trade Lifecycle Bot
//!
//! Drives a human-style chat trading agent: buys on pasted contract
//! addresses, classifies the agent's replies, and sells on take-profit
//! or stop-loss.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use relay_trader::adapters::{
    ChainContractValidator, DexScreenerClient, ScanClient, TelegramChat, TxContractResolver,
};
use relay_trader::application::{EngineSettings, ReconciliationLoop, TradingEngine};
use relay_trader::config::load_config;
use relay_trader::domain::{RetryPolicy, SignalClassifier, TradeLog, Vocabulary};
use relay_trader::ports::oracles::ContractValidator;

#[derive(Parser)]
#[command(name = "relay-trader", about = "Chat-driven trade lifecycle bot")]
struct Cli {
    /// Increase log verbosity to info
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Increase log verbosity to debug
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading engine
    Run {
        /// Path to the TOML config file
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Validate a contract address and exit
    Verify {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Contract address to check
        contract: String,
    },
    /// Classify a sample agent reply and exit
    Classify {
        /// Message text to classify
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (secrets go here, not in config.toml)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug)?;

    match cli.command {
        Command::Run { config } => run_command(config).await,
        Command::Verify { config, contract } => verify_command(config, contract).await,
        Command::Classify { text } => classify_command(text),
    }
}

fn init_logging(verbose: bool, debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).init();
    Ok(())
}

struct ChainStack {
    scan: Option<Arc<ScanClient>>,
    balances: Arc<ScanClient>,
    dex: Arc<DexScreenerClient>,
    validator: Arc<ChainContractValidator>,
}

fn build_chain_stack(config: &relay_trader::Config) -> Result<ChainStack> {
    let api_key = config.chain.get_scan_api_key();
    let scan_client = Arc::new(
        ScanClient::new(
            config.chain.scan_api_url.clone(),
            api_key,
            config.chain.wallet_address.clone(),
        )
        .context("Failed to create explorer client")?,
    );
    let scan = scan_client
        .is_configured()
        .then(|| scan_client.clone());
    let dex = Arc::new(
        DexScreenerClient::new(config.chain.price_api_url.clone())
            .context("Failed to create price client")?,
    );
    let validator = Arc::new(ChainContractValidator::new(scan.clone(), dex.clone()));
    Ok(ChainStack {
        scan,
        balances: scan_client,
        dex,
        validator,
    })
}

async fn run_command(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting relay-trader...");

    let config = load_config(&config_path).context("Failed to load configuration")?;
    let stack = build_chain_stack(&config)?;
    if stack.scan.is_none() {
        tracing::warn!("Explorer API key not set; balance cross-checks are disabled");
    }

    let chat = Arc::new(
        TelegramChat::new(&config.chat.get_bot_token())
            .context("Failed to create chat client")?,
    );

    let lookup = stack.scan.clone().map(|scan| {
        Arc::new(TxContractResolver::new(
            scan,
            stack.validator.clone() as Arc<dyn ContractValidator>,
        )) as Arc<dyn relay_trader::ports::oracles::TransactionLookup>
    });

    let engine = Arc::new(
        TradingEngine::new(
            EngineSettings::from(&config),
            stack.validator.clone(),
            stack.dex.clone(),
            stack.balances.clone(),
            lookup,
            chat.clone(),
            TradeLog::new(&config.logging.trade_log_file),
        )
        .context("Failed to create trading engine")?,
    );

    let monitor = Arc::new(ReconciliationLoop::new(
        engine.clone(),
        Duration::from_secs(config.monitor.price_check_interval_secs),
    ));

    // Setup Ctrl+C handler
    let monitor_handle = monitor.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
        monitor_handle.shutdown().await;
    });

    let monitor_task = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.run().await })
    };

    let (tx, mut rx) = mpsc::channel(64);
    let engine_task = {
        let engine = engine.clone();
        // One task per message: a handler that pauses (the buy
        // confirmation delay) must not hold up later messages, in
        // particular the agent reply it is waiting for.
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let engine = engine.clone();
                tokio::spawn(async move { engine.handle_message(&msg).await });
            }
        })
    };

    let result = poll_with_reconnect(chat, tx).await;

    monitor.shutdown().await;
    monitor_task.await.ok();
    engine_task.await.ok();
    tracing::info!("relay-trader stopped");
    result
}

/// Keep the chat update stream alive across transient failures, backing
/// off exponentially. After five consecutive failed connections the
/// process gives up rather than hammering the API.
async fn poll_with_reconnect(
    chat: Arc<TelegramChat>,
    tx: mpsc::Sender<relay_trader::ports::messaging::InboundMessage>,
) -> Result<()> {
    let policy = RetryPolicy::exponential(5, Duration::from_secs(2), Duration::from_secs(30));
    let mut attempt = 0u32;
    loop {
        match chat.run_updates(tx.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    bail!("chat connection lost after {} reconnect attempts: {}", attempt, e);
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "chat connection lost, reconnecting"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn verify_command(config_path: PathBuf, contract: String) -> Result<()> {
    let config = load_config(&config_path).context("Failed to load configuration")?;
    let stack = build_chain_stack(&config)?;
    let verdict = stack
        .validator
        .verify(&contract)
        .await
        .context("Validation failed")?;
    println!(
        "{}: {} ({})",
        contract,
        if verdict.valid { "valid" } else { "invalid" },
        verdict.reason
    );
    Ok(())
}

fn classify_command(text: String) -> Result<()> {
    let classifier =
        SignalClassifier::new(Vocabulary::default()).context("Failed to build classifier")?;
    println!("{:?}", classifier.classify(&text));
    Ok(())
}

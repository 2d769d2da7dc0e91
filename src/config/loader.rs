//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config.toml structure.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::ports::messaging::MessageTarget;

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub trading: TradingSection,
    pub retry: RetrySection,
    pub monitor: MonitorSection,
    pub chain: ChainSection,
    pub chat: ChatSection,
    pub logging: LoggingSection,
}

/// Trading parameters
#[derive(Debug, Clone, Deserialize)]
pub struct TradingSection {
    /// Native-token amount sent with each buy command
    pub buy_amount: f64,
    /// Gain percentage that triggers a sell (50.0 = +50%)
    pub take_profit_pct: f64,
    /// Loss percentage that triggers a sell (20.0 = -20%)
    pub stop_loss_pct: f64,
}

/// Transaction retry parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    /// Attempt budget per logical trade, first attempt included
    #[serde(default = "default_max_retries")]
    pub max_transaction_retries: u32,
    /// Delay before redispatching a failed trade, in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Pause after a buy command before processing continues, in seconds
    #[serde(default = "default_buy_confirmation_delay")]
    pub buy_confirmation_delay_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    10
}

fn default_buy_confirmation_delay() -> u64 {
    5
}

/// Price/balance monitoring parameters
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    /// Seconds between reconciliation ticks
    pub price_check_interval_secs: u64,
    /// When true, balances are probed only after a transaction marks the
    /// position; when false, every position is probed each tick
    #[serde(default)]
    pub check_balance_only_after_transaction: bool,
}

/// Chain data sources
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSection {
    /// Wallet address used for balance cross-checks; empty disables them
    #[serde(default)]
    pub wallet_address: String,
    /// Etherscan-style explorer API endpoint
    pub scan_api_url: String,
    /// Explorer API key; empty disables explorer-backed checks
    #[serde(default)]
    pub scan_api_key: String,
    /// DexScreener-style token price endpoint
    pub price_api_url: String,
}

impl ChainSection {
    /// Get explorer API key with environment variable override
    /// Checks SCAN_API_KEY env var first, falls back to config value
    pub fn get_scan_api_key(&self) -> String {
        std::env::var("SCAN_API_KEY").unwrap_or_else(|_| self.scan_api_key.clone())
    }
}

/// Chat routing
#[derive(Debug, Clone, Deserialize)]
pub struct ChatSection {
    /// Bot token; usually supplied via TELEGRAM_BOT_TOKEN instead
    #[serde(default)]
    pub bot_token: String,
    /// Username of the execution agent bot (without the @)
    pub bot_username: String,
    /// Chat id of the execution agent; 0 means unset, commands are then
    /// addressed by username
    #[serde(default)]
    pub bot_chat_id: i64,
    /// Operator chat ids allowed to trigger trades
    pub authorized_users: Vec<i64>,
}

impl ChatSection {
    /// Get bot token with environment variable override
    /// Checks TELEGRAM_BOT_TOKEN env var first, falls back to config value
    pub fn get_bot_token(&self) -> String {
        std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_else(|_| self.bot_token.clone())
    }

    /// Where trade commands are dispatched
    pub fn dispatch_target(&self) -> MessageTarget {
        if self.bot_chat_id != 0 {
            MessageTarget::ChatId(self.bot_chat_id)
        } else {
            MessageTarget::Username(self.bot_username.clone())
        }
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Append-only trade record file (JSON lines)
    #[serde(default = "default_trade_log_file")]
    pub trade_log_file: String,
}

fn default_trade_log_file() -> String {
    "transactions.jsonl".to_string()
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trading.buy_amount <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "buy_amount must be > 0, got {}",
                self.trading.buy_amount
            )));
        }

        if self.trading.take_profit_pct <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "take_profit_pct must be > 0, got {}",
                self.trading.take_profit_pct
            )));
        }

        if self.trading.stop_loss_pct <= 0.0 || self.trading.stop_loss_pct > 100.0 {
            return Err(ConfigError::ValidationError(format!(
                "stop_loss_pct must be 0-100, got {}",
                self.trading.stop_loss_pct
            )));
        }

        if self.retry.max_transaction_retries == 0 {
            return Err(ConfigError::ValidationError(
                "max_transaction_retries must be > 0".to_string(),
            ));
        }

        if self.monitor.price_check_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "price_check_interval_secs must be > 0".to_string(),
            ));
        }

        if self.chain.scan_api_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "scan_api_url cannot be empty".to_string(),
            ));
        }

        if self.chain.price_api_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "price_api_url cannot be empty".to_string(),
            ));
        }

        if self.chat.bot_username.is_empty() && self.chat.bot_chat_id == 0 {
            return Err(ConfigError::ValidationError(
                "either bot_username or bot_chat_id must be set".to_string(),
            ));
        }

        if self.chat.authorized_users.is_empty() {
            return Err(ConfigError::ValidationError(
                "authorized_users cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn base_config() -> String {
        r#"
[trading]
buy_amount = 0.1
take_profit_pct = 50.0
stop_loss_pct = 20.0

[retry]
max_transaction_retries = 3
retry_delay_secs = 10
buy_confirmation_delay_secs = 5

[monitor]
price_check_interval_secs = 60
check_balance_only_after_transaction = true

[chain]
wallet_address = "0x9999999999999999999999999999999999990000"
scan_api_url = "https://api.bscscan.com/api"
scan_api_key = "test-key"
price_api_url = "https://api.dexscreener.com/latest/dex/tokens"

[chat]
bot_username = "trade_agent_bot"
authorized_users = [42]

[logging]
level = "info"
trade_log_file = "transactions.jsonl"
"#
        .to_string()
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = write_config(&base_config());
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.trading.take_profit_pct, 50.0);
        assert_eq!(config.retry.max_transaction_retries, 3);
        assert!(config.monitor.check_balance_only_after_transaction);
        assert_eq!(config.chat.authorized_users, vec![42]);
    }

    #[test]
    fn test_retry_defaults_apply() {
        let contents = base_config().replace(
            "[retry]\nmax_transaction_retries = 3\nretry_delay_secs = 10\nbuy_confirmation_delay_secs = 5\n",
            "[retry]\n",
        );
        let file = write_config(&contents);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.retry.max_transaction_retries, 3);
        assert_eq!(config.retry.retry_delay_secs, 10);
        assert_eq!(config.retry.buy_confirmation_delay_secs, 5);
    }

    #[test]
    fn test_rejects_zero_buy_amount() {
        let contents = base_config().replace("buy_amount = 0.1", "buy_amount = 0.0");
        let file = write_config(&contents);
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rejects_empty_authorized_users() {
        let contents = base_config().replace("authorized_users = [42]", "authorized_users = []");
        let file = write_config(&contents);
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rejects_missing_agent_address() {
        let contents =
            base_config().replace("bot_username = \"trade_agent_bot\"", "bot_username = \"\"");
        let file = write_config(&contents);
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_dispatch_target_prefers_chat_id() {
        let contents = base_config().replace(
            "bot_username = \"trade_agent_bot\"",
            "bot_username = \"trade_agent_bot\"\nbot_chat_id = 777",
        );
        let file = write_config(&contents);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chat.dispatch_target(), MessageTarget::ChatId(777));
    }

    #[test]
    fn test_dispatch_target_falls_back_to_username() {
        let file = write_config(&base_config());
        let config = load_config(file.path()).unwrap();
        assert_eq!(
            config.chat.dispatch_target(),
            MessageTarget::Username("trade_agent_bot".to_string())
        );
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let file = write_config("not valid toml [[[");
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}

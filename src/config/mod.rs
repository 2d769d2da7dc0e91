//! Configuration
//!
//! TOML configuration loading and validation.

pub mod loader;

pub use loader::{
    load_config, ChainSection, ChatSection, Config, ConfigError, LoggingSection, MonitorSection,
    RetrySection, TradingSection,
};

//! Adapters
//!
//! Production implementations of the port traits: Telegram chat
//! transport, the chain explorer client, and the DexScreener price feed.

pub mod chat;
pub mod dexscreener;
pub mod scan;

pub use chat::TelegramChat;
pub use dexscreener::DexScreenerClient;
pub use scan::{ChainContractValidator, ScanClient, ScanError, TxContractResolver};

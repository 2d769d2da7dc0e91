//! Port Traits
//!
//! Boundaries between the engine and the outside world. Adapters provide
//! production implementations; mocks provide test doubles.

pub mod messaging;
pub mod mocks;
pub mod oracles;

pub use messaging::{InboundMessage, MessageTarget, Messaging, MessagingError};
pub use oracles::{
    BalanceCheck, BalanceOracle, ContractValidator, OracleError, PriceOracle, TransactionLookup,
    Verdict,
};

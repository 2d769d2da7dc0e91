//! Domain Types
//!
//! Pure trading state and rules: the pending-transaction ledger, the
//! position book, reply classification, retry policies, and the trade
//! record log. Nothing here performs I/O except the trade log file.

pub mod classifier;
pub mod ledger;
pub mod position;
pub mod retry;
pub mod trade_log;

pub use classifier::{PhraseRule, SignalClassifier, TradeSignal, Vocabulary};
pub use ledger::{
    AttemptId, FailureOutcome, LedgerError, PendingTransaction, SellReason, TradeKind,
    TransactionLedger, STALENESS_WINDOW,
};
pub use position::{ExitDecision, Position, PositionBook, PositionError};
pub use retry::{Backoff, RetryOutcome, RetryPolicy};
pub use trade_log::{TradeLog, TradeLogError, TradeRecord};

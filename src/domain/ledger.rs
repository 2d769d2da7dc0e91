//! Transaction Ledger
//!
//! Tracks in-flight buy/sell instructions issued to the execution agent.
//! Each issuance attempt gets its own record; a retry replaces the prior
//! attempt for the same logical trade instead of duplicating it. Entries
//! with no reply are expired after a fixed staleness window.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Entries older than this with no agent reply are treated as lost signals.
pub const STALENESS_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeKind {
    Buy,
    Sell,
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeKind::Buy => write!(f, "buy"),
            TradeKind::Sell => write!(f, "sell"),
        }
    }
}

/// Why a sell instruction was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SellReason {
    TakeProfit,
    StopLoss,
    Manual,
}

/// Identifier of a single issuance attempt. A retried trade gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

/// An issued instruction awaiting agent confirmation.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub id: AttemptId,
    pub contract: String,
    pub kind: TradeKind,
    /// Chat id of the operator who triggered the trade.
    pub owner: i64,
    pub issued_at: Instant,
    pub retry_count: u32,
    pub max_retries: u32,
    pub reason: Option<SellReason>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("a live {kind} request already exists for {contract}")]
    DuplicateLive { contract: String, kind: TradeKind },
}

/// Result of applying a failure notice to the ledger.
#[derive(Debug)]
pub enum FailureOutcome {
    /// The logical trade still has retry budget. A replacement attempt has
    /// been recorded; the caller must redispatch after the retry delay.
    Retry { attempt: PendingTransaction },
    /// The budget is exhausted. The entry is removed and the logical trade
    /// is abandoned exactly once.
    Abandon { entry: PendingTransaction },
}

/// The set of in-flight instructions.
///
/// Purely synchronous; callers inject `Instant`s so expiry and tie-break
/// rules are testable without sleeping.
#[derive(Debug, Default)]
pub struct TransactionLedger {
    entries: Vec<PendingTransaction>,
    next_id: u64,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> AttemptId {
        let id = AttemptId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Record a new instruction attempt. Rejects if a live entry already
    /// exists for the same (contract, kind) pair.
    pub fn open(
        &mut self,
        contract: &str,
        kind: TradeKind,
        owner: i64,
        reason: Option<SellReason>,
        max_retries: u32,
        now: Instant,
    ) -> Result<AttemptId, LedgerError> {
        if self.is_live(contract, kind) {
            return Err(LedgerError::DuplicateLive {
                contract: contract.to_string(),
                kind,
            });
        }
        let id = self.allocate_id();
        self.entries.push(PendingTransaction {
            id,
            contract: contract.to_string(),
            kind,
            owner,
            issued_at: now,
            retry_count: 0,
            max_retries,
            reason,
        });
        Ok(id)
    }

    /// Remove the live entry matching (contract, kind). If several match
    /// (which open() normally prevents) the newest issuance wins.
    pub fn confirm(&mut self, contract: &str, kind: TradeKind) -> Option<PendingTransaction> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.contract == contract && e.kind == kind)
            .max_by_key(|(_, e)| e.issued_at)
            .map(|(i, _)| i)?;
        Some(self.entries.remove(idx))
    }

    /// Remove the newest live entry of the given kind regardless of
    /// contract. Used when a confirmation carries no extractable address.
    pub fn confirm_most_recent(&mut self, kind: TradeKind) -> Option<PendingTransaction> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind == kind)
            .max_by_key(|(_, e)| e.issued_at)
            .map(|(i, _)| i)?;
        Some(self.entries.remove(idx))
    }

    /// Apply a failure notice. The upstream format carries no correlation
    /// id, so the failure is attributed to the most recently issued live
    /// entry. Known limitation: with a buy and a sell in flight at once
    /// this can blame the wrong trade; the source data does not support a
    /// better attribution, so the heuristic is kept as-is.
    pub fn fail_most_recent(&mut self, now: Instant) -> Option<FailureOutcome> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| e.issued_at)
            .map(|(i, _)| i)?;
        let entry = self.entries.remove(idx);

        if entry.retry_count + 1 < entry.max_retries {
            let id = self.allocate_id();
            let attempt = PendingTransaction {
                id,
                contract: entry.contract.clone(),
                kind: entry.kind,
                owner: entry.owner,
                issued_at: now,
                retry_count: entry.retry_count + 1,
                max_retries: entry.max_retries,
                reason: entry.reason,
            };
            self.entries.push(attempt.clone());
            Some(FailureOutcome::Retry { attempt })
        } else {
            Some(FailureOutcome::Abandon { entry })
        }
    }

    /// Drop entries older than the staleness window. No retry is scheduled
    /// for these; the reply is treated as lost, not failed.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingTransaction> {
        let (stale, live): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| now.duration_since(e.issued_at) > STALENESS_WINDOW);
        self.entries = live;
        stale
    }

    pub fn is_live(&self, contract: &str, kind: TradeKind) -> bool {
        self.entries
            .iter()
            .any(|e| e.contract == contract && e.kind == kind)
    }

    pub fn live(&self) -> &[PendingTransaction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

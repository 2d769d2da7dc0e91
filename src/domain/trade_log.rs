//! Trade Record Log
//!
//! Append-only JSON-lines file of executed trades. Written after a buy
//! confirmation and at sell dispatch; nothing updates or deletes rows.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ledger::TradeKind;

#[derive(Debug, Error)]
pub enum TradeLogError {
    #[error("trade log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("trade log record error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One executed trade. `amount` stays a string: buys carry the configured
/// native amount, sells carry a percentage like "100%".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub contract: String,
    pub action: TradeKind,
    pub price: f64,
    pub amount: String,
    pub owner: i64,
}

#[derive(Debug, Clone)]
pub struct TradeLog {
    path: PathBuf,
}

impl TradeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &TradeRecord) -> Result<(), TradeLogError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<TradeRecord>, TradeLogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CA: &str = "0x1111111111111111111111111111111111112222";

    fn record(action: TradeKind, price: f64, amount: &str) -> TradeRecord {
        TradeRecord {
            timestamp: Utc::now(),
            contract: CA.to_string(),
            action,
            price,
            amount: amount.to_string(),
            owner: 42,
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let log = TradeLog::new(dir.path().join("trades.jsonl"));

        log.append(&record(TradeKind::Buy, 10.0, "0.1")).unwrap();
        log.append(&record(TradeKind::Sell, 16.0, "100%")).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0].action, TradeKind::Buy));
        assert_eq!(records[1].amount, "100%");
        assert_eq!(records[1].price, 16.0);
    }

    #[test]
    fn test_creates_missing_parent_dir() {
        let dir = TempDir::new().unwrap();
        let log = TradeLog::new(dir.path().join("logs/deep/trades.jsonl"));
        log.append(&record(TradeKind::Buy, 1.0, "0.1")).unwrap();
        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = TradeLog::new(dir.path().join("absent.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_append_never_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.jsonl");
        for i in 0..5 {
            // Fresh handle each time, as the engine does per trade.
            TradeLog::new(&path)
                .append(&record(TradeKind::Buy, i as f64 + 1.0, "0.1"))
                .unwrap();
        }
        assert_eq!(TradeLog::new(&path).read_all().unwrap().len(), 5);
    }
}

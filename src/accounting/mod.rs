pub mod dispatcher;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;

use crate::config::AccountingConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::payments::Payment;

pub use dispatcher::{AccountingDispatcher, DispatchOutcome};

/// failures reported by an accounting sink; never surfaced as ledger errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("accounting session expired")]
    AuthExpired,

    #[error("journal entry rejected: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("accounting call timed out")]
    Timeout,
}

/// one side of a journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_code: String,
    pub debit: Money,
    pub credit: Money,
}

/// double-entry journal entry posted to the external ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub date: NaiveDate,
    pub description: String,
    pub reference: String,
    pub lines: Vec<JournalLine>,
}

impl JournalEntry {
    /// two-line entry moving `amount` from `credit_account` to `debit_account`
    pub fn balanced(
        date: NaiveDate,
        description: impl Into<String>,
        reference: impl Into<String>,
        debit_account: &str,
        credit_account: &str,
        amount: Money,
    ) -> Self {
        Self {
            date,
            description: description.into(),
            reference: reference.into(),
            lines: vec![
                JournalLine {
                    account_code: debit_account.to_string(),
                    debit: amount,
                    credit: Money::ZERO,
                },
                JournalLine {
                    account_code: credit_account.to_string(),
                    debit: Money::ZERO,
                    credit: amount,
                },
            ],
        }
    }

    /// cash in, receivable down
    pub fn for_payment(payment: &Payment, config: &AccountingConfig) -> Self {
        Self::balanced(
            payment.applied_date,
            format!("{:?} payment on credit {}", payment.source, payment.credit_id),
            payment.id.to_string(),
            &config.cash_account,
            &config.receivable_account,
            payment.collected(),
        )
    }

    /// mirror of the payment entry
    pub fn for_reversal(payment: &Payment, config: &AccountingConfig, date: NaiveDate) -> Self {
        Self::balanced(
            date,
            format!("reversal of payment {} on credit {}", payment.id, payment.credit_id),
            format!("REV-{}", payment.id),
            &config.receivable_account,
            &config.cash_account,
            payment.collected(),
        )
    }

    pub fn total_debit(&self) -> Money {
        self.lines.iter().map(|l| l.debit).sum()
    }

    pub fn total_credit(&self) -> Money {
        self.lines.iter().map(|l| l.credit).sum()
    }

    /// debits must equal credits and no line may be negative
    pub fn validate(&self) -> Result<()> {
        let debit = self.total_debit();
        let credit = self.total_credit();
        let negative = self
            .lines
            .iter()
            .any(|l| l.debit.is_negative() || l.credit.is_negative());

        if debit != credit || negative || self.lines.is_empty() {
            return Err(LedgerError::PartiteDoubleMismatch { debit, credit });
        }
        Ok(())
    }
}

/// external journal sink
#[async_trait]
pub trait AccountingSink: Send + Sync {
    /// post one balanced entry
    async fn post(&self, entry: &JournalEntry) -> std::result::Result<(), SinkError>;
}

/// sink used when no accounting system is configured
pub struct NoopSink;

#[async_trait]
impl AccountingSink for NoopSink {
    async fn post(&self, _entry: &JournalEntry) -> std::result::Result<(), SinkError> {
        Ok(())
    }
}

/// keeps posted entries in memory
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AccountingSink for MemorySink {
    async fn post(&self, entry: &JournalEntry) -> std::result::Result<(), SinkError> {
        self.entries
            .lock()
            .map_err(|_| SinkError::Transport("memory sink poisoned".to_string()))?
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 31).unwrap()
    }

    #[test]
    fn test_balanced_entry_validates() {
        let entry = JournalEntry::balanced(date(), "cuota", "ref-1", "1-01-01-001", "1-01-03-001", Money::from_major(250));

        assert!(entry.validate().is_ok());
        assert_eq!(entry.lines.len(), 2);
        assert_eq!(entry.total_debit(), Money::from_major(250));
        assert_eq!(entry.lines[0].account_code, "1-01-01-001");
    }

    #[test]
    fn test_unbalanced_entry_rejected() {
        let mut entry = JournalEntry::balanced(date(), "cuota", "ref-1", "A", "B", Money::from_major(250));
        entry.lines[1].credit = Money::from_major(249);

        assert_eq!(
            entry.validate().unwrap_err(),
            LedgerError::PartiteDoubleMismatch {
                debit: Money::from_major(250),
                credit: Money::from_major(249),
            }
        );
    }

    #[tokio::test]
    async fn test_memory_sink_records() {
        let sink = MemorySink::new();
        let entry = JournalEntry::balanced(date(), "cuota", "ref-1", "A", "B", Money::from_major(1));

        sink.post(&entry).await.unwrap();
        NoopSink.post(&entry).await.unwrap();

        assert_eq!(sink.entries(), vec![entry]);
    }
}

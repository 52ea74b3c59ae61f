use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::decimal::Money;
use crate::errors::LedgerError;
use crate::types::{BorrowerId, CreditId, PaymentId, SurplusId};

/// one row of a payroll deduction file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub borrower: BorrowerId,
    pub amount: Money,
}

impl BatchEntry {
    pub fn new(borrower: impl Into<BorrowerId>, amount: Money) -> Self {
        Self {
            borrower: borrower.into(),
            amount,
        }
    }
}

/// a batch row that produced payments and/or a surplus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedEntry {
    /// zero-based position in the file
    pub line: usize,
    pub borrower: BorrowerId,
    pub amount: Money,
    pub payments: Vec<PaymentId>,
    pub applied: Money,
    pub surplus: Option<SurplusId>,
    pub surplus_amount: Money,
    /// credits of the borrower the row could not be applied to
    #[serde(skip)]
    pub failures: Vec<CreditFailure>,
}

impl AppliedEntry {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// a credit skipped inside a row that still applied money elsewhere
#[derive(Debug, Clone, PartialEq)]
pub struct CreditFailure {
    pub credit_id: CreditId,
    pub error: LedgerError,
}

/// a batch row that could not be applied
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedEntry {
    pub line: usize,
    pub borrower: BorrowerId,
    pub amount: Money,
    pub error: LedgerError,
}

/// per-row outcome of a payroll batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub reference: String,
    pub applied: Vec<AppliedEntry>,
    pub rejected: Vec<RejectedEntry>,
}

impl BatchResult {
    pub fn success_count(&self) -> usize {
        self.applied.len()
    }

    pub fn failure_count(&self) -> usize {
        self.rejected.len()
    }

    pub fn total_applied(&self) -> Money {
        self.applied.iter().map(|a| a.applied).sum()
    }

    pub fn total_surplus(&self) -> Money {
        self.applied.iter().map(|a| a.surplus_amount).sum()
    }

    /// applied rows where at least one credit failed
    pub fn partial_failures(&self) -> impl Iterator<Item = &AppliedEntry> {
        self.applied.iter().filter(|a| a.is_partial())
    }
}

/// entries grouped by borrower, keeping file order inside each group
pub fn group_by_borrower(entries: &[BatchEntry]) -> Vec<(BorrowerId, Vec<(usize, BatchEntry)>)> {
    let mut groups: Vec<(BorrowerId, Vec<(usize, BatchEntry)>)> = Vec::new();
    let mut index: HashMap<BorrowerId, usize> = HashMap::new();
    for (line, entry) in entries.iter().enumerate() {
        match index.get(&entry.borrower) {
            Some(&position) => groups[position].1.push((line, entry.clone())),
            None => {
                index.insert(entry.borrower.clone(), groups.len());
                groups.push((entry.borrower.clone(), vec![(line, entry.clone())]));
            }
        }
    }
    groups
}

/// last calendar day of the month containing `date`
pub fn period_end(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouping_keeps_file_order() {
        let entries = vec![
            BatchEntry::new("1-1111-1111", Money::from_major(10)),
            BatchEntry::new("2-2222-2222", Money::from_major(20)),
            BatchEntry::new(" 1-1111-1111 ", Money::from_major(30)),
        ];

        let groups = group_by_borrower(&entries);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, BorrowerId::new("1-1111-1111"));
        let lines: Vec<usize> = groups[0].1.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, vec![0, 2]);
    }

    #[test]
    fn test_grouping_large_file() {
        let entries: Vec<BatchEntry> = (0..20_000)
            .map(|i| BatchEntry::new(format!("1-{:04}-0000", i % 5_000), Money::from_major(1)))
            .collect();

        let groups = group_by_borrower(&entries);
        assert_eq!(groups.len(), 5_000);
        assert!(groups.iter().all(|(_, rows)| rows.len() == 4));
        assert_eq!(groups[7].0, BorrowerId::new("1-0007-0000"));
        let lines: Vec<usize> = groups[7].1.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, vec![7, 5_007, 10_007, 15_007]);
    }

    #[test]
    fn test_period_end() {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(period_end(date(2024, 2, 10)), date(2024, 2, 29));
        assert_eq!(period_end(date(2024, 12, 31)), date(2024, 12, 31));
        assert_eq!(period_end(date(2025, 4, 1)), date(2025, 4, 30));
    }
}

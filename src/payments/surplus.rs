use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{BorrowerId, CreditId, PaymentId, SurplusId};

/// one draw against a surplus balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurplusConsumption {
    pub payment_id: PaymentId,
    pub amount: Money,
    pub consumed_at: DateTime<Utc>,
}

/// unallocated money held for a borrower until it is assigned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurplusBalance {
    pub id: SurplusId,
    pub borrower: BorrowerId,
    /// None when the money is not tied to a specific credit
    pub credit_id: Option<CreditId>,
    pub amount: Money,
    pub original_amount: Money,
    pub source_reference: Option<String>,
    /// payment whose residual created this balance
    pub origin_payment: Option<PaymentId>,
    pub created_at: DateTime<Utc>,
    pub consumptions: Vec<SurplusConsumption>,
}

impl SurplusBalance {
    pub fn new(
        borrower: BorrowerId,
        credit_id: Option<CreditId>,
        amount: Money,
        source_reference: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            borrower,
            credit_id,
            amount,
            original_amount: amount,
            source_reference,
            origin_payment: None,
            created_at,
            consumptions: Vec::new(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn has_consumptions(&self) -> bool {
        !self.consumptions.is_empty()
    }

    /// draw up to `amount`; returns what was actually taken
    pub fn consume(&mut self, amount: Money, payment_id: PaymentId, at: DateTime<Utc>) -> Money {
        let taken = amount.min(self.amount);
        if taken.is_positive() {
            self.amount -= taken;
            self.consumptions.push(SurplusConsumption {
                payment_id,
                amount: taken,
                consumed_at: at,
            });
        }
        taken
    }

    /// undo the draw made by a payment
    pub fn restore(&mut self, payment_id: PaymentId) -> Result<Money> {
        let index = self
            .consumptions
            .iter()
            .position(|c| c.payment_id == payment_id)
            .ok_or_else(|| {
                LedgerError::invariant(format!(
                    "surplus {} has no consumption by payment {}",
                    self.id, payment_id
                ))
            })?;
        let consumption = self.consumptions.remove(index);
        self.amount += consumption.amount;
        Ok(consumption.amount)
    }
}

/// every surplus balance the engine holds
#[derive(Debug, Default)]
pub struct SurplusLedger {
    balances: HashMap<SurplusId, SurplusBalance>,
}

impl SurplusLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, balance: SurplusBalance) -> SurplusId {
        let id = balance.id;
        self.balances.insert(id, balance);
        id
    }

    pub fn get(&self, id: SurplusId) -> Result<&SurplusBalance> {
        self.balances.get(&id).ok_or(LedgerError::SurplusNotFound { id })
    }

    pub fn get_mut(&mut self, id: SurplusId) -> Result<&mut SurplusBalance> {
        self.balances.get_mut(&id).ok_or(LedgerError::SurplusNotFound { id })
    }

    /// drop a balance created by a payment being reversed
    pub fn remove_unconsumed(&mut self, id: SurplusId) -> Result<SurplusBalance> {
        let balance = self.get(id)?;
        if balance.has_consumptions() {
            return Err(LedgerError::SurplusAlreadyConsumed { surplus_id: id });
        }
        self.balances.remove(&id).ok_or(LedgerError::SurplusNotFound { id })
    }

    /// balances of a borrower, oldest first
    pub fn for_borrower(&self, borrower: &BorrowerId) -> Vec<SurplusBalance> {
        let mut balances: Vec<SurplusBalance> = self
            .balances
            .values()
            .filter(|b| &b.borrower == borrower)
            .cloned()
            .collect();
        balances.sort_by_key(|b| b.created_at);
        balances
    }

    pub fn total_for(&self, borrower: &BorrowerId) -> Money {
        self.balances
            .values()
            .filter(|b| &b.borrower == borrower)
            .map(|b| b.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(amount: i64) -> SurplusBalance {
        SurplusBalance::new(
            BorrowerId::new("1-0101-0202"),
            None,
            Money::from_major(amount),
            Some("PLANILLA-2024-03".to_string()),
            Utc::now(),
        )
    }

    #[test]
    fn test_partial_consumption_and_restore() {
        let mut surplus = balance(100);
        let payment = Uuid::new_v4();

        let taken = surplus.consume(Money::from_major(30), payment, Utc::now());
        assert_eq!(taken, Money::from_major(30));
        assert_eq!(surplus.amount, Money::from_major(70));
        assert_eq!(surplus.original_amount, Money::from_major(100));

        assert_eq!(surplus.restore(payment).unwrap(), Money::from_major(30));
        assert_eq!(surplus.amount, Money::from_major(100));
        assert!(!surplus.has_consumptions());
    }

    #[test]
    fn test_consume_caps_at_balance() {
        let mut surplus = balance(20);
        let taken = surplus.consume(Money::from_major(50), Uuid::new_v4(), Utc::now());
        assert_eq!(taken, Money::from_major(20));
        assert!(surplus.is_exhausted());
    }

    #[test]
    fn test_consumed_balance_cannot_be_removed() {
        let mut ledger = SurplusLedger::new();
        let mut surplus = balance(50);
        surplus.consume(Money::from_major(10), Uuid::new_v4(), Utc::now());
        let id = ledger.insert(surplus);

        assert_eq!(
            ledger.remove_unconsumed(id).unwrap_err(),
            LedgerError::SurplusAlreadyConsumed { surplus_id: id }
        );
        assert!(ledger.get(id).is_ok());
    }

    #[test]
    fn test_borrower_totals() {
        let mut ledger = SurplusLedger::new();
        ledger.insert(balance(10));
        ledger.insert(balance(15));
        let borrower = BorrowerId::new("1-0101-0202");

        assert_eq!(ledger.for_borrower(&borrower).len(), 2);
        assert_eq!(ledger.total_for(&borrower), Money::from_major(25));
        assert!(ledger.for_borrower(&BorrowerId::new("9-9999-9999")).is_empty());
    }
}

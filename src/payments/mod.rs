pub mod amortization;
pub mod batch;
pub mod payoff;
pub mod reversal;
pub mod surplus;
pub mod waterfall;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MoratoryConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::interest::{AccrualReport, MoratoryEngine};
use crate::ledger::{Credit, Installment};
use crate::types::{
    BorrowerId, ComponentAmounts, CreditId, CreditStatus, InstallmentStatus, PaymentId, PaymentSource, SurplusId,
};

pub use amortization::{add_months, fixed_payment, AmortizationSchedule, ScheduledInstallment};
pub use batch::{AppliedEntry, BatchEntry, BatchResult, CreditFailure, RejectedEntry};
pub use payoff::{EarlyPayoffCalculator, PayoffBreakdown};
pub use reversal::ReversalEngine;
pub use surplus::{SurplusBalance, SurplusConsumption, SurplusLedger};
pub use waterfall::{Allocation, AllocationScope, InstallmentAllocation, PaymentWaterfall};

/// payment request against one credit
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub credit_id: CreditId,
    pub amount: Money,
    pub payment_date: NaiveDate,
    pub source: PaymentSource,
    pub scope: AllocationScope,
}

impl PaymentRequest {
    pub fn new(credit_id: CreditId, amount: Money, payment_date: NaiveDate, source: PaymentSource) -> Self {
        Self {
            credit_id,
            amount,
            payment_date,
            source,
            scope: AllocationScope::AllPayable,
        }
    }

    pub fn with_scope(mut self, scope: AllocationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(LedgerError::InvalidPaymentAmount { amount: self.amount });
        }
        Ok(())
    }
}

/// installment terms rewritten by an early payoff, kept for reversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentAdjustment {
    pub installment_number: u32,
    pub interest_before: Money,
    pub insurance_before: Money,
    pub scheduled_amount_before: Money,
    pub interest_after: Money,
    pub insurance_after: Money,
}

/// lateness and status of an installment before a payment touched it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentState {
    pub installment_number: u32,
    pub status: InstallmentStatus,
    pub days_late: Option<u32>,
    pub delinquent_since: Option<NaiveDate>,
    pub moratory_interest: Money,
}

impl InstallmentState {
    pub fn capture(installment: &Installment) -> Self {
        Self {
            installment_number: installment.number,
            status: installment.status,
            days_late: installment.days_late,
            delinquent_since: installment.delinquent_since,
            moratory_interest: installment.moratory_interest,
        }
    }

    /// states of every installment that differs between the two versions
    pub fn changed(before: &Credit, after: &Credit) -> Vec<Self> {
        before
            .installments
            .iter()
            .zip(after.installments.iter())
            .filter(|(old, new)| old != new)
            .map(|(old, _)| Self::capture(old))
            .collect()
    }
}

/// surplus created from a payment's residual
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurplusLink {
    pub surplus_id: SurplusId,
    pub amount: Money,
}

/// immutable payment record; the detail lines are the reversal key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    /// position in the engine's payment journal, starting at 1
    pub sequence: u64,
    pub credit_id: CreditId,
    pub borrower: BorrowerId,
    pub source: PaymentSource,
    pub amount: Money,
    pub applied_date: NaiveDate,
    pub recorded_at: DateTime<Utc>,
    pub details: Vec<InstallmentAllocation>,
    #[serde(default)]
    pub adjustments: Vec<InstallmentAdjustment>,
    /// pre-payment lateness of every installment the payment changed
    #[serde(default)]
    pub prior_states: Vec<InstallmentState>,
    /// prepayment penalty collected on cancellation
    #[serde(default)]
    pub penalty: Money,
    pub surplus: Option<SurplusLink>,
    /// set when the money came out of a surplus balance
    pub funded_by_surplus: Option<SurplusId>,
    pub credit_status_before: CreditStatus,
    pub credit_status_after: CreditStatus,
    pub batch_reference: Option<String>,
    pub reversed_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn is_reversed(&self) -> bool {
        self.reversed_at.is_some()
    }

    pub fn applied_total(&self) -> Money {
        self.details.iter().map(|d| d.applied.total()).sum()
    }

    pub fn surplus_amount(&self) -> Money {
        self.surplus.map_or(Money::ZERO, |s| s.amount)
    }

    /// applied amounts summed per component
    pub fn breakdown(&self) -> ComponentAmounts {
        let mut total = ComponentAmounts::default();
        for detail in &self.details {
            total.add(&detail.applied);
        }
        total
    }

    /// amount recognized against the credit: applied movements plus penalty
    pub fn collected(&self) -> Money {
        self.applied_total() + self.penalty
    }

    /// every unit of the payment is either applied, penalty or surplus
    pub fn check_conservation(&self) -> Result<()> {
        let accounted = self.collected() + self.surplus_amount();
        if accounted != self.amount {
            return Err(LedgerError::invariant(format!(
                "payment {} of {} accounts for {}",
                self.id, self.amount, accounted
            )));
        }
        Ok(())
    }
}

/// a credit copy with a payment applied, not yet committed
#[derive(Debug, Clone)]
pub struct StagedPayment {
    pub credit: Credit,
    pub accrual: AccrualReport,
    pub allocation: Allocation,
    pub credit_status_before: CreditStatus,
}

/// stages payments: accrue, allocate, verify, all on a copy of the credit
pub struct PaymentProcessor {
    moratory: MoratoryEngine,
    waterfall: PaymentWaterfall,
}

impl PaymentProcessor {
    pub fn new(config: &MoratoryConfig) -> Self {
        Self {
            moratory: MoratoryEngine::new(config.clone()),
            waterfall: PaymentWaterfall::standard(),
        }
    }

    pub fn moratory(&self) -> &MoratoryEngine {
        &self.moratory
    }

    pub fn waterfall(&self) -> &PaymentWaterfall {
        &self.waterfall
    }

    /// apply the request to a copy; the original credit is left untouched on error
    pub fn stage(&self, credit: &Credit, request: &PaymentRequest) -> Result<StagedPayment> {
        request.validate()?;
        credit.ensure_active()?;

        let mut staged = credit.clone();
        let accrual = self.moratory.accrue(&mut staged, request.payment_date);
        let allocation = self
            .waterfall
            .allocate(&mut staged.installments, request.amount, request.scope);

        staged.recompute_balance();
        staged.check_invariants()?;

        Ok(StagedPayment {
            credit: staged,
            accrual,
            allocation,
            credit_status_before: credit.status,
        })
    }
}

use crate::errors::{LedgerError, Result};
use crate::ledger::Credit;
use crate::payments::Payment;
use crate::types::CreditStatus;

/// undoes applied payments, the exact inverse of allocation
#[derive(Debug, Default)]
pub struct ReversalEngine;

impl ReversalEngine {
    pub fn new() -> Self {
        Self
    }

    /// a credit that left Formalized can only be reopened by the payment that closed it
    pub fn ensure_reversible(&self, credit: &Credit, payment: &Payment) -> Result<()> {
        if payment.is_reversed() {
            return Err(LedgerError::AlreadyReversed { payment_id: payment.id });
        }
        if payment.credit_id != credit.id {
            return Err(LedgerError::invariant(format!(
                "payment {} does not belong to credit {}",
                payment.id, credit.id
            )));
        }

        let closed_by_this_payment = payment.credit_status_before == CreditStatus::Formalized
            && payment.credit_status_after == credit.status;
        if !credit.is_active() && !closed_by_this_payment {
            return Err(LedgerError::CreditNotActive { status: credit.status });
        }
        Ok(())
    }

    /// subtract the payment's movements from a copy of the credit
    pub fn stage(&self, credit: &Credit, payment: &Payment) -> Result<Credit> {
        self.ensure_reversible(credit, payment)?;

        let mut staged = credit.clone();

        for detail in &payment.details {
            let installment = staged.installment_mut(detail.installment_number)?;
            installment.paid.subtract(&detail.applied);
            if installment.paid.has_negative() {
                return Err(LedgerError::invariant(format!(
                    "reversing payment {} leaves installment {} with negative movements",
                    payment.id, installment.number
                )));
            }
        }

        for adjustment in &payment.adjustments {
            let installment = staged.installment_mut(adjustment.installment_number)?;
            installment.interest = adjustment.interest_before;
            installment.insurance = adjustment.insurance_before;
            installment.scheduled_amount = adjustment.scheduled_amount_before;
        }

        for prior in &payment.prior_states {
            let installment = staged.installment_mut(prior.installment_number)?;
            installment.days_late = prior.days_late;
            installment.delinquent_since = prior.delinquent_since;
            // moratory collected by later payments stays owed
            installment.moratory_interest = prior.moratory_interest.max(installment.paid.moratory_interest);
            installment.status = installment.status_after_reversal(prior.status);
        }

        staged.status = payment.credit_status_before;
        staged.recompute_balance();
        staged.check_invariants()?;

        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CreditTerms, MoratoryConfig};
    use crate::decimal::{Money, Rate};
    use crate::ledger::Installment;
    use crate::payments::{AmortizationSchedule, InstallmentState, PaymentProcessor, PaymentRequest};
    use crate::types::{BorrowerId, InstallmentStatus, PaymentSource};
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn credit() -> Credit {
        let terms = CreditTerms::new(Money::from_major(6_000), Rate::from_percent(dec!(30)), 6, date(2024, 1, 5))
            .with_insurance(Money::from_major(12));
        let schedule = AmortizationSchedule::generate(&terms).unwrap();
        let mut credit = Credit::new(BorrowerId::new("2-0333-0444"), terms, Utc::now());
        credit.installments = schedule.installments.iter().map(Installment::from_scheduled).collect();
        credit.status = CreditStatus::Formalized;
        credit.recompute_balance();
        credit
    }

    fn record(credit: &Credit, amount: Money, when: NaiveDate) -> (Credit, Payment) {
        let processor = PaymentProcessor::new(&MoratoryConfig::default());
        let request = PaymentRequest::new(credit.id, amount, when, PaymentSource::ManualWindow);
        let staged = processor.stage(credit, &request).unwrap();
        let payment = Payment {
            id: Uuid::new_v4(),
            sequence: 1,
            credit_id: credit.id,
            borrower: credit.borrower.clone(),
            source: request.source,
            amount,
            applied_date: when,
            recorded_at: Utc::now(),
            details: staged.allocation.lines.clone(),
            adjustments: Vec::new(),
            prior_states: InstallmentState::changed(credit, &staged.credit),
            penalty: Money::ZERO,
            surplus: None,
            funded_by_surplus: None,
            credit_status_before: credit.status,
            credit_status_after: staged.credit.status,
            batch_reference: None,
            reversed_at: None,
        };
        (staged.credit, payment)
    }

    #[test]
    fn test_reversal_restores_ledger() {
        let original = credit();

        // the payment date is late: staging also accrues moratory on two installments
        let (paid, payment) = record(&original, Money::from_major(1_500), date(2024, 3, 20));
        assert_eq!(paid.installment(1).unwrap().status, InstallmentStatus::PaidLate);
        assert_eq!(paid.installment(2).unwrap().status, InstallmentStatus::Partial);
        assert_eq!(payment.prior_states.len(), 2);

        let reversed = ReversalEngine::new().stage(&paid, &payment).unwrap();
        assert_eq!(reversed, original);
    }

    #[test]
    fn test_reversing_older_payment_keeps_newer_movements() {
        let original = credit();
        let (first_paid, first) = record(&original, Money::from_major(300), date(2024, 1, 20));
        let (second_paid, _second) = record(&first_paid, Money::from_major(200), date(2024, 1, 25));

        let reversed = ReversalEngine::new().stage(&second_paid, &first).unwrap();
        let installment = reversed.installment(1).unwrap();

        assert_eq!(installment.paid.total(), Money::from_major(200));
        assert_eq!(installment.status, InstallmentStatus::Partial);
        assert!(reversed.check_invariants().is_ok());
    }

    #[test]
    fn test_double_reversal_rejected() {
        let original = credit();
        let (paid, mut payment) = record(&original, Money::from_major(100), date(2024, 1, 20));
        payment.reversed_at = Some(Utc::now());

        assert_eq!(
            ReversalEngine::new().stage(&paid, &payment).unwrap_err(),
            LedgerError::AlreadyReversed { payment_id: payment.id }
        );
    }

    #[test]
    fn test_refinanced_credit_rejects_reversal() {
        let original = credit();
        let (mut paid, payment) = record(&original, Money::from_major(100), date(2024, 1, 20));
        paid.status = CreditStatus::Refinanced;

        assert_eq!(
            ReversalEngine::new().stage(&paid, &payment).unwrap_err(),
            LedgerError::CreditNotActive {
                status: CreditStatus::Refinanced
            }
        );
    }
}

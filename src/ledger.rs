use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CreditTerms;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::payments::ScheduledInstallment;
use crate::types::{BorrowerId, Component, ComponentAmounts, CreditId, CreditStatus, InstallmentStatus};

/// one due period of a credit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub number: u32,
    pub due_date: NaiveDate,
    pub scheduled_amount: Money,
    /// contractual interest of the period
    pub interest: Money,
    pub insurance: Money,
    pub principal: Money,
    /// moratory interest owed as of the last evaluation
    pub moratory_interest: Money,
    pub opening_balance: Money,
    pub closing_balance: Money,
    pub status: InstallmentStatus,
    pub days_late: Option<u32>,
    /// evaluation date on which the installment first went past the grace period
    #[serde(default)]
    pub delinquent_since: Option<NaiveDate>,
    /// movements applied so far, accumulated across payments
    pub paid: ComponentAmounts,
}

impl Installment {
    pub fn from_scheduled(scheduled: &ScheduledInstallment) -> Self {
        Self {
            number: scheduled.number,
            due_date: scheduled.due_date,
            scheduled_amount: scheduled.payment_amount,
            interest: scheduled.interest,
            insurance: scheduled.insurance,
            principal: scheduled.principal,
            moratory_interest: Money::ZERO,
            opening_balance: scheduled.opening_balance,
            closing_balance: scheduled.closing_balance,
            status: InstallmentStatus::Pending,
            days_late: None,
            delinquent_since: None,
            paid: ComponentAmounts::default(),
        }
    }

    pub fn is_overdue(&self) -> bool {
        self.days_late.map_or(false, |days| days > 0)
    }

    /// amounts owed per component; unpaid interest counts as arrears once overdue
    pub fn due(&self) -> ComponentAmounts {
        let unpaid_interest = self.interest.saturating_sub(self.paid.interest());
        let (arrears_interest, current_interest) = if self.is_overdue() {
            (self.paid.arrears_interest + unpaid_interest, self.paid.current_interest)
        } else {
            (self.paid.arrears_interest, self.paid.current_interest + unpaid_interest)
        };

        ComponentAmounts {
            moratory_interest: self.moratory_interest,
            arrears_interest,
            current_interest,
            insurance: self.insurance,
            principal: self.principal,
        }
    }

    /// what is still owed per component
    pub fn outstanding(&self) -> ComponentAmounts {
        let due = self.due();
        let mut outstanding = ComponentAmounts::default();
        for component in Component::WATERFALL {
            *outstanding.get_mut(component) = due.get(component).saturating_sub(self.paid.get(component));
        }
        outstanding
    }

    pub fn total_due(&self) -> Money {
        self.due().total()
    }

    pub fn remaining_principal(&self) -> Money {
        self.principal.saturating_sub(self.paid.principal)
    }

    fn settled_status(&self) -> InstallmentStatus {
        if self.is_overdue() {
            InstallmentStatus::PaidLate
        } else {
            InstallmentStatus::Paid
        }
    }

    /// status once a payment has reached the installment
    pub fn status_after_payment(&self) -> InstallmentStatus {
        if self.outstanding().total().is_zero() {
            self.settled_status()
        } else if self.paid.total().is_positive() {
            InstallmentStatus::Partial
        } else {
            self.status
        }
    }

    /// status after a lateness evaluation; Mora is entered only on the first crossing of the grace period
    pub fn status_after_accrual(&self, grace_period_days: u32) -> InstallmentStatus {
        if self.outstanding().total().is_zero() {
            return self.settled_status();
        }

        match self.days_late {
            Some(days) if days > grace_period_days && self.delinquent_since.is_none() => InstallmentStatus::Mora,
            _ => self.status,
        }
    }

    /// status after a reversal brought back an earlier state
    pub fn status_after_reversal(&self, prior: InstallmentStatus) -> InstallmentStatus {
        if self.outstanding().total().is_zero() {
            self.settled_status()
        } else if prior == InstallmentStatus::Pending && self.paid.total().is_positive() {
            // other live payments still reach this installment
            InstallmentStatus::Partial
        } else {
            prior
        }
    }
}

/// a credit and its installment ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credit {
    pub id: CreditId,
    pub borrower: BorrowerId,
    pub terms: CreditTerms,
    pub status: CreditStatus,
    pub fixed_installment: Money,
    pub balance: Money,
    pub installments: Vec<Installment>,
    pub registered_at: DateTime<Utc>,
    pub formalized_at: Option<DateTime<Utc>>,
    pub refinanced_into: Option<CreditId>,
    pub refinanced_from: Option<CreditId>,
}

impl Credit {
    /// register a credit awaiting formalization
    pub fn new(borrower: BorrowerId, terms: CreditTerms, registered_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            borrower,
            terms,
            status: CreditStatus::Pending,
            fixed_installment: Money::ZERO,
            balance: Money::ZERO,
            installments: Vec::new(),
            registered_at,
            formalized_at: None,
            refinanced_into: None,
            refinanced_from: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CreditStatus::Formalized
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(LedgerError::CreditNotActive { status: self.status })
        }
    }

    pub fn installment(&self, number: u32) -> Result<&Installment> {
        self.installments
            .iter()
            .find(|i| i.number == number)
            .ok_or(LedgerError::InstallmentNotFound {
                credit_id: self.id,
                number,
            })
    }

    pub fn installment_mut(&mut self, number: u32) -> Result<&mut Installment> {
        let credit_id = self.id;
        self.installments
            .iter_mut()
            .find(|i| i.number == number)
            .ok_or(LedgerError::InstallmentNotFound { credit_id, number })
    }

    pub fn remaining_principal(&self) -> Money {
        self.installments
            .iter()
            .filter(|i| !i.status.is_settled())
            .map(|i| i.remaining_principal())
            .sum()
    }

    /// everything still owed on the ledger, moratory included
    pub fn total_outstanding(&self) -> Money {
        self.installments.iter().map(|i| i.outstanding().total()).sum()
    }

    /// principal applied across all movements
    pub fn principal_paid(&self) -> Money {
        self.installments.iter().map(|i| i.paid.principal).sum()
    }

    pub fn recompute_balance(&mut self) {
        self.balance = self.remaining_principal();
    }

    /// verify ledger invariants; the allocator refuses to commit a state that fails here
    pub fn check_invariants(&self) -> Result<()> {
        if self.balance != self.remaining_principal() {
            return Err(LedgerError::invariant(format!(
                "credit balance {} differs from remaining principal {}",
                self.balance,
                self.remaining_principal()
            )));
        }

        if self.installments.is_empty() {
            return Ok(());
        }

        let scheduled_principal: Money = self.installments.iter().map(|i| i.principal).sum();
        if scheduled_principal != self.terms.principal {
            return Err(LedgerError::invariant(format!(
                "scheduled principal {} differs from credit principal {}",
                scheduled_principal, self.terms.principal
            )));
        }

        for pair in self.installments.windows(2) {
            if pair[1].opening_balance != pair[0].closing_balance {
                return Err(LedgerError::invariant(format!(
                    "installment {} opens at {} but installment {} closed at {}",
                    pair[1].number, pair[1].opening_balance, pair[0].number, pair[0].closing_balance
                )));
            }
        }

        for installment in &self.installments {
            if installment.closing_balance != installment.opening_balance - installment.principal {
                return Err(LedgerError::invariant(format!(
                    "installment {} closing balance does not follow its principal",
                    installment.number
                )));
            }
            if installment.paid.has_negative() {
                return Err(LedgerError::invariant(format!(
                    "installment {} has a negative movement",
                    installment.number
                )));
            }
            let due = installment.due();
            for component in Component::WATERFALL {
                if installment.paid.get(component) > due.get(component) {
                    return Err(LedgerError::invariant(format!(
                        "installment {} overapplied {:?}",
                        installment.number, component
                    )));
                }
            }
            if installment.paid.total() > installment.scheduled_amount + installment.moratory_interest {
                return Err(LedgerError::invariant(format!(
                    "installment {} paid more than scheduled plus moratory",
                    installment.number
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::payments::AmortizationSchedule;
    use rust_decimal_macros::dec;

    fn formalized_credit() -> Credit {
        let start = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let terms = CreditTerms::new(Money::from_major(12_000), Rate::from_percent(dec!(12)), 12, start);
        let schedule = AmortizationSchedule::generate(&terms).unwrap();
        let mut credit = Credit::new(BorrowerId::new("1-0001-0001"), terms, Utc::now());
        credit.installments = schedule.installments.iter().map(Installment::from_scheduled).collect();
        credit.fixed_installment = schedule.fixed_payment;
        credit.status = CreditStatus::Formalized;
        credit.recompute_balance();
        credit
    }

    #[test]
    fn test_fresh_ledger_holds_invariants() {
        let credit = formalized_credit();
        assert_eq!(credit.balance, Money::from_major(12_000));
        assert!(credit.check_invariants().is_ok());
        assert!(credit.installments.iter().all(|i| i.status == InstallmentStatus::Pending));
    }

    #[test]
    fn test_interest_moves_to_arrears_when_overdue() {
        let mut credit = formalized_credit();
        let installment = credit.installment_mut(1).unwrap();
        let interest = installment.interest;

        assert_eq!(installment.due().current_interest, interest);
        assert_eq!(installment.due().arrears_interest, Money::ZERO);

        installment.days_late = Some(3);
        assert_eq!(installment.due().current_interest, Money::ZERO);
        assert_eq!(installment.due().arrears_interest, interest);
    }

    #[test]
    fn test_status_transitions() {
        let mut credit = formalized_credit();
        let installment = credit.installment_mut(1).unwrap();
        let due = installment.due_date;

        installment.days_late = Some(2);
        assert_eq!(installment.status_after_accrual(0), InstallmentStatus::Mora);
        assert_eq!(installment.status_after_accrual(5), InstallmentStatus::Pending);

        installment.status = InstallmentStatus::Mora;
        installment.delinquent_since = Some(due);
        installment.paid.arrears_interest = installment.interest;
        assert_eq!(installment.status_after_payment(), InstallmentStatus::Partial);

        // once delinquent, later evaluations keep a partially paid installment Partial
        installment.status = InstallmentStatus::Partial;
        installment.days_late = Some(40);
        assert_eq!(installment.status_after_accrual(0), InstallmentStatus::Partial);

        installment.paid.principal = installment.principal;
        installment.paid.insurance = installment.insurance;
        assert_eq!(installment.status_after_payment(), InstallmentStatus::PaidLate);
    }

    #[test]
    fn test_reversal_status_keeps_other_payments() {
        let mut credit = formalized_credit();
        let installment = credit.installment_mut(1).unwrap();

        assert_eq!(installment.status_after_reversal(InstallmentStatus::Pending), InstallmentStatus::Pending);

        installment.paid.current_interest = Money::from_major(1);
        assert_eq!(installment.status_after_reversal(InstallmentStatus::Pending), InstallmentStatus::Partial);
        assert_eq!(installment.status_after_reversal(InstallmentStatus::Mora), InstallmentStatus::Mora);
    }

    #[test]
    fn test_balance_mismatch_is_detected() {
        let mut credit = formalized_credit();
        credit.balance = Money::from_major(1);
        assert!(matches!(credit.check_invariants(), Err(LedgerError::LedgerInvariant { .. })));
    }

    #[test]
    fn test_overapplication_is_detected() {
        let mut credit = formalized_credit();
        let installment = credit.installment_mut(2).unwrap();
        installment.paid.insurance = Money::from_major(1);
        assert!(credit.check_invariants().is_err());
    }
}

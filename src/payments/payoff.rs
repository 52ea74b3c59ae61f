use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::PrepaymentPenaltyConfig;
use crate::decimal::Money;
use crate::errors::Result;
use crate::interest::AccrualEngine;
use crate::ledger::Credit;
use crate::payments::{add_months, InstallmentAdjustment};
use crate::types::{Component, CreditId};

/// amount needed to cancel a credit before term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoffBreakdown {
    pub credit_id: CreditId,
    pub payoff_date: NaiveDate,
    pub remaining_principal: Money,
    /// unpaid moratory, interest and insurance of installments already due
    pub overdue_charges: Money,
    /// current-period interest prorated to the payoff date, net of what is paid
    pub accrued_interest: Money,
    pub current_monthly_interest: Money,
    pub penalty: Money,
    pub total: Money,
    /// installment whose period contains the payoff date
    pub current_installment: Option<u32>,
    /// gross interest of the current period up to the payoff date
    #[serde(skip)]
    current_period_interest: Money,
}

impl PayoffBreakdown {
    pub fn penalty_applies(&self) -> bool {
        self.penalty.is_positive()
    }

    /// amount applied to the installments, the penalty excluded
    pub fn ledger_amount(&self) -> Money {
        self.total - self.penalty
    }
}

/// early payoff calculator
pub struct EarlyPayoffCalculator {
    config: PrepaymentPenaltyConfig,
}

impl EarlyPayoffCalculator {
    pub fn new(config: PrepaymentPenaltyConfig) -> Self {
        Self { config }
    }

    /// the credit must already carry moratory accrued to `payoff_date`
    pub fn compute(&self, credit: &Credit, payoff_date: NaiveDate) -> Result<PayoffBreakdown> {
        let remaining_principal = credit.remaining_principal();

        let overdue_charges: Money = credit
            .installments
            .iter()
            .filter(|i| !i.status.is_settled() && i.due_date <= payoff_date)
            .map(|i| {
                let outstanding = i.outstanding();
                outstanding.total() - outstanding.get(Component::Principal)
            })
            .sum();

        let accrual = AccrualEngine::new(credit.terms.day_count);
        let mut current_installment = None;
        let mut current_period_interest = Money::ZERO;
        let mut accrued_interest = Money::ZERO;

        if let Some(current) = credit
            .installments
            .iter()
            .find(|i| !i.status.is_settled() && i.due_date > payoff_date)
        {
            let period_start = if current.number <= 1 {
                credit.terms.start_date
            } else {
                add_months(credit.terms.start_date, current.number - 1)?
            };
            let accrued = accrual.prorate(current.interest, period_start, current.due_date, payoff_date);

            current_installment = Some(current.number);
            current_period_interest = accrued.amount;
            accrued_interest = accrued.amount.saturating_sub(current.paid.interest());
        }

        let monthly_rate = credit.terms.annual_rate.monthly().as_decimal();
        let current_monthly_interest = Money::from_decimal(remaining_principal.as_decimal() * monthly_rate);

        let penalty_window_end = add_months(credit.terms.start_date, self.config.penalty_window_months)?;
        let penalty = if payoff_date < penalty_window_end {
            current_monthly_interest * Decimal::from(self.config.interest_months)
        } else {
            Money::ZERO
        };

        let total = remaining_principal + overdue_charges + accrued_interest + penalty;

        Ok(PayoffBreakdown {
            credit_id: credit.id,
            payoff_date,
            remaining_principal,
            overdue_charges,
            accrued_interest,
            current_monthly_interest,
            penalty,
            total,
            current_installment,
            current_period_interest,
        })
    }

    /// rewrite the not-yet-due installments to what cancellation owes
    pub fn reprice(&self, credit: &mut Credit, breakdown: &PayoffBreakdown) -> Vec<InstallmentAdjustment> {
        let mut adjustments = Vec::new();

        for installment in credit.installments.iter_mut() {
            if installment.status.is_settled() || installment.due_date <= breakdown.payoff_date {
                continue;
            }

            let interest_after = if Some(installment.number) == breakdown.current_installment {
                breakdown.current_period_interest.max(installment.paid.interest())
            } else {
                installment.paid.interest()
            };
            // insurance of periods not yet reached is waived
            let insurance_after = installment.paid.insurance;

            if interest_after == installment.interest && insurance_after == installment.insurance {
                continue;
            }

            adjustments.push(InstallmentAdjustment {
                installment_number: installment.number,
                interest_before: installment.interest,
                insurance_before: installment.insurance,
                scheduled_amount_before: installment.scheduled_amount,
                interest_after,
                insurance_after,
            });

            installment.interest = interest_after;
            installment.insurance = insurance_after;
            installment.scheduled_amount = installment.principal + interest_after + insurance_after;
        }

        adjustments
    }
}

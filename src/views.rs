/// serializable read models for the surrounding application
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::ledger::{Credit, Installment};
use crate::types::{BorrowerId, ComponentAmounts, CreditId, CreditStatus, InstallmentStatus};

/// serializable view of a credit and its installments
#[derive(Debug, Serialize, Deserialize)]
pub struct CreditView {
    pub id: CreditId,
    pub borrower: BorrowerId,
    pub status: CreditStatus,
    pub registered_at: DateTime<Utc>,
    pub formalized_at: Option<DateTime<Utc>>,
    pub terms: TermsView,
    pub balances: BalanceView,
    pub installments: Vec<InstallmentView>,
    pub refinanced_into: Option<CreditId>,
    pub refinanced_from: Option<CreditId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TermsView {
    pub principal: Money,
    pub annual_rate: Rate,
    pub term_months: u32,
    pub start_date: NaiveDate,
    pub fixed_installment: Money,
    pub monthly_insurance: Money,
    pub day_count_convention: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceView {
    pub balance: Money,
    pub total_outstanding: Money,
    pub principal_paid: Money,
    pub installments_paid: u32,
    pub installments_in_mora: u32,
    pub next_due_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstallmentView {
    pub number: u32,
    pub due_date: NaiveDate,
    pub status: InstallmentStatus,
    pub days_late: Option<u32>,
    pub delinquent_since: Option<NaiveDate>,
    pub scheduled_amount: Money,
    pub opening_balance: Money,
    pub closing_balance: Money,
    pub due: ComponentAmounts,
    pub paid: ComponentAmounts,
    pub outstanding: Money,
}

impl InstallmentView {
    pub fn from_installment(installment: &Installment) -> Self {
        InstallmentView {
            number: installment.number,
            due_date: installment.due_date,
            status: installment.status,
            days_late: installment.days_late,
            delinquent_since: installment.delinquent_since,
            scheduled_amount: installment.scheduled_amount,
            opening_balance: installment.opening_balance,
            closing_balance: installment.closing_balance,
            due: installment.due(),
            paid: installment.paid,
            outstanding: installment.outstanding().total(),
        }
    }
}

impl CreditView {
    pub fn from_credit(credit: &Credit) -> Self {
        let count = |status: InstallmentStatus| {
            credit.installments.iter().filter(|i| i.status == status).count() as u32
        };

        CreditView {
            id: credit.id,
            borrower: credit.borrower.clone(),
            status: credit.status,
            registered_at: credit.registered_at,
            formalized_at: credit.formalized_at,
            terms: TermsView {
                principal: credit.terms.principal,
                annual_rate: credit.terms.annual_rate,
                term_months: credit.terms.term_months,
                start_date: credit.terms.start_date,
                fixed_installment: credit.fixed_installment,
                monthly_insurance: credit.terms.monthly_insurance,
                day_count_convention: format!("{:?}", credit.terms.day_count),
            },
            balances: BalanceView {
                balance: credit.balance,
                total_outstanding: credit.total_outstanding(),
                principal_paid: credit.principal_paid(),
                installments_paid: count(InstallmentStatus::Paid) + count(InstallmentStatus::PaidLate),
                installments_in_mora: count(InstallmentStatus::Mora),
                next_due_date: credit
                    .installments
                    .iter()
                    .find(|i| !i.status.is_settled())
                    .map(|i| i.due_date),
            },
            installments: credit.installments.iter().map(InstallmentView::from_installment).collect(),
            refinanced_into: credit.refinanced_into,
            refinanced_from: credit.refinanced_from,
        }
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CreditTerms;
    use crate::payments::AmortizationSchedule;
    use rust_decimal_macros::dec;

    #[test]
    fn test_view_serializes() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let terms = CreditTerms::new(Money::from_major(1_000), Rate::from_percent(dec!(18)), 3, start);
        let schedule = AmortizationSchedule::generate(&terms).unwrap();
        let mut credit = Credit::new(BorrowerId::new("5-0505-0505"), terms, Utc::now());
        credit.installments = schedule.installments.iter().map(Installment::from_scheduled).collect();
        credit.status = CreditStatus::Formalized;
        credit.recompute_balance();

        let view = CreditView::from_credit(&credit);
        assert_eq!(view.installments.len(), 3);
        assert_eq!(view.balances.balance, Money::from_major(1_000));
        assert_eq!(view.balances.next_due_date, NaiveDate::from_ymd_opt(2024, 2, 15));

        let json = view.to_json_pretty().unwrap();
        assert!(json.contains("\"borrower\": \"5-0505-0505\""));
    }
}

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::MoratoryConfig;
use crate::decimal::{Money, Rate};
use crate::ledger::{Credit, Installment};
use crate::types::InstallmentStatus;

/// lateness and moratory interest of one installment on a given date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoratoryAssessment {
    pub days_late: Option<u32>,
    pub moratory_interest: Money,
}

/// one installment touched by an accrual run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualLine {
    pub installment_number: u32,
    pub days_late: u32,
    pub moratory_interest: Money,
    pub status_before: InstallmentStatus,
    pub status_after: InstallmentStatus,
}

/// result of evaluating a credit's lateness on a date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualReport {
    pub evaluation_date: NaiveDate,
    pub lines: Vec<AccrualLine>,
}

impl AccrualReport {
    pub fn total_moratory(&self) -> Money {
        self.lines.iter().map(|l| l.moratory_interest).sum()
    }

    /// installments that entered Mora on this run
    pub fn newly_delinquent(&self) -> impl Iterator<Item = &AccrualLine> {
        self.lines.iter().filter(|l| {
            l.status_after == InstallmentStatus::Mora && l.status_before != InstallmentStatus::Mora
        })
    }
}

/// moratory interest engine
pub struct MoratoryEngine {
    pub config: MoratoryConfig,
}

impl MoratoryEngine {
    pub fn new(config: MoratoryConfig) -> Self {
        Self { config }
    }

    /// pure assessment: depends only on remaining principal and days late
    pub fn assess(
        &self,
        installment: &Installment,
        annual_rate: Rate,
        evaluation_date: NaiveDate,
    ) -> MoratoryAssessment {
        if evaluation_date <= installment.due_date {
            return MoratoryAssessment {
                days_late: None,
                moratory_interest: Money::ZERO,
            };
        }

        let days_late = (evaluation_date - installment.due_date).num_days() as u32;
        let daily_rate = self.config.daily_rate(annual_rate);
        let moratory_interest = installment
            .remaining_principal()
            .simple_interest(daily_rate, days_late);

        MoratoryAssessment {
            days_late: Some(days_late),
            moratory_interest,
        }
    }

    /// re-evaluate every unsettled installment; running twice for a date is a no-op
    pub fn accrue(&self, credit: &mut Credit, evaluation_date: NaiveDate) -> AccrualReport {
        let annual_rate = credit.terms.annual_rate;
        let mut lines = Vec::new();

        for installment in credit.installments.iter_mut() {
            if installment.status.is_settled() {
                continue;
            }

            let assessment = self.assess(installment, annual_rate, evaluation_date);
            let status_before = installment.status;

            installment.days_late = assessment.days_late;
            // never below what has already been collected
            installment.moratory_interest = assessment
                .moratory_interest
                .max(installment.paid.moratory_interest);
            installment.status = installment.status_after_accrual(self.config.grace_period_days);
            if installment.status == InstallmentStatus::Mora && installment.delinquent_since.is_none() {
                installment.delinquent_since = Some(evaluation_date);
            }

            if let Some(days_late) = assessment.days_late {
                lines.push(AccrualLine {
                    installment_number: installment.number,
                    days_late,
                    moratory_interest: installment.moratory_interest,
                    status_before,
                    status_after: installment.status,
                });
            }
        }

        AccrualReport {
            evaluation_date,
            lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CreditTerms;
    use crate::ledger::Installment;
    use crate::payments::AmortizationSchedule;
    use crate::types::{BorrowerId, CreditStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn credit(rate_percent: rust_decimal::Decimal) -> Credit {
        let terms = CreditTerms::new(Money::from_major(12_000), Rate::from_percent(rate_percent), 12, date(2024, 1, 15));
        let schedule = AmortizationSchedule::generate(&terms).unwrap();
        let mut credit = Credit::new(BorrowerId::new("1-0001-0001"), terms, Utc::now());
        credit.installments = schedule.installments.iter().map(Installment::from_scheduled).collect();
        credit.status = CreditStatus::Formalized;
        credit.recompute_balance();
        credit
    }

    #[test]
    fn test_not_late_before_due_date() {
        let engine = MoratoryEngine::new(MoratoryConfig::default());
        let credit = credit(dec!(36));
        let first = credit.installment(1).unwrap();

        let on_due = engine.assess(first, credit.terms.annual_rate, date(2024, 2, 15));
        assert_eq!(on_due.days_late, None);
        assert_eq!(on_due.moratory_interest, Money::ZERO);
    }

    #[test]
    fn test_moratory_formula() {
        let engine = MoratoryEngine::new(MoratoryConfig::default());
        let credit = credit(dec!(36));
        let first = credit.installment(1).unwrap();

        // 36% annual -> 3% monthly -> 0.1% daily
        let assessment = engine.assess(first, credit.terms.annual_rate, date(2024, 2, 25));
        assert_eq!(assessment.days_late, Some(10));
        let expected = Money::from_decimal(first.principal.as_decimal() * dec!(0.001) * dec!(10));
        assert_eq!(assessment.moratory_interest, expected);
    }

    #[test]
    fn test_accrual_is_idempotent() {
        let engine = MoratoryEngine::new(MoratoryConfig::default());
        let mut credit = credit(dec!(36));
        let evaluation = date(2024, 4, 1);

        let first_run = engine.accrue(&mut credit, evaluation);
        let after_first = credit.clone();
        let second_run = engine.accrue(&mut credit, evaluation);

        assert_eq!(credit, after_first);
        assert_eq!(first_run.total_moratory(), second_run.total_moratory());
        assert_eq!(first_run.lines.len(), 2);
        assert_eq!(first_run.newly_delinquent().count(), 2);
        assert_eq!(second_run.newly_delinquent().count(), 0);
    }

    #[test]
    fn test_grace_period_delays_mora() {
        let config = MoratoryConfig {
            grace_period_days: 5,
            ..MoratoryConfig::default()
        };
        let engine = MoratoryEngine::new(config);
        let mut credit = credit(dec!(36));

        engine.accrue(&mut credit, date(2024, 2, 18));
        let first = credit.installment(1).unwrap();
        assert_eq!(first.days_late, Some(3));
        assert_eq!(first.status, InstallmentStatus::Pending);
        assert!(first.moratory_interest.is_positive());

        engine.accrue(&mut credit, date(2024, 2, 22));
        let first = credit.installment(1).unwrap();
        assert_eq!(first.status, InstallmentStatus::Mora);
        assert_eq!(first.delinquent_since, Some(date(2024, 2, 22)));
    }

    #[test]
    fn test_partial_after_mora_stays_partial() {
        let engine = MoratoryEngine::new(MoratoryConfig::default());
        let mut credit = credit(dec!(36));

        engine.accrue(&mut credit, date(2024, 3, 1));
        let first = credit.installment_mut(1).unwrap();
        assert_eq!(first.status, InstallmentStatus::Mora);

        first.paid.moratory_interest = first.moratory_interest;
        first.status = first.status_after_payment();
        assert_eq!(first.status, InstallmentStatus::Partial);

        engine.accrue(&mut credit, date(2024, 3, 20));
        let first = credit.installment(1).unwrap();
        assert_eq!(first.status, InstallmentStatus::Partial);
        assert_eq!(first.delinquent_since, Some(date(2024, 3, 1)));
        assert_eq!(first.days_late, Some(34));
    }

    #[test]
    fn test_legal_uplift_multiplier() {
        let config = MoratoryConfig {
            rate_multiplier: dec!(1.3),
            ..MoratoryConfig::default()
        };
        let engine = MoratoryEngine::new(config);
        let credit = credit(dec!(36));
        let first = credit.installment(1).unwrap();

        let assessment = engine.assess(first, credit.terms.annual_rate, date(2024, 2, 25));
        let expected = Money::from_decimal(first.principal.as_decimal() * dec!(0.0013) * dec!(10));
        assert_eq!(assessment.moratory_interest, expected);
    }
}

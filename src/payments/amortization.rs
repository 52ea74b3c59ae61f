use chrono::{Months, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::config::CreditTerms;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};

/// one period of an amortization schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledInstallment {
    pub number: u32,
    pub due_date: NaiveDate,
    pub opening_balance: Money,
    /// principal + interest + insurance
    pub payment_amount: Money,
    pub principal: Money,
    pub interest: Money,
    pub insurance: Money,
    pub closing_balance: Money,
    pub cumulative_interest: Money,
    pub cumulative_principal: Money,
}

/// constant-annuity (French) amortization schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmortizationSchedule {
    pub principal: Money,
    pub annual_rate: Rate,
    pub term_months: u32,
    pub start_date: NaiveDate,
    pub fixed_payment: Money,
    pub installments: Vec<ScheduledInstallment>,
    pub total_interest: Money,
    pub total_payment: Money,
}

impl AmortizationSchedule {
    /// generate the installment plan for a set of terms
    pub fn generate(terms: &CreditTerms) -> Result<Self> {
        terms.validate()?;

        let monthly_rate = terms.annual_rate.monthly().as_decimal();
        let fixed_payment = fixed_payment(terms.principal, terms.annual_rate, terms.term_months)?;

        let mut installments = Vec::with_capacity(terms.term_months as usize);
        let mut balance = terms.principal;
        let mut cumulative_interest = Money::ZERO;
        let mut cumulative_principal = Money::ZERO;

        for number in 1..=terms.term_months {
            let due_date = add_months(terms.start_date, number)?;
            let interest = Money::from_decimal(balance.as_decimal() * monthly_rate);

            let principal = if number == terms.term_months {
                // last period absorbs the rounding residue
                balance
            } else {
                fixed_payment.saturating_sub(interest).min(balance)
            };

            let closing_balance = balance - principal;
            cumulative_interest += interest;
            cumulative_principal += principal;

            installments.push(ScheduledInstallment {
                number,
                due_date,
                opening_balance: balance,
                payment_amount: principal + interest + terms.monthly_insurance,
                principal,
                interest,
                insurance: terms.monthly_insurance,
                closing_balance,
                cumulative_interest,
                cumulative_principal,
            });

            balance = closing_balance;
        }

        let total_payment = installments.iter().map(|i| i.payment_amount).sum();

        Ok(Self {
            principal: terms.principal,
            annual_rate: terms.annual_rate,
            term_months: terms.term_months,
            start_date: terms.start_date,
            fixed_payment,
            installments,
            total_interest: cumulative_interest,
            total_payment,
        })
    }

    /// get installment for a specific period
    pub fn get(&self, number: u32) -> Option<&ScheduledInstallment> {
        number
            .checked_sub(1)
            .and_then(|index| self.installments.get(index as usize))
    }
}

/// A = P * i * (1+i)^n / ((1+i)^n - 1), rounded half-up to cents
pub fn fixed_payment(principal: Money, annual_rate: Rate, months: u32) -> Result<Money> {
    if months == 0 {
        return Err(LedgerError::schedule_input("term must be at least one month"));
    }

    let i = annual_rate.monthly().as_decimal();
    let p = principal.as_decimal();

    if i.is_zero() {
        return Ok(Money::from_decimal(p / Decimal::from(months)));
    }

    let base = Decimal::ONE + i;
    let mut compound = Decimal::ONE;
    for _ in 0..months {
        compound = compound
            .checked_mul(base)
            .ok_or_else(|| LedgerError::schedule_input("rate and term overflow the annuity factor"))?;
    }

    let payment = p
        .checked_mul(i)
        .and_then(|x| x.checked_mul(compound))
        .and_then(|x| x.checked_div(compound - Decimal::ONE))
        .ok_or_else(|| LedgerError::schedule_input("annuity payment cannot be represented"))?;

    Ok(Money::from_decimal(
        payment.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
    ))
}

/// same day-of-month `months` later, clamped to the month's length
pub fn add_months(date: NaiveDate, months: u32) -> Result<NaiveDate> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| LedgerError::schedule_input(format!("due date overflow adding {} months", months)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_equal_installments_schedule() {
        let terms = CreditTerms::new(Money::from_major(100_000), Rate::from_percent(dec!(12)), 12, date(2024, 1, 1));
        let schedule = AmortizationSchedule::generate(&terms).unwrap();

        assert_eq!(schedule.installments.len(), 12);
        // 100k at 1% monthly over 12 months
        assert_eq!(schedule.fixed_payment, Money::from_str_exact("8884.88").unwrap());

        let first = &schedule.installments[0];
        assert_eq!(first.opening_balance, terms.principal);
        assert_eq!(first.interest, Money::from_major(1_000));
        assert_eq!(first.principal, Money::from_str_exact("7884.88").unwrap());

        let last = schedule.installments.last().unwrap();
        assert_eq!(last.closing_balance, Money::ZERO);
        assert_eq!(last.cumulative_principal, terms.principal);

        for installment in &schedule.installments[..11] {
            assert_eq!(installment.payment_amount, schedule.fixed_payment);
        }
    }

    #[test]
    fn test_two_month_schedule_at_high_rate() {
        let terms = CreditTerms::new(Money::from_major(400_000), Rate::from_percent(dec!(51.21)), 2, date(2024, 3, 10));
        let schedule = AmortizationSchedule::generate(&terms).unwrap();

        let i = dec!(51.21) / dec!(12) / dec!(100);
        let c = (Decimal::ONE + i) * (Decimal::ONE + i);
        let expected = Money::from_decimal(dec!(400000) * i * c / (c - Decimal::ONE));

        assert_eq!(schedule.fixed_payment, expected);
        assert_eq!(schedule.installments.len(), 2);
        assert_eq!(schedule.installments[1].closing_balance, Money::ZERO);
        assert_eq!(
            schedule.installments[0].principal + schedule.installments[1].principal,
            terms.principal
        );
    }

    #[test]
    fn test_zero_rate_splits_principal() {
        let terms = CreditTerms::new(Money::from_major(100), Rate::ZERO, 3, date(2024, 1, 1));
        let schedule = AmortizationSchedule::generate(&terms).unwrap();

        assert_eq!(schedule.fixed_payment, Money::from_str_exact("33.33").unwrap());
        assert_eq!(schedule.installments[2].principal, Money::from_str_exact("33.34").unwrap());
        assert_eq!(schedule.total_interest, Money::ZERO);
    }

    #[test]
    fn test_tiny_principal_never_goes_negative() {
        let terms = CreditTerms::new(Money::from_str_exact("0.07").unwrap(), Rate::ZERO, 12, date(2024, 1, 1));
        let schedule = AmortizationSchedule::generate(&terms).unwrap();

        assert!(schedule.installments.iter().all(|i| !i.principal.is_negative()));
        assert!(schedule.installments.iter().all(|i| !i.closing_balance.is_negative()));
        assert_eq!(schedule.installments.last().unwrap().closing_balance, Money::ZERO);
    }

    #[test]
    fn test_due_dates_clamp_to_month_end() {
        let terms = CreditTerms::new(Money::from_major(3_000), Rate::from_percent(dec!(12)), 3, date(2024, 1, 31));
        let schedule = AmortizationSchedule::generate(&terms).unwrap();

        assert_eq!(schedule.installments[0].due_date, date(2024, 2, 29));
        assert_eq!(schedule.installments[1].due_date, date(2024, 3, 31));
        assert_eq!(schedule.installments[2].due_date, date(2024, 4, 30));
    }

    #[test]
    fn test_insurance_is_added_to_each_installment() {
        let terms = CreditTerms::new(Money::from_major(1_200), Rate::ZERO, 12, date(2024, 1, 1))
            .with_insurance(Money::from_major(5));
        let schedule = AmortizationSchedule::generate(&terms).unwrap();

        assert!(schedule.installments.iter().all(|i| i.payment_amount == Money::from_major(105)));
        assert_eq!(schedule.get(12).unwrap().insurance, Money::from_major(5));
        assert!(schedule.get(0).is_none());
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let start = date(2024, 1, 1);
        let cases = [
            CreditTerms::new(Money::ZERO, Rate::ZERO, 12, start),
            CreditTerms::new(Money::from_major(-5), Rate::ZERO, 12, start),
            CreditTerms::new(Money::from_major(5), Rate::ZERO, 0, start),
            CreditTerms::new(Money::from_major(5), Rate::from_percent(dec!(-0.5)), 12, start),
        ];
        for terms in cases {
            assert!(matches!(
                AmortizationSchedule::generate(&terms),
                Err(LedgerError::InvalidScheduleInput { .. })
            ));
        }
    }
}

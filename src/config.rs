use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::interest::DayCountConvention;

/// engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub moratory: MoratoryConfig,
    pub prepayment_penalty: PrepaymentPenaltyConfig,
    pub accounting: AccountingConfig,
    pub policies: PolicyTable,
}

/// moratory interest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoratoryConfig {
    /// multiplier over the credit's monthly rate (1.3 for the legal uplift)
    pub rate_multiplier: Decimal,
    /// days past due before an installment is flagged Mora
    pub grace_period_days: u32,
    /// days per month used to derive the daily moratory rate
    pub days_per_month: u32,
}

impl Default for MoratoryConfig {
    fn default() -> Self {
        Self {
            rate_multiplier: Decimal::ONE,
            grace_period_days: 0,
            days_per_month: 30,
        }
    }
}

impl MoratoryConfig {
    /// daily moratory rate for a credit with the given annual nominal rate
    pub fn daily_rate(&self, annual_rate: Rate) -> Decimal {
        annual_rate.monthly().as_decimal() * self.rate_multiplier / Decimal::from(self.days_per_month)
    }
}

/// prepayment penalty for cancellation before term
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepaymentPenaltyConfig {
    /// months from formalization during which the penalty applies
    pub penalty_window_months: u32,
    /// penalty expressed in months of current interest
    pub interest_months: u32,
}

impl Default for PrepaymentPenaltyConfig {
    fn default() -> Self {
        Self {
            penalty_window_months: 12,
            interest_months: 3,
        }
    }
}

/// outbound accounting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountingConfig {
    /// post journal entries once a sink is attached
    pub enabled: bool,
    /// loans receivable account debited on reversal, credited on payment
    pub receivable_account: String,
    /// cash / bank account debited on payment
    pub cash_account: String,
    pub timeout_ms: u64,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            receivable_account: "1-01-03-001".to_string(),
            cash_account: "1-01-01-001".to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl AccountingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// rate/term policy for one credit type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPolicy {
    pub credit_type: String,
    pub annual_rate_percent: Decimal,
    pub term_months: u32,
    pub day_count: DayCountConvention,
    pub monthly_insurance: Money,
}

impl CreditPolicy {
    /// payroll-deduction credit
    pub fn payroll_deduction() -> Self {
        Self {
            credit_type: "payroll_deduction".to_string(),
            annual_rate_percent: dec!(24),
            term_months: 36,
            day_count: DayCountConvention::Actual,
            monthly_insurance: Money::ZERO,
        }
    }

    /// short-term personal credit
    pub fn micro_credit() -> Self {
        Self {
            credit_type: "micro_credit".to_string(),
            annual_rate_percent: dec!(51.21),
            term_months: 12,
            day_count: DayCountConvention::Thirty360,
            monthly_insurance: Money::ZERO,
        }
    }

    pub fn annual_rate(&self) -> Rate {
        Rate::from_percent(self.annual_rate_percent)
    }
}

/// pure lookup table of credit policies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTable {
    pub policies: Vec<CreditPolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            policies: vec![CreditPolicy::payroll_deduction(), CreditPolicy::micro_credit()],
        }
    }
}

impl PolicyTable {
    pub fn lookup(&self, credit_type: &str) -> Result<&CreditPolicy> {
        self.policies
            .iter()
            .find(|p| p.credit_type == credit_type)
            .ok_or_else(|| LedgerError::InvalidConfiguration {
                message: format!("no policy for credit type '{}'", credit_type),
            })
    }
}

/// contractual terms of one credit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTerms {
    pub principal: Money,
    pub annual_rate: Rate,
    pub term_months: u32,
    /// formalization date; installment k falls due k months later
    pub start_date: NaiveDate,
    #[serde(default)]
    pub monthly_insurance: Money,
    #[serde(default)]
    pub day_count: DayCountConvention,
}

impl CreditTerms {
    pub fn new(principal: Money, annual_rate: Rate, term_months: u32, start_date: NaiveDate) -> Self {
        Self {
            principal,
            annual_rate,
            term_months,
            start_date,
            monthly_insurance: Money::ZERO,
            day_count: DayCountConvention::Actual,
        }
    }

    /// terms filled from a policy
    pub fn from_policy(policy: &CreditPolicy, principal: Money, start_date: NaiveDate) -> Self {
        Self {
            principal,
            annual_rate: policy.annual_rate(),
            term_months: policy.term_months,
            start_date,
            monthly_insurance: policy.monthly_insurance,
            day_count: policy.day_count,
        }
    }

    pub fn with_insurance(mut self, monthly_insurance: Money) -> Self {
        self.monthly_insurance = monthly_insurance;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.principal.is_positive() {
            return Err(LedgerError::schedule_input(format!(
                "principal must be positive, got {}",
                self.principal
            )));
        }
        if self.term_months == 0 {
            return Err(LedgerError::schedule_input("term must be at least one month"));
        }
        if self.annual_rate.is_negative() {
            return Err(LedgerError::schedule_input(format!(
                "annual rate cannot be negative, got {}",
                self.annual_rate
            )));
        }
        if self.monthly_insurance.is_negative() {
            return Err(LedgerError::schedule_input("insurance cannot be negative"));
        }
        Ok(())
    }
}

impl EngineConfig {
    /// parse a JSON document; missing sections fall back to defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| LedgerError::InvalidConfiguration {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.moratory.rate_multiplier < Decimal::ZERO {
            return Err(LedgerError::InvalidConfiguration {
                message: "moratory rate multiplier cannot be negative".to_string(),
            });
        }
        if self.moratory.days_per_month == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "moratory days per month must be positive".to_string(),
            });
        }
        for policy in &self.policies.policies {
            if policy.annual_rate_percent < Decimal::ZERO || policy.term_months == 0 {
                return Err(LedgerError::InvalidConfiguration {
                    message: format!("policy '{}' has an invalid rate or term", policy.credit_type),
                });
            }
        }
        Ok(())
    }

    /// configuration with the 30% moratory uplift of the commercial code
    pub fn with_legal_moratory_uplift(mut self) -> Self {
        self.moratory.rate_multiplier = dec!(1.3);
        self
    }
}

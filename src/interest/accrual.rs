use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

use crate::decimal::Money;

/// day count convention for interest proration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum DayCountConvention {
    /// actual calendar days
    #[default]
    Actual,
    /// 30 days per month
    Thirty360,
}

/// engine for prorating periodic interest between dates
pub struct AccrualEngine {
    pub convention: DayCountConvention,
}

impl AccrualEngine {
    pub fn new(convention: DayCountConvention) -> Self {
        Self { convention }
    }

    /// days between dates based on convention; negative when end precedes start
    pub fn days_between(&self, start: NaiveDate, end: NaiveDate) -> i64 {
        match self.convention {
            DayCountConvention::Actual => (end - start).num_days(),
            DayCountConvention::Thirty360 => days_30_360(start, end),
        }
    }

    /// interest of one period prorated to `as_of`, clamped to the period bounds
    pub fn prorate(
        &self,
        period_interest: Money,
        period_start: NaiveDate,
        period_end: NaiveDate,
        as_of: NaiveDate,
    ) -> AccruedInterest {
        let period_days = self.days_between(period_start, period_end).max(0);
        let elapsed = self.days_between(period_start, as_of).clamp(0, period_days);

        let amount = if period_days == 0 {
            period_interest
        } else {
            Money::from_decimal(
                period_interest.as_decimal() * Decimal::from(elapsed) / Decimal::from(period_days),
            )
        };

        AccruedInterest {
            amount,
            days_elapsed: elapsed as u32,
            period_days: period_days as u32,
        }
    }
}

/// interest accrued inside a period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccruedInterest {
    pub amount: Money,
    pub days_elapsed: u32,
    pub period_days: u32,
}

/// 30/360 days between dates
fn days_30_360(start: NaiveDate, end: NaiveDate) -> i64 {
    let y1 = start.year() as i64;
    let y2 = end.year() as i64;
    let m1 = start.month() as i64;
    let m2 = end.month() as i64;
    let d1 = start.day().min(30) as i64;
    let d2 = if d1 == 30 { end.day().min(30) as i64 } else { end.day() as i64 };

    360 * (y2 - y1) + 30 * (m2 - m1) + (d2 - d1)
}

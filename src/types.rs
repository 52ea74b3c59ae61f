use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::Money;

/// unique identifier for a credit
pub type CreditId = Uuid;

/// unique identifier for a payment record
pub type PaymentId = Uuid;

/// unique identifier for a surplus balance
pub type SurplusId = Uuid;

/// borrower identifier as it appears on payroll files (cedula)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BorrowerId(String);

impl BorrowerId {
    /// trims surrounding whitespace so payroll rows match registered ids
    pub fn new(id: impl AsRef<str>) -> Self {
        BorrowerId(id.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BorrowerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BorrowerId {
    fn from(s: &str) -> Self {
        BorrowerId::new(s)
    }
}

impl From<String> for BorrowerId {
    fn from(s: String) -> Self {
        BorrowerId::new(s)
    }
}

/// credit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditStatus {
    /// registered, schedule not yet generated
    Pending,
    /// schedule persisted, accepting payments
    Formalized,
    /// paid off before term
    Cancelled,
    /// closed into a new credit
    Refinanced,
}

/// installment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallmentStatus {
    Pending,
    Partial,
    Paid,
    /// past due beyond the grace period
    Mora,
    /// settled after its due date
    PaidLate,
}

impl InstallmentStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, InstallmentStatus::Paid | InstallmentStatus::PaidLate)
    }

    /// statuses the waterfall walks
    pub fn is_payable(&self) -> bool {
        matches!(
            self,
            InstallmentStatus::Pending | InstallmentStatus::Partial | InstallmentStatus::Mora
        )
    }
}

/// where a payment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentSource {
    /// cashier window / manual entry
    ManualWindow,
    /// payroll deduction file
    PayrollBatch,
    /// payment ahead of schedule
    Advance,
    /// cancellation before term
    EarlyPayoff,
    /// extraordinary payment, including surplus assignments
    Extraordinary,
}

/// installment components, listed in waterfall order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    MoratoryInterest,
    ArrearsInterest,
    CurrentInterest,
    Insurance,
    Principal,
}

impl Component {
    /// allocation priority: moratory, arrears, current interest, insurance, principal
    pub const WATERFALL: [Component; 5] = [
        Component::MoratoryInterest,
        Component::ArrearsInterest,
        Component::CurrentInterest,
        Component::Insurance,
        Component::Principal,
    ];
}

/// an amount per installment component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComponentAmounts {
    pub moratory_interest: Money,
    pub arrears_interest: Money,
    pub current_interest: Money,
    pub insurance: Money,
    pub principal: Money,
}

impl ComponentAmounts {
    pub fn get(&self, component: Component) -> Money {
        match component {
            Component::MoratoryInterest => self.moratory_interest,
            Component::ArrearsInterest => self.arrears_interest,
            Component::CurrentInterest => self.current_interest,
            Component::Insurance => self.insurance,
            Component::Principal => self.principal,
        }
    }

    pub fn get_mut(&mut self, component: Component) -> &mut Money {
        match component {
            Component::MoratoryInterest => &mut self.moratory_interest,
            Component::ArrearsInterest => &mut self.arrears_interest,
            Component::CurrentInterest => &mut self.current_interest,
            Component::Insurance => &mut self.insurance,
            Component::Principal => &mut self.principal,
        }
    }

    pub fn total(&self) -> Money {
        Component::WATERFALL.iter().map(|c| self.get(*c)).sum()
    }

    /// interest of both kinds
    pub fn interest(&self) -> Money {
        self.arrears_interest + self.current_interest
    }

    pub fn is_zero(&self) -> bool {
        self.total().is_zero() && !self.has_negative()
    }

    pub fn has_negative(&self) -> bool {
        Component::WATERFALL.iter().any(|c| self.get(*c).is_negative())
    }

    pub fn add(&mut self, other: &ComponentAmounts) {
        for c in Component::WATERFALL {
            *self.get_mut(c) += other.get(c);
        }
    }

    pub fn subtract(&mut self, other: &ComponentAmounts) {
        for c in Component::WATERFALL {
            *self.get_mut(c) -= other.get(c);
        }
    }
}

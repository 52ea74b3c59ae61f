use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::ledger::Installment;
use crate::types::{Component, ComponentAmounts, InstallmentStatus};

/// which installments a payment may reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationScope {
    /// every payable installment, oldest first
    #[default]
    AllPayable,
    /// only installments due on or before the date
    DueThrough(NaiveDate),
    /// one specific installment
    Installment(u32),
}

impl AllocationScope {
    fn admits(&self, installment: &Installment) -> bool {
        match self {
            AllocationScope::AllPayable => true,
            AllocationScope::DueThrough(date) => installment.due_date <= *date,
            AllocationScope::Installment(number) => installment.number == *number,
        }
    }
}

/// amounts applied to one installment by one payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentAllocation {
    pub installment_number: u32,
    pub applied: ComponentAmounts,
    pub status_before: InstallmentStatus,
    pub status_after: InstallmentStatus,
}

/// outcome of walking the waterfall
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub lines: Vec<InstallmentAllocation>,
    pub residual: Money,
}

impl Allocation {
    pub fn applied_total(&self) -> Money {
        self.lines.iter().map(|l| l.applied.total()).sum()
    }

    /// applied amounts summed across installments
    pub fn breakdown(&self) -> ComponentAmounts {
        let mut total = ComponentAmounts::default();
        for line in &self.lines {
            total.add(&line.applied);
        }
        total
    }
}

/// installment payment waterfall
pub struct PaymentWaterfall {
    order: [Component; 5],
}

impl PaymentWaterfall {
    /// moratory -> arrears interest -> current interest -> insurance -> principal
    pub fn standard() -> Self {
        Self {
            order: Component::WATERFALL,
        }
    }

    /// allocate `amount` across the installments, oldest due first
    pub fn allocate(
        &self,
        installments: &mut [Installment],
        amount: Money,
        scope: AllocationScope,
    ) -> Allocation {
        let mut remaining = amount;
        let mut lines = Vec::new();

        let mut eligible: Vec<usize> = installments
            .iter()
            .enumerate()
            .filter(|(_, i)| i.number > 0 && i.status.is_payable() && scope.admits(i))
            .map(|(index, _)| index)
            .collect();
        // same due date: lower sequence number first
        eligible.sort_by_key(|&index| (installments[index].due_date, installments[index].number));

        for index in eligible {
            if !remaining.is_positive() {
                break;
            }

            let installment = &mut installments[index];
            let status_before = installment.status;
            let outstanding = installment.outstanding();
            let mut applied = ComponentAmounts::default();

            for component in self.order {
                let take = remaining.min(outstanding.get(component));
                if take.is_positive() {
                    *applied.get_mut(component) += take;
                    *installment.paid.get_mut(component) += take;
                    remaining -= take;
                }
            }

            if applied.total().is_positive() {
                installment.status = installment.status_after_payment();
            }

            if applied.total().is_positive() {
                lines.push(InstallmentAllocation {
                    installment_number: installment.number,
                    applied,
                    status_before,
                    status_after: installment.status,
                });
            }
        }

        Allocation {
            lines,
            residual: remaining,
        }
    }
}

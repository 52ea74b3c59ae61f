use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    BorrowerId, ComponentAmounts, CreditId, CreditStatus, InstallmentStatus, PaymentId, PaymentSource, SurplusId,
};

/// all events that can be emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // lifecycle events
    CreditRegistered {
        credit_id: CreditId,
        borrower: BorrowerId,
        principal: Money,
        timestamp: DateTime<Utc>,
    },
    ScheduleGenerated {
        credit_id: CreditId,
        installments: u32,
        fixed_installment: Money,
        total_interest: Money,
        timestamp: DateTime<Utc>,
    },
    CreditCancelled {
        credit_id: CreditId,
        payment_id: PaymentId,
        penalty: Money,
        timestamp: DateTime<Utc>,
    },
    CreditRefinanced {
        credit_id: CreditId,
        new_credit_id: CreditId,
        carried_balance: Money,
        timestamp: DateTime<Utc>,
    },
    CreditStatusChanged {
        credit_id: CreditId,
        old_status: CreditStatus,
        new_status: CreditStatus,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // interest events
    MoratoryAccrued {
        credit_id: CreditId,
        evaluation_date: NaiveDate,
        installments_late: u32,
        total_moratory: Money,
    },
    InstallmentStatusChanged {
        credit_id: CreditId,
        installment_number: u32,
        old_status: InstallmentStatus,
        new_status: InstallmentStatus,
    },

    // payment events
    PaymentApplied {
        credit_id: CreditId,
        payment_id: PaymentId,
        source: PaymentSource,
        amount: Money,
        applied: ComponentAmounts,
        new_balance: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentReversed {
        credit_id: CreditId,
        payment_id: PaymentId,
        amount: Money,
        new_balance: Money,
        timestamp: DateTime<Utc>,
    },
    BatchProcessed {
        reference: String,
        applied: u32,
        rejected: u32,
        total_applied: Money,
        timestamp: DateTime<Utc>,
    },

    // surplus events
    SurplusCreated {
        surplus_id: SurplusId,
        borrower: BorrowerId,
        credit_id: Option<CreditId>,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    SurplusAssigned {
        surplus_id: SurplusId,
        credit_id: CreditId,
        installment_number: u32,
        amount: Money,
        remaining: Money,
        timestamp: DateTime<Utc>,
    },
    SurplusReleased {
        surplus_id: SurplusId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        self.events.extend(events);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

pub mod accounting;
pub mod config;
pub mod decimal;
pub mod engine;
pub mod errors;
pub mod events;
pub mod interest;
pub mod ledger;
pub mod payments;
pub mod types;
pub mod views;

// re-export key types
pub use accounting::{
    AccountingDispatcher, AccountingSink, DispatchOutcome, JournalEntry, JournalLine, MemorySink, NoopSink,
    SinkError,
};
pub use config::{
    AccountingConfig, CreditPolicy, CreditTerms, EngineConfig, MoratoryConfig, PolicyTable, PrepaymentPenaltyConfig,
};
pub use decimal::{Money, Rate};
pub use engine::LoanEngine;
pub use errors::{LedgerError, Result};
pub use events::{Event, EventStore};
pub use interest::{AccrualEngine, AccrualReport, DayCountConvention, MoratoryEngine};
pub use ledger::{Credit, Installment};
pub use payments::{
    AllocationScope, AmortizationSchedule, AppliedEntry, BatchEntry, BatchResult, CreditFailure, EarlyPayoffCalculator,
    InstallmentAllocation, InstallmentState, Payment, PaymentProcessor, PaymentRequest, PaymentWaterfall, PayoffBreakdown,
    RejectedEntry, ReversalEngine, ScheduledInstallment, SurplusBalance,
};
pub use types::{
    BorrowerId, Component, ComponentAmounts, CreditId, CreditStatus, InstallmentStatus, PaymentId, PaymentSource,
    SurplusId,
};
pub use views::{CreditView, InstallmentView};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;

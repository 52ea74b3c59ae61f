pub mod accrual;
pub mod moratory;

pub use accrual::{AccrualEngine, AccruedInterest, DayCountConvention};
pub use moratory::{AccrualLine, AccrualReport, MoratoryAssessment, MoratoryEngine};

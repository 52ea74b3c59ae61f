use thiserror::Error;

use crate::decimal::Money;
use crate::types::{BorrowerId, CreditId, CreditStatus, InstallmentStatus, PaymentId, SurplusId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("invalid schedule input: {message}")]
    InvalidScheduleInput {
        message: String,
    },

    #[error("invalid payment amount: {amount}")]
    InvalidPaymentAmount {
        amount: Money,
    },

    #[error("borrower cannot be resolved to an active credit: {borrower}")]
    UnresolvedBorrower {
        borrower: BorrowerId,
    },

    #[error("payment already reversed: {payment_id}")]
    AlreadyReversed {
        payment_id: PaymentId,
    },

    #[error("credit not found: {id}")]
    CreditNotFound {
        id: CreditId,
    },

    #[error("payment not found: {id}")]
    PaymentNotFound {
        id: PaymentId,
    },

    #[error("installment {number} not found on credit {credit_id}")]
    InstallmentNotFound {
        credit_id: CreditId,
        number: u32,
    },

    #[error("surplus balance not found: {id}")]
    SurplusNotFound {
        id: SurplusId,
    },

    #[error("journal entry does not balance: debit {debit}, credit {credit}")]
    PartiteDoubleMismatch {
        debit: Money,
        credit: Money,
    },

    #[error("credit not active: current status is {status:?}")]
    CreditNotActive {
        status: CreditStatus,
    },

    #[error("payoff amount too small: required {required}, provided {provided}")]
    InsufficientPayoff {
        required: Money,
        provided: Money,
    },

    #[error("installment {number} cannot receive payments in status {status:?}")]
    InstallmentNotPayable {
        number: u32,
        status: InstallmentStatus,
    },

    #[error("surplus {surplus_id} belongs to borrower {owner}, not {requested}")]
    SurplusBorrowerMismatch {
        surplus_id: SurplusId,
        owner: BorrowerId,
        requested: BorrowerId,
    },

    #[error("surplus {surplus_id} has already been consumed")]
    SurplusAlreadyConsumed {
        surplus_id: SurplusId,
    },

    #[error("ledger invariant violated: {message}")]
    LedgerInvariant {
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("ledger lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        LedgerError::LedgerInvariant {
            message: message.into(),
        }
    }

    pub(crate) fn schedule_input(message: impl Into<String>) -> Self {
        LedgerError::InvalidScheduleInput {
            message: message.into(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for LedgerError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        LedgerError::LockPoisoned
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

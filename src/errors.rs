use thiserror::Error;
use uuid::Uuid;

use crate::decimal::{Money, Rate};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid principal: {principal}")]
    InvalidPrincipal {
        principal: Money,
    },

    #[error("invalid term count: {term_count}")]
    InvalidTermCount {
        term_count: u32,
    },

    #[error("invalid interest rate: {rate}")]
    InvalidInterestRate {
        rate: Rate,
    },

    #[error("invalid payment amount: {amount}")]
    InvalidPaymentAmount {
        amount: Money,
    },

    #[error("cash amount must be a multiple of 0.10: {amount}")]
    NotCashMultiple {
        amount: Money,
    },

    #[error("payment below minimum for digital methods: minimum {minimum}, provided {provided}")]
    PaymentBelowMinimum {
        minimum: Money,
        provided: Money,
    },

    #[error("amount exceeds maximum payable: maximum {maximum}, requested {requested}")]
    AmountExceedsMaximum {
        maximum: Money,
        requested: Money,
    },

    #[error("advance amount mismatch: required {required}, provided {provided}")]
    AdvanceAmountMismatch {
        required: Money,
        provided: Money,
    },

    #[error("advance payment requires at least one target installment")]
    EmptyInstallmentSelection,

    #[error("invalid movement amount: {amount}")]
    InvalidMovementAmount {
        amount: Money,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("loan fully paid: {loan_id}")]
    LoanFullyPaid {
        loan_id: Uuid,
    },

    #[error("installment {blocking_installment} must be settled first")]
    InstallmentOrderViolation {
        blocking_installment: u32,
    },

    #[error("installment {installment_number} already paid")]
    InstallmentAlreadyPaid {
        installment_number: u32,
    },

    #[error("installment does not belong to loan: {installment_id}")]
    InstallmentNotInLoan {
        installment_id: Uuid,
    },

    #[error("client already has an active loan: {client_id}")]
    ClientAlreadyHasLoan {
        client_id: Uuid,
    },

    #[error("cashier already has an open session: {cashier_id}")]
    SessionAlreadyOpen {
        cashier_id: Uuid,
    },

    #[error("cash session is closed: {session_id}")]
    SessionClosed {
        session_id: Uuid,
    },

    #[error("cash session belongs to another cashier: {session_id}")]
    SessionOwnedByAnotherCashier {
        session_id: Uuid,
    },

    #[error("session out of balance: counted {counted}, computed {computed}, difference {difference}")]
    SessionOutOfBalance {
        counted: Money,
        computed: Money,
        difference: Money,
    },

    #[error("payment already classified: {payment_id}")]
    PaymentAlreadyClassified {
        payment_id: Uuid,
    },

    #[error("payment intent expired: {reference}")]
    IntentExpired {
        reference: String,
    },

    #[error("concurrent modification of loan {loan_id}, retries exhausted")]
    WriteConflict {
        loan_id: Uuid,
    },

    #[error("loan not found: {id}")]
    LoanNotFound {
        id: Uuid,
    },

    #[error("installment not found: {id}")]
    InstallmentNotFound {
        id: Uuid,
    },

    #[error("cash session not found: {id}")]
    SessionNotFound {
        id: Uuid,
    },

    #[error("payment not found: {id}")]
    PaymentNotFound {
        id: Uuid,
    },

    #[error("payment intent not found: {reference}")]
    IntentNotFound {
        reference: String,
    },

    #[error("calculation error: {message}")]
    CalculationError {
        message: String,
    },
}

/// error taxonomy: what the caller can do about it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// malformed or out-of-range input, correct and resubmit
    Validation,
    /// the ledger is in a state the request cannot apply to
    State,
    /// concurrent modification, transient
    Conflict,
    /// a referenced entity does not exist
    NotFound,
    /// internal accounting failure, nothing was persisted
    Internal,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        use LedgerError::*;
        match self {
            InvalidPrincipal { .. }
            | InvalidTermCount { .. }
            | InvalidInterestRate { .. }
            | InvalidPaymentAmount { .. }
            | NotCashMultiple { .. }
            | PaymentBelowMinimum { .. }
            | AmountExceedsMaximum { .. }
            | AdvanceAmountMismatch { .. }
            | EmptyInstallmentSelection
            | InvalidMovementAmount { .. }
            | InvalidConfiguration { .. } => ErrorKind::Validation,

            LoanFullyPaid { .. }
            | InstallmentOrderViolation { .. }
            | InstallmentAlreadyPaid { .. }
            | InstallmentNotInLoan { .. }
            | ClientAlreadyHasLoan { .. }
            | SessionAlreadyOpen { .. }
            | SessionClosed { .. }
            | SessionOwnedByAnotherCashier { .. }
            | SessionOutOfBalance { .. }
            | PaymentAlreadyClassified { .. }
            | IntentExpired { .. } => ErrorKind::State,

            WriteConflict { .. } => ErrorKind::Conflict,

            LoanNotFound { .. }
            | InstallmentNotFound { .. }
            | SessionNotFound { .. }
            | PaymentNotFound { .. }
            | IntentNotFound { .. } => ErrorKind::NotFound,

            CalculationError { .. } => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

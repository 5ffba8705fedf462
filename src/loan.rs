use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::schedule::ScheduledInstallment;
use crate::types::{
    ClientId, InstallmentId, LoanId, PaymentBreakdown, PaymentId, PaymentMethod, ReceiptState,
    SessionId,
};

/// a fixed-installment loan, immutable after creation except through payments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub client_id: ClientId,
    pub principal: Money,
    pub annual_rate: Rate,
    pub term_count: u32,
    pub start_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// one scheduled installment row; components are fixed at creation,
/// only the paid flag changes afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    pub loan_id: LoanId,
    pub installment_number: u32,
    pub due_date: DateTime<Utc>,
    pub installment_amount: Money,
    pub principal_amount: Money,
    pub interest_amount: Money,
    pub remaining_balance: Money,
    pub paid: bool,
}

impl Installment {
    pub fn from_schedule(loan_id: LoanId, row: &ScheduledInstallment) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            installment_number: row.installment_number,
            due_date: row.due_date,
            installment_amount: row.installment_amount,
            principal_amount: row.principal_amount,
            interest_amount: row.interest_amount,
            remaining_balance: row.remaining_balance,
            paid: false,
        }
    }
}

/// an accepted payment, created exactly once per request.
///
/// `installment_id` links the single installment the money landed on;
/// `None` for consolidated records spanning several installments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub loan_id: LoanId,
    pub installment_id: Option<InstallmentId>,
    pub amount: Money,
    pub method: PaymentMethod,
    pub breakdown: PaymentBreakdown,
    pub external_reference: Option<String>,
    pub cash_session_id: SessionId,
    pub receipt: ReceiptState,
    pub created_at: DateTime<Utc>,
}

/// the slice of one payment applied to one installment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentApplication {
    pub payment_id: PaymentId,
    pub installment_number: u32,
    pub principal: Money,
    pub interest: Money,
    pub late_fee: Money,
    pub paid_at: DateTime<Utc>,
}

/// a loan with its installments and payment history, versioned for
/// optimistic commits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanAccount {
    pub loan: Loan,
    pub installments: Vec<Installment>,
    pub payments: Vec<Payment>,
    pub applications: Vec<InstallmentApplication>,
    pub version: u64,
}

impl LoanAccount {
    pub fn new(loan: Loan, installments: Vec<Installment>) -> Self {
        Self {
            loan,
            installments,
            payments: Vec::new(),
            applications: Vec::new(),
            version: 0,
        }
    }

    pub fn installment_by_number(&self, number: u32) -> Result<&Installment> {
        self.installments
            .iter()
            .find(|i| i.installment_number == number)
            .ok_or(LedgerError::CalculationError {
                message: format!("installment {number} missing from account"),
            })
    }

    pub fn installment_by_id(&self, id: InstallmentId) -> Result<&Installment> {
        self.installments
            .iter()
            .find(|i| i.id == id)
            .ok_or(LedgerError::InstallmentNotInLoan { installment_id: id })
    }

    /// applications already recorded against one installment
    pub fn applications_for(&self, installment_number: u32) -> Vec<&InstallmentApplication> {
        self.applications
            .iter()
            .filter(|a| a.installment_number == installment_number)
            .collect()
    }

    /// idempotency: a payment already persisted under this reference
    pub fn payment_by_reference(&self, reference: &str) -> Option<&Payment> {
        self.payments
            .iter()
            .find(|p| p.external_reference.as_deref() == Some(reference))
    }

    /// time-windowed duplicate detection for cash payments
    pub fn recent_cash_duplicate(
        &self,
        installment_id: Option<InstallmentId>,
        amount: Money,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Option<&Payment> {
        self.payments.iter().rev().find(|p| {
            p.method == PaymentMethod::Cash
                && p.installment_id == installment_id
                && p.amount == amount
                && now - p.created_at <= window
        })
    }

}

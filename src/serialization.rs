/// serialization support for audit and export
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::loan::{LoanAccount, Payment};
use crate::session::{CashSession, SessionSummary};
use crate::types::{ClientId, InstallmentStatus, LoanId};

/// serializable view of a loan account's state
#[derive(Debug, Serialize, Deserialize)]
pub struct LoanView {
    pub id: LoanId,
    pub client_id: ClientId,
    pub principal: Money,
    pub annual_rate: Rate,
    pub term_count: u32,
    pub start_date: DateTime<Utc>,
    pub financial: FinancialView,
    pub installments: Vec<InstallmentStatus>,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinancialView {
    pub total_principal_paid: Money,
    pub total_interest_paid: Money,
    pub total_late_fees_paid: Money,
    pub total_collected: Money,
    pub pending_total: Money,
    pub installments_paid: usize,
}

impl LoanView {
    pub fn from_account(account: &LoanAccount, statuses: Vec<InstallmentStatus>) -> Self {
        let pending_total = statuses.iter().map(|s| s.pending_total).sum();
        LoanView {
            id: account.loan.id,
            client_id: account.loan.client_id,
            principal: account.loan.principal,
            annual_rate: account.loan.annual_rate,
            term_count: account.loan.term_count,
            start_date: account.loan.start_date,
            financial: FinancialView {
                total_principal_paid: account
                    .payments
                    .iter()
                    .map(|p| p.breakdown.principal_paid)
                    .sum(),
                total_interest_paid: account
                    .payments
                    .iter()
                    .map(|p| p.breakdown.interest_paid)
                    .sum(),
                total_late_fees_paid: account
                    .payments
                    .iter()
                    .map(|p| p.breakdown.late_fee_paid)
                    .sum(),
                total_collected: account.payments.iter().map(|p| p.amount).sum(),
                pending_total,
                installments_paid: account.installments.iter().filter(|i| i.paid).count(),
            },
            installments: statuses,
            payments: account.payments.clone(),
        }
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// serializable view of a cash session for end-of-shift reports
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub session: CashSession,
    pub summary: SessionSummary,
}

impl SessionView {
    pub fn from_session(session: &CashSession) -> Self {
        SessionView {
            summary: session.summary(),
            session: session.clone(),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

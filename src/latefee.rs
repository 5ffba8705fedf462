use chrono::{DateTime, Utc};

use crate::decimal::{Money, Rate};
use crate::loan::{Installment, InstallmentApplication};
use crate::types::InstallmentStatus;

/// late fee policy: a percentage of the installment amount, assessed once
/// the due date has passed.
///
/// Any payment made strictly after the due date cancels the fee for that
/// installment, it does not merely postpone it. The fee is recomputed from
/// the row and its payment history on every call, so there is no stored fee
/// state to fall out of sync.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct LateFeePolicy {
    pub fee_rate: Rate,
}

impl LateFeePolicy {
    pub fn new(fee_rate: Rate) -> Self {
        Self { fee_rate }
    }

    /// assess one installment against its payment history.
    ///
    /// Pure function of its inputs; safe to call repeatedly for display.
    /// `applications` must be the applications linked to this installment.
    pub fn assess(
        &self,
        installment: &Installment,
        applications: &[&InstallmentApplication],
        as_of: DateTime<Utc>,
    ) -> InstallmentStatus {
        let covered: Money = applications
            .iter()
            .map(|a| a.principal + a.interest)
            .sum();
        let remaining = (installment.installment_amount - covered).max(Money::ZERO);

        let overdue = as_of.date_naive() > installment.due_date.date_naive();
        let paid_after_due = applications
            .iter()
            .any(|a| a.paid_at.date_naive() > installment.due_date.date_naive());

        let late_fee = if overdue && !paid_after_due && remaining.is_positive() {
            installment.installment_amount.percentage(self.fee_rate)
        } else {
            Money::ZERO
        };

        InstallmentStatus {
            installment_number: installment.installment_number,
            has_late_fee: late_fee.is_positive(),
            late_fee_amount: late_fee,
            remaining_installment: remaining,
            pending_total: remaining + late_fee,
        }
    }
}

use crate::decimal::Money;
use crate::loan::{Installment, InstallmentApplication};

/// outstanding balances of one installment, split by component
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstallmentBalances {
    pub interest_due: Money,
    pub principal_due: Money,
    pub late_fee_due: Money,
}

impl InstallmentBalances {
    /// derive component balances from the row and its payment history.
    ///
    /// The late fee balance is whatever the accrual calculator currently
    /// quotes; it is not reconstructed from history because a post-due
    /// payment resets it.
    pub fn from_history(
        installment: &Installment,
        applications: &[&InstallmentApplication],
        late_fee_due: Money,
    ) -> Self {
        let interest_paid: Money = applications.iter().map(|a| a.interest).sum();
        let principal_paid: Money = applications.iter().map(|a| a.principal).sum();

        Self {
            interest_due: (installment.interest_amount - interest_paid).max(Money::ZERO),
            principal_due: (installment.principal_amount - principal_paid).max(Money::ZERO),
            late_fee_due,
        }
    }

    pub fn total(&self) -> Money {
        self.interest_due + self.principal_due + self.late_fee_due
    }
}

/// how one amount was split across an installment's components
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WaterfallSplit {
    pub to_interest: Money,
    pub to_principal: Money,
    pub to_late_fee: Money,
}

impl WaterfallSplit {
    pub fn total(&self) -> Money {
        self.to_interest + self.to_principal + self.to_late_fee
    }

    pub fn is_zero(&self) -> bool {
        self.total().is_zero()
    }
}

/// apply an amount to one installment: interest, then principal, then the
/// late fee only once both are fully covered. Returns the split and the
/// unapplied leftover.
pub fn apply(amount: Money, balances: &InstallmentBalances) -> (WaterfallSplit, Money) {
    let mut remaining = amount;
    let mut split = WaterfallSplit::default();

    split.to_interest = remaining.min(balances.interest_due);
    remaining -= split.to_interest;

    split.to_principal = remaining.min(balances.principal_due);
    remaining -= split.to_principal;

    split.to_late_fee = remaining.min(balances.late_fee_due);
    remaining -= split.to_late_fee;

    (split, remaining)
}

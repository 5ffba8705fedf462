use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;

/// unique identifier for a loan
pub type LoanId = Uuid;

/// unique identifier for an installment row
pub type InstallmentId = Uuid;

/// unique identifier for a payment
pub type PaymentId = Uuid;

/// unique identifier for a cash session
pub type SessionId = Uuid;

/// unique identifier for a cash movement
pub type MovementId = Uuid;

/// unique identifier for a client
pub type ClientId = Uuid;

/// unique identifier for a cashier
pub type CashierId = Uuid;

/// how a payment was collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    DigitalWallet,
    DebitCard,
    BankTransfer,
}

impl PaymentMethod {
    /// cash payments are rounded to 0.10 and move physical money
    pub fn is_cash(&self) -> bool {
        matches!(self, PaymentMethod::Cash)
    }
}

/// cash movement kind within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    /// money put into the drawer
    Inflow,
    /// money taken out of the drawer
    Outflow,
    /// change handed back to a payer
    ChangeGiven,
    /// a cash payment collected against a loan
    Collection,
}

impl MovementKind {
    /// whether this movement increases the drawer balance
    pub fn is_credit(&self) -> bool {
        matches!(self, MovementKind::Inflow | MovementKind::Collection)
    }
}

/// how a payment amount was distributed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PaymentBreakdown {
    pub principal_paid: Money,
    pub interest_paid: Money,
    pub late_fee_paid: Money,
    pub rounding_adjustment: Money,
}

impl PaymentBreakdown {
    /// the portion that reduced debt (everything but the rounding sliver)
    pub fn settled_portion(&self) -> Money {
        self.principal_paid + self.interest_paid + self.late_fee_paid
    }

    /// must equal the payment amount
    pub fn total(&self) -> Money {
        self.settled_portion() + self.rounding_adjustment
    }
}

/// read-only per-installment state used for display and allocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstallmentStatus {
    pub installment_number: u32,
    pub has_late_fee: bool,
    pub late_fee_amount: Money,
    pub remaining_installment: Money,
    pub pending_total: Money,
}

impl InstallmentStatus {
    /// settled within the given tolerance
    pub fn is_settled(&self, tolerance: Money) -> bool {
        self.pending_total <= tolerance
    }
}

/// receipt classification attached after settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptKind {
    FiscalReceipt,
    Invoice,
    InternalVoucher,
}

/// two-phase receipt state: payments settle unclassified, then a
/// classification is attached exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptState {
    SettledUnclassified,
    Classified(ReceiptKind),
}

impl ReceiptState {
    pub fn is_classified(&self) -> bool {
        matches!(self, ReceiptState::Classified(_))
    }
}

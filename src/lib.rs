pub mod allocation;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod intent;
pub mod latefee;
pub mod ledger;
pub mod loan;
pub mod rounding;
pub mod schedule;
pub mod serialization;
pub mod session;
pub mod store;
pub mod types;

// re-export key types
pub use allocation::{
    AdvanceQuote, AdvanceRequest, AllocationRequest, InstallmentBalances, WaterfallSplit,
};
pub use config::LedgerConfig;
pub use decimal::{Money, Rate};
pub use errors::{ErrorKind, LedgerError, Result};
pub use events::{Event, EventStore};
pub use intent::PaymentIntent;
pub use latefee::LateFeePolicy;
pub use ledger::{AllocationReceipt, LoanLedger};
pub use loan::{Installment, InstallmentApplication, Loan, LoanAccount, Payment};
pub use rounding::{is_cash_amount, max_cash_payable, round_to_cash};
pub use schedule::{generate_schedule, ScheduledInstallment};
pub use serialization::{LoanView, SessionView};
pub use session::{CashMovement, CashSession, SessionSummary};
pub use store::MemoryStore;
pub use types::{
    CashierId, ClientId, InstallmentId, InstallmentStatus, LoanId, MovementKind,
    PaymentBreakdown, PaymentId, PaymentMethod, ReceiptKind, ReceiptState, SessionId,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;

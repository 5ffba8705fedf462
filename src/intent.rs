use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{InstallmentId, LoanId, PaymentMethod};

/// a durable pending-payment record bridging a gateway callback to loan
/// context.
///
/// Registered before the payer is redirected to the gateway, consumed
/// exactly once when the callback lands. Keyed by the gateway reference and
/// carrying an expiry so stale intents cannot be replayed after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub reference: String,
    pub loan_id: LoanId,
    pub installment_id: Option<InstallmentId>,
    pub amount: Money,
    pub method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn new(
        reference: String,
        loan_id: LoanId,
        installment_id: Option<InstallmentId>,
        amount: Money,
        method: PaymentMethod,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            reference,
            loan_id,
            installment_id,
            amount,
            method,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

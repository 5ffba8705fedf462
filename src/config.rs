use chrono::Duration;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};

/// ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub late_fee: LateFeeConfig,
    pub tolerances: ToleranceConfig,
    pub payment_rules: PaymentRules,
    pub concurrency: ConcurrencyConfig,
}

/// late fee configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LateFeeConfig {
    /// percentage of the installment amount, assessed once past due
    pub fee_rate: Rate,
}

/// settlement and reconciliation tolerances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToleranceConfig {
    /// residue below which an installment counts as settled
    pub settle_tolerance: Money,
    /// allowed gap between a submitted advance amount and the quoted total
    pub advance_amount_tolerance: Money,
    /// allowed difference between counted and computed at session close
    pub session_close_tolerance: Money,
}

/// payment acceptance rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRules {
    /// floor for digital methods, waived when the payment clears the loan
    pub digital_minimum: Money,
    /// window in which an identical cash payment counts as a duplicate
    pub duplicate_window_minutes: i64,
    /// lifetime of a registered payment intent
    pub intent_ttl_minutes: i64,
}

/// optimistic concurrency settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// commit attempts per allocation before surfacing a conflict
    pub max_commit_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            late_fee: LateFeeConfig {
                fee_rate: Rate::from_percentage(1),
            },
            tolerances: ToleranceConfig {
                settle_tolerance: Money::from_decimal(dec!(0.05)),
                advance_amount_tolerance: Money::from_decimal(dec!(0.05)),
                session_close_tolerance: Money::from_decimal(dec!(0.01)),
            },
            payment_rules: PaymentRules {
                digital_minimum: Money::from_major(2),
                duplicate_window_minutes: 5,
                intent_ttl_minutes: 30,
            },
            concurrency: ConcurrencyConfig {
                max_commit_retries: 3,
            },
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.late_fee.fee_rate.is_negative() {
            return Err(LedgerError::InvalidConfiguration {
                message: format!("late fee rate must not be negative: {}", self.late_fee.fee_rate),
            });
        }
        if self.tolerances.settle_tolerance.is_negative()
            || self.tolerances.advance_amount_tolerance.is_negative()
            || self.tolerances.session_close_tolerance.is_negative()
        {
            return Err(LedgerError::InvalidConfiguration {
                message: "tolerances must not be negative".to_string(),
            });
        }
        if !self.payment_rules.digital_minimum.is_positive() {
            return Err(LedgerError::InvalidConfiguration {
                message: "digital minimum must be positive".to_string(),
            });
        }
        if self.payment_rules.duplicate_window_minutes < 0
            || self.payment_rules.intent_ttl_minutes <= 0
        {
            return Err(LedgerError::InvalidConfiguration {
                message: "duplicate window and intent ttl must not be negative".to_string(),
            });
        }
        if self.concurrency.max_commit_retries == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "at least one commit attempt is required".to_string(),
            });
        }
        Ok(())
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::minutes(self.payment_rules.duplicate_window_minutes)
    }

    pub fn intent_ttl(&self) -> Duration {
        Duration::minutes(self.payment_rules.intent_ttl_minutes)
    }
}

use rust_decimal::{Decimal, RoundingStrategy};

use crate::decimal::Money;

/// round to the nearest multiple of 0.10, half to even.
///
/// Remainders under 0.05 round down, over 0.05 round up, and a remainder of
/// exactly 0.05 is decided by the parity of the tenths digit (even keeps it,
/// odd rounds up). Applied only to cash-method payments; digital methods
/// settle on the exact amount.
pub fn round_to_cash(amount: Money) -> Money {
    Money::from_decimal(
        amount
            .as_decimal()
            .round_dp_with_strategy(1, RoundingStrategy::MidpointNearestEven),
    )
}

/// check that an amount is an exact multiple of 0.10.
///
/// Cash payments must arrive already settled on the 0.10 grid; anything else
/// is a validation error, not something the ledger silently adjusts.
pub fn is_cash_amount(amount: Money) -> bool {
    (amount.as_decimal() * Decimal::from(10)).fract().is_zero()
}

/// the largest cash amount acceptable against a pending total.
///
/// This is what the caller displays as "maximum payable" and what the
/// allocator validates submitted cash amounts against.
pub fn max_cash_payable(pending_total: Money) -> Money {
    round_to_cash(pending_total)
}

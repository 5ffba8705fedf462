use chrono::{DateTime, Duration, Timelike, Utc};
use rust_decimal::Decimal;

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};

/// days between consecutive due dates, regardless of calendar months
const DUE_DATE_STEP_DAYS: i64 = 30;

/// fixed time-of-day for due dates, keeps 30-day steps from drifting
/// across a day boundary
const DUE_DATE_HOUR: u32 = 12;

/// one row of a generated amortization schedule
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScheduledInstallment {
    pub installment_number: u32,
    pub due_date: DateTime<Utc>,
    pub installment_amount: Money,
    pub principal_amount: Money,
    pub interest_amount: Money,
    pub remaining_balance: Money,
}

/// generate a fixed-installment schedule.
///
/// Period rate is annual/12. The installment is the standard annuity amount
/// when the rate is positive, principal/term otherwise. Due dates step by
/// exactly 30 calendar days from the start date, normalized to noon UTC.
/// The post-pass folds any rounding residue into the last row's principal
/// and re-derives its installment amount, so the principal components sum
/// to the loan principal exactly and the final balance is zero.
pub fn generate_schedule(
    principal: Money,
    annual_rate: Rate,
    term_count: u32,
    start_date: DateTime<Utc>,
) -> Result<Vec<ScheduledInstallment>> {
    if !principal.is_positive() {
        return Err(LedgerError::InvalidPrincipal { principal });
    }
    if term_count == 0 {
        return Err(LedgerError::InvalidTermCount { term_count });
    }
    if annual_rate.is_negative() {
        return Err(LedgerError::InvalidInterestRate { rate: annual_rate });
    }

    let period_rate = annual_rate.monthly_rate().as_decimal();
    let installment = fixed_installment_amount(principal, period_rate, term_count);

    let mut rows = Vec::with_capacity(term_count as usize);
    let mut balance = principal;
    let mut due_date = normalize_due_date(start_date);

    for number in 1..=term_count {
        due_date = due_date + Duration::days(DUE_DATE_STEP_DAYS);

        let interest = Money::from_decimal(balance.as_decimal() * period_rate);
        let principal_portion = installment - interest;
        balance = balance - principal_portion;

        rows.push(ScheduledInstallment {
            installment_number: number,
            due_date,
            installment_amount: installment,
            principal_amount: principal_portion,
            interest_amount: interest,
            remaining_balance: balance.max(Money::ZERO),
        });
    }

    reconcile_last_row(principal, &mut rows);

    Ok(rows)
}

/// standard annuity amount: P * r * (1+r)^n / ((1+r)^n - 1)
fn fixed_installment_amount(principal: Money, period_rate: Decimal, term_count: u32) -> Money {
    if period_rate.is_zero() {
        return principal / Decimal::from(term_count);
    }

    let mut compound = Decimal::ONE;
    let base = Decimal::ONE + period_rate;
    for _ in 0..term_count {
        compound *= base;
    }

    let numerator = principal.as_decimal() * period_rate * compound;
    let denominator = compound - Decimal::ONE;

    Money::from_decimal(numerator / denominator)
}

/// force the final balance to zero by folding the residue into the last
/// row's principal, then re-derive its installment amount
fn reconcile_last_row(principal: Money, rows: &mut [ScheduledInstallment]) {
    let paid_before_last: Money = rows[..rows.len() - 1]
        .iter()
        .map(|row| row.principal_amount)
        .sum();

    if let Some(last) = rows.last_mut() {
        last.principal_amount = principal - paid_before_last;
        last.installment_amount = last.principal_amount + last.interest_amount;
        last.remaining_balance = Money::ZERO;
    }
}

fn normalize_due_date(date: DateTime<Utc>) -> DateTime<Utc> {
    date.with_hour(DUE_DATE_HOUR)
        .and_then(|d| d.with_minute(0))
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(date)
}

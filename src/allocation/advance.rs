use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::Event;
use crate::latefee::LateFeePolicy;
use crate::loan::{Installment, InstallmentApplication, LoanAccount, Payment};
use crate::rounding::{is_cash_amount, round_to_cash};
use crate::types::{
    CashierId, InstallmentId, InstallmentStatus, LoanId, PaymentBreakdown, PaymentMethod,
    ReceiptState, SessionId,
};

use super::waterfall::InstallmentBalances;
use super::{assess_account, waterfall, AllocationPlan, PlanOutcome};

/// request to settle several installments with one payment
#[derive(Debug, Clone)]
pub struct AdvanceRequest {
    pub loan_id: LoanId,
    pub installment_ids: Vec<InstallmentId>,
    pub amount: Money,
    pub method: PaymentMethod,
    pub cash_session_id: SessionId,
    pub cashier_id: CashierId,
    pub external_reference: Option<String>,
}

/// what an advance payment would cost, quoted without side effects
#[derive(Debug, Clone, PartialEq)]
pub struct AdvanceQuote {
    /// exact sum of the targeted pending totals
    pub total: Money,
    /// the figure a cash payer settles, rounded to 0.10
    pub cash_total: Money,
    pub lines: Vec<InstallmentStatus>,
}

/// compute the exact amount owed for a set of target installments.
///
/// Validates membership, unpaid state, and ordering (non-targeted
/// predecessors must be settled; targeted ones are exempt) but changes
/// nothing, so the caller can display the figure before charging.
pub fn quote_advance(
    account: &LoanAccount,
    config: &LedgerConfig,
    installment_ids: &[InstallmentId],
    now: DateTime<Utc>,
) -> Result<AdvanceQuote> {
    if installment_ids.is_empty() {
        return Err(LedgerError::EmptyInstallmentSelection);
    }

    let tolerance = config.tolerances.settle_tolerance;
    let policy = LateFeePolicy::new(config.late_fee.fee_rate);
    let rows = assess_account(account, &policy, now);

    let mut target_numbers: Vec<u32> = Vec::with_capacity(installment_ids.len());
    for id in installment_ids {
        let installment = account.installment_by_id(*id)?;
        if !target_numbers.contains(&installment.installment_number) {
            target_numbers.push(installment.installment_number);
        }
    }
    target_numbers.sort_unstable();

    let mut lines = Vec::with_capacity(target_numbers.len());
    for number in &target_numbers {
        let (installment, status) = rows
            .iter()
            .find(|(i, _)| i.installment_number == *number)
            .ok_or(LedgerError::CalculationError {
                message: format!("installment {number} missing from assessment"),
            })?;
        if installment.paid || status.is_settled(tolerance) {
            return Err(LedgerError::InstallmentAlreadyPaid {
                installment_number: *number,
            });
        }
        lines.push(*status);
    }

    // every non-targeted predecessor of the latest target must be settled
    let last_target = *target_numbers.last().unwrap_or(&0);
    if let Some((blocking, _)) = rows.iter().find(|(installment, status)| {
        installment.installment_number < last_target
            && !target_numbers.contains(&installment.installment_number)
            && !installment.paid
            && !status.is_settled(tolerance)
    }) {
        return Err(LedgerError::InstallmentOrderViolation {
            blocking_installment: blocking.installment_number,
        });
    }

    let total: Money = lines.iter().map(|s| s.pending_total).sum();

    Ok(AdvanceQuote {
        total,
        cash_total: round_to_cash(total),
        lines,
    })
}

/// plan an advance payment across the targeted installments.
///
/// The submitted amount must match the quoted total within tolerance; the
/// distribution repeats the per-installment waterfall in installment order
/// and folds any final remainder into the last installment's principal.
pub fn plan_advance(
    account: &LoanAccount,
    config: &LedgerConfig,
    request: &AdvanceRequest,
    now: DateTime<Utc>,
) -> Result<PlanOutcome> {
    if let Some(reference) = &request.external_reference {
        if let Some(existing) = account.payment_by_reference(reference) {
            return Ok(PlanOutcome::Duplicate(existing.clone()));
        }
    }

    let quote = quote_advance(account, config, &request.installment_ids, now)?;

    if !request.amount.is_positive() {
        return Err(LedgerError::InvalidPaymentAmount {
            amount: request.amount,
        });
    }
    if request.method.is_cash() && !is_cash_amount(request.amount) {
        return Err(LedgerError::NotCashMultiple {
            amount: request.amount,
        });
    }

    let required = if request.method.is_cash() {
        quote.cash_total
    } else {
        quote.total
    };
    if (request.amount - required).abs() > config.tolerances.advance_amount_tolerance {
        return Err(LedgerError::AdvanceAmountMismatch {
            required,
            provided: request.amount,
        });
    }

    let tolerance = config.tolerances.settle_tolerance;
    let payment_id = Uuid::new_v4();
    let mut remaining = request.amount;
    let mut applications: Vec<InstallmentApplication> = Vec::new();
    let mut settled: Vec<u32> = Vec::new();
    let mut walk_events: Vec<Event> = Vec::new();

    for status in &quote.lines {
        let installment = account.installment_by_number(status.installment_number)?;
        let history = account.applications_for(installment.installment_number);
        let balances =
            InstallmentBalances::from_history(installment, &history, status.late_fee_amount);
        let (split, leftover) = waterfall::apply(remaining, &balances);

        applications.push(InstallmentApplication {
            payment_id,
            installment_number: installment.installment_number,
            principal: split.to_principal,
            interest: split.to_interest,
            late_fee: split.to_late_fee,
            paid_at: now,
        });

        if split.to_late_fee.is_positive() {
            walk_events.push(Event::LateFeeCollected {
                loan_id: account.loan.id,
                installment_number: installment.installment_number,
                amount: split.to_late_fee,
                timestamp: now,
            });
        }
        let fee_residue = balances.late_fee_due - split.to_late_fee;
        if fee_residue.is_positive() {
            walk_events.push(Event::LateFeeWaived {
                loan_id: account.loan.id,
                installment_number: installment.installment_number,
                amount: fee_residue,
                timestamp: now,
            });
        }

        let remaining_after = (balances.interest_due - split.to_interest)
            + (balances.principal_due - split.to_principal);
        if remaining_after <= tolerance {
            settled.push(installment.installment_number);
            walk_events.push(Event::InstallmentSettled {
                loan_id: account.loan.id,
                installment_number: installment.installment_number,
                timestamp: now,
            });
        }

        remaining = leftover;
    }

    // fold the rounding remainder into the last installment's principal
    if remaining.is_positive() {
        if let Some(last) = applications.last_mut() {
            last.principal += remaining;
            remaining = Money::ZERO;
        }
    }
    debug_assert!(remaining.is_zero());

    let breakdown = PaymentBreakdown {
        principal_paid: applications.iter().map(|a| a.principal).sum(),
        interest_paid: applications.iter().map(|a| a.interest).sum(),
        late_fee_paid: applications.iter().map(|a| a.late_fee).sum(),
        rounding_adjustment: Money::ZERO,
    };
    if breakdown.total() != request.amount {
        return Err(LedgerError::CalculationError {
            message: format!(
                "advance allocation does not account for the full amount: {} != {}",
                breakdown.total(),
                request.amount
            ),
        });
    }

    // consolidated record: direct link only when a single installment
    // was targeted
    let installment_id = match applications.as_slice() {
        [single] => Some(
            account
                .installment_by_number(single.installment_number)?
                .id,
        ),
        _ => None,
    };

    let payment = Payment {
        id: payment_id,
        loan_id: account.loan.id,
        installment_id,
        amount: request.amount,
        method: request.method,
        breakdown,
        external_reference: request.external_reference.clone(),
        cash_session_id: request.cash_session_id,
        receipt: ReceiptState::SettledUnclassified,
        created_at: now,
    };

    let policy = LateFeePolicy::new(config.late_fee.fee_rate);
    let rows = assess_account(account, &policy, now);
    let loan_settled = rows.iter().all(|(installment, status)| {
        installment.paid
            || status.is_settled(tolerance)
            || settled.contains(&installment.installment_number)
    });

    let mut events = vec![Event::AdvancePaymentAllocated {
        payment_id,
        loan_id: account.loan.id,
        installment_numbers: quote.lines.iter().map(|s| s.installment_number).collect(),
        amount: request.amount,
        timestamp: now,
    }];
    events.extend(walk_events);
    if loan_settled {
        events.push(Event::LoanSettled {
            loan_id: account.loan.id,
            timestamp: now,
        });
    }

    Ok(PlanOutcome::New(AllocationPlan {
        payment,
        applications,
        settled_installments: settled,
        loan_settled,
        events,
    }))
}

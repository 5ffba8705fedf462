pub mod advance;
pub mod waterfall;

use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::Event;
use crate::latefee::LateFeePolicy;
use crate::loan::{Installment, InstallmentApplication, LoanAccount, Payment};
use crate::rounding::{is_cash_amount, max_cash_payable};
use crate::types::{
    CashierId, InstallmentId, InstallmentStatus, LoanId, PaymentBreakdown, PaymentMethod,
    ReceiptState, SessionId,
};

pub use advance::{plan_advance, quote_advance, AdvanceQuote, AdvanceRequest};
pub use waterfall::{InstallmentBalances, WaterfallSplit};

/// request to allocate one payment against a loan
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub loan_id: LoanId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub cash_session_id: SessionId,
    pub cashier_id: CashierId,
    pub installment_id: Option<InstallmentId>,
    pub external_reference: Option<String>,
}

/// everything a successful allocation persists, committed all-or-nothing
#[derive(Debug, Clone)]
pub struct AllocationPlan {
    pub payment: Payment,
    pub applications: Vec<InstallmentApplication>,
    pub settled_installments: Vec<u32>,
    pub loan_settled: bool,
    pub events: Vec<Event>,
}

/// planning outcome: a new payment, or an already-persisted one when the
/// request is a duplicate
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    New(AllocationPlan),
    Duplicate(Payment),
}

/// assess every installment of the account, ordered by number
pub(crate) fn assess_account(
    account: &LoanAccount,
    policy: &LateFeePolicy,
    as_of: DateTime<Utc>,
) -> Vec<(Installment, InstallmentStatus)> {
    let mut rows: Vec<Installment> = account.installments.clone();
    rows.sort_by_key(|i| i.installment_number);
    rows.into_iter()
        .map(|installment| {
            let history = account.applications_for(installment.installment_number);
            let status = policy.assess(&installment, &history, as_of);
            (installment, status)
        })
        .collect()
}

/// plan a single payment allocation against a snapshot of the loan.
///
/// Pure with respect to the account: the returned plan is what the store
/// commits atomically, and nothing here mutates anything.
pub fn plan_allocation(
    account: &LoanAccount,
    config: &LedgerConfig,
    request: &AllocationRequest,
    now: DateTime<Utc>,
) -> Result<PlanOutcome> {
    // idempotency on the gateway reference
    if let Some(reference) = &request.external_reference {
        if let Some(existing) = account.payment_by_reference(reference) {
            return Ok(PlanOutcome::Duplicate(existing.clone()));
        }
    }
    // time-windowed duplicate for resubmitted cash payments
    if request.method.is_cash() {
        if let Some(existing) = account.recent_cash_duplicate(
            request.installment_id,
            request.amount,
            now,
            config.duplicate_window(),
        ) {
            return Ok(PlanOutcome::Duplicate(existing.clone()));
        }
    }

    let tolerance = config.tolerances.settle_tolerance;
    let policy = LateFeePolicy::new(config.late_fee.fee_rate);
    let rows = assess_account(account, &policy, now);

    let open: Vec<&(Installment, InstallmentStatus)> = rows
        .iter()
        .filter(|(installment, status)| !installment.paid && !status.is_settled(tolerance))
        .collect();

    if open.is_empty() {
        return Err(LedgerError::LoanFullyPaid {
            loan_id: account.loan.id,
        });
    }

    // installment-order precedence for targeted payments; a targeted
    // payment is capped at its installment, an untargeted one walks the
    // whole loan oldest-first
    let walk: Vec<&(Installment, InstallmentStatus)> = if let Some(target_id) =
        request.installment_id
    {
        let target = account.installment_by_id(target_id)?;
        let target_open = open
            .iter()
            .find(|(i, _)| i.installment_number == target.installment_number);
        let target_open = match target_open {
            Some(entry) => *entry,
            None => {
                return Err(LedgerError::InstallmentAlreadyPaid {
                    installment_number: target.installment_number,
                })
            }
        };
        if let Some((blocking, _)) = open
            .iter()
            .find(|(i, _)| i.installment_number < target.installment_number)
        {
            return Err(LedgerError::InstallmentOrderViolation {
                blocking_installment: blocking.installment_number,
            });
        }
        vec![target_open]
    } else {
        open.clone()
    };

    validate_amount(config, request, &walk)?;

    let payment_id = Uuid::new_v4();
    let mut remaining = request.amount;
    let mut applications: Vec<InstallmentApplication> = Vec::new();
    let mut settled: Vec<u32> = Vec::new();
    let mut walk_events: Vec<Event> = Vec::new();

    for (installment, status) in &walk {
        if remaining.is_zero() {
            break;
        }

        let history = account.applications_for(installment.installment_number);
        let balances =
            InstallmentBalances::from_history(installment, &history, status.late_fee_amount);
        let (split, leftover) = waterfall::apply(remaining, &balances);
        if split.is_zero() {
            break;
        }

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

        // a payment landing past the due date cancels whatever fee residue
        // it did not cover
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

    // the only legitimate leftover is the sub-0.05 sliver a cash-rounded
    // amount can exceed the exact debt by
    let rounding_adjustment = remaining;
    if rounding_adjustment >= Money::from_decimal(dec!(0.10)) {
        return Err(LedgerError::CalculationError {
            message: format!("unallocated remainder {rounding_adjustment} exceeds rounding bounds"),
        });
    }

    let breakdown = PaymentBreakdown {
        principal_paid: applications.iter().map(|a| a.principal).sum(),
        interest_paid: applications.iter().map(|a| a.interest).sum(),
        late_fee_paid: applications.iter().map(|a| a.late_fee).sum(),
        rounding_adjustment,
    };
    if breakdown.total() != request.amount {
        return Err(LedgerError::CalculationError {
            message: format!(
                "allocation does not account for the full amount: {} != {}",
                breakdown.total(),
                request.amount
            ),
        });
    }

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

    let loan_settled = rows.iter().all(|(installment, status)| {
        installment.paid
            || status.is_settled(tolerance)
            || settled.contains(&installment.installment_number)
    });

    let mut events = vec![Event::PaymentAllocated {
        payment_id,
        loan_id: account.loan.id,
        installment_id,
        amount: request.amount,
        method: request.method,
        applied_to_principal: payment.breakdown.principal_paid,
        applied_to_interest: payment.breakdown.interest_paid,
        applied_to_late_fee: payment.breakdown.late_fee_paid,
        rounding_adjustment,
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

fn validate_amount(
    config: &LedgerConfig,
    request: &AllocationRequest,
    walk: &[&(Installment, InstallmentStatus)],
) -> Result<()> {
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

    let total_pending: Money = walk.iter().map(|(_, s)| s.pending_total).sum();
    let maximum = if request.method.is_cash() {
        max_cash_payable(total_pending)
    } else {
        total_pending
    };

    // the digital floor is waived when the payment clears the whole debt
    if !request.method.is_cash()
        && request.amount < config.payment_rules.digital_minimum
        && request.amount < maximum
    {
        return Err(LedgerError::PaymentBelowMinimum {
            minimum: config.payment_rules.digital_minimum,
            provided: request.amount,
        });
    }

    if request.amount > maximum {
        return Err(LedgerError::AmountExceedsMaximum {
            maximum,
            requested: request.amount,
        });
    }

    Ok(())
}

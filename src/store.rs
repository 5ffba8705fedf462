use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};

use crate::allocation::AllocationPlan;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::intent::PaymentIntent;
use crate::loan::{Installment, Loan, LoanAccount, Payment};
use crate::session::{CashMovement, CashSession};
use crate::types::{
    CashierId, ClientId, LoanId, MovementKind, PaymentId, ReceiptKind, ReceiptState, SessionId,
};

/// in-memory reference store.
///
/// Constructed once per process and handed to the ledger as an explicit
/// dependency; there is no global state. Loan accounts are versioned:
/// allocation reads a snapshot, plans against it, and commits with a
/// compare-and-swap on the version, so two concurrent payments can never
/// both spend the same pending balance. Session open/close serialize
/// through the session table's lock.
#[derive(Default)]
pub struct MemoryStore {
    loans: RwLock<HashMap<LoanId, Arc<Mutex<LoanAccount>>>>,
    client_index: Mutex<HashMap<ClientId, LoanId>>,
    sessions: Mutex<SessionTable>,
    intents: Mutex<HashMap<String, PaymentIntent>>,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SessionId, CashSession>,
    open_by_cashier: HashMap<CashierId, SessionId>,
}

/// a poisoned lock only means another thread panicked mid-operation;
/// every mutation here is checks-then-writes, so the data stays coherent
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- loans ---

    /// persist a loan with its installment rows, one loan per client
    pub fn insert_loan(&self, loan: Loan, installments: Vec<Installment>) -> Result<()> {
        let mut index = lock(&self.client_index);
        if index.contains_key(&loan.client_id) {
            return Err(LedgerError::ClientAlreadyHasLoan {
                client_id: loan.client_id,
            });
        }

        let loan_id = loan.id;
        let client_id = loan.client_id;
        let account = LoanAccount::new(loan, installments);

        let mut loans = self
            .loans
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loans.insert(loan_id, Arc::new(Mutex::new(account)));
        index.insert(client_id, loan_id);
        Ok(())
    }

    fn account_entry(&self, loan_id: LoanId) -> Result<Arc<Mutex<LoanAccount>>> {
        let loans = self
            .loans
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loans
            .get(&loan_id)
            .cloned()
            .ok_or(LedgerError::LoanNotFound { id: loan_id })
    }

    /// versioned snapshot of a loan account
    pub fn read_account(&self, loan_id: LoanId) -> Result<LoanAccount> {
        let entry = self.account_entry(loan_id)?;
        let account = lock(&entry);
        Ok(account.clone())
    }

    /// commit an allocation plan against the snapshot it was planned from.
    ///
    /// Fails with a write conflict when the account moved on since the
    /// snapshot; the caller re-reads and re-plans. The session append is
    /// part of the same critical section, so the payment, its applications,
    /// the paid flags and the cash effect land all-or-nothing.
    pub fn commit_allocation(
        &self,
        expected_version: u64,
        cashier_id: CashierId,
        plan: &AllocationPlan,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let entry = self.account_entry(plan.payment.loan_id)?;
        let mut account = lock(&entry);

        if account.version != expected_version {
            return Err(LedgerError::WriteConflict {
                loan_id: plan.payment.loan_id,
            });
        }

        let mut table = lock(&self.sessions);
        let session = table
            .sessions
            .get_mut(&plan.payment.cash_session_id)
            .ok_or(LedgerError::SessionNotFound {
                id: plan.payment.cash_session_id,
            })?;
        session.ensure_open()?;
        session.ensure_owned_by(cashier_id)?;

        // checks done, now mutate
        account.payments.push(plan.payment.clone());
        account.applications.extend(plan.applications.iter().cloned());
        for number in &plan.settled_installments {
            if let Some(installment) = account
                .installments
                .iter_mut()
                .find(|i| i.installment_number == *number)
            {
                installment.paid = true;
            }
        }
        account.version += 1;

        session.record_payment(
            plan.payment.id,
            plan.payment.method,
            plan.payment.amount,
            now,
        )?;
        Ok(())
    }

    /// attach a receipt classification to a settled payment, exactly once.
    ///
    /// Classification is outside the monetary invariant, so it edits the
    /// payment in place without bumping the account version.
    pub fn classify_payment(
        &self,
        loan_id: LoanId,
        payment_id: PaymentId,
        kind: ReceiptKind,
    ) -> Result<Payment> {
        let entry = self.account_entry(loan_id)?;
        let mut account = lock(&entry);
        let payment = account
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id)
            .ok_or(LedgerError::PaymentNotFound { id: payment_id })?;
        if payment.receipt.is_classified() {
            return Err(LedgerError::PaymentAlreadyClassified { payment_id });
        }
        payment.receipt = ReceiptState::Classified(kind);
        Ok(payment.clone())
    }

    // --- cash sessions ---

    /// open a session; a cashier can hold only one open session at a time
    pub fn open_session(
        &self,
        cashier_id: CashierId,
        opening_balance: Money,
        now: DateTime<Utc>,
    ) -> Result<CashSession> {
        let mut table = lock(&self.sessions);
        if let Some(existing) = table.open_by_cashier.get(&cashier_id) {
            // a stale index entry for an already-closed session is cleaned up
            let still_open = table
                .sessions
                .get(existing)
                .map(|s| !s.closed)
                .unwrap_or(false);
            if still_open {
                return Err(LedgerError::SessionAlreadyOpen { cashier_id });
            }
        }

        let session = CashSession::open(cashier_id, opening_balance, now)?;
        table.open_by_cashier.insert(cashier_id, session.id);
        table.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    /// close a session against the physically counted amount
    pub fn close_session(
        &self,
        session_id: SessionId,
        cashier_id: CashierId,
        counted_balance: Money,
        tolerance: Money,
        now: DateTime<Utc>,
    ) -> Result<CashSession> {
        let mut table = lock(&self.sessions);
        let session = table
            .sessions
            .get_mut(&session_id)
            .ok_or(LedgerError::SessionNotFound { id: session_id })?;
        session.ensure_owned_by(cashier_id)?;
        session.close(counted_balance, tolerance, now)?;
        let closed = session.clone();
        table.open_by_cashier.remove(&cashier_id);
        Ok(closed)
    }

    pub fn record_movement(
        &self,
        session_id: SessionId,
        cashier_id: CashierId,
        kind: MovementKind,
        amount: Money,
        payment_id: Option<PaymentId>,
        description: String,
        now: DateTime<Utc>,
    ) -> Result<CashMovement> {
        let mut table = lock(&self.sessions);
        let session = table
            .sessions
            .get_mut(&session_id)
            .ok_or(LedgerError::SessionNotFound { id: session_id })?;
        session.ensure_owned_by(cashier_id)?;
        session.record_movement(kind, amount, payment_id, description, now)
    }

    pub fn read_session(&self, session_id: SessionId) -> Result<CashSession> {
        let table = lock(&self.sessions);
        table
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or(LedgerError::SessionNotFound { id: session_id })
    }

    /// validate a session is present, open and owned by the cashier
    pub fn ensure_session_usable(
        &self,
        session_id: SessionId,
        cashier_id: CashierId,
    ) -> Result<()> {
        let table = lock(&self.sessions);
        let session = table
            .sessions
            .get(&session_id)
            .ok_or(LedgerError::SessionNotFound { id: session_id })?;
        session.ensure_open()?;
        session.ensure_owned_by(cashier_id)
    }

    // --- payment intents ---

    /// register a pending intent, replacing any earlier record under the
    /// same reference
    pub fn put_intent(&self, intent: PaymentIntent) {
        let mut intents = lock(&self.intents);
        intents.insert(intent.reference.clone(), intent);
    }

    /// consume an intent exactly once; expired intents are discarded
    pub fn take_intent(&self, reference: &str, now: DateTime<Utc>) -> Result<PaymentIntent> {
        let mut intents = lock(&self.intents);
        let intent = intents
            .remove(reference)
            .ok_or_else(|| LedgerError::IntentNotFound {
                reference: reference.to_string(),
            })?;
        if intent.is_expired(now) {
            return Err(LedgerError::IntentExpired {
                reference: reference.to_string(),
            });
        }
        Ok(intent)
    }
}

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use uuid::Uuid;

use crate::allocation::{
    plan_advance, plan_allocation, quote_advance, AdvanceQuote, AdvanceRequest,
    AllocationRequest, PlanOutcome,
};
use crate::config::LedgerConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::intent::PaymentIntent;
use crate::latefee::LateFeePolicy;
use crate::loan::{Installment, InstallmentApplication, Loan, LoanAccount, Payment};
use crate::schedule::{generate_schedule, ScheduledInstallment};
use crate::session::{CashMovement, CashSession, SessionSummary};
use crate::store::MemoryStore;
use crate::types::{
    CashierId, ClientId, InstallmentId, InstallmentStatus, LoanId, MovementKind, PaymentId,
    PaymentMethod, ReceiptKind, SessionId,
};

/// what an accepted allocation hands back to the caller
#[derive(Debug, Clone)]
pub struct AllocationReceipt {
    pub payment: Payment,
    pub applications: Vec<InstallmentApplication>,
    pub settled_installments: Vec<u32>,
    pub loan_settled: bool,
    /// the request matched an already-persisted payment
    pub deduplicated: bool,
}

/// the loan ledger facade: schedule generation, payment allocation and
/// cash session bookkeeping over an injected store handle.
///
/// All operations take the time provider by reference so callers control
/// the clock; nothing here reads system time directly.
pub struct LoanLedger {
    store: Arc<MemoryStore>,
    config: LedgerConfig,
    events: Mutex<EventStore>,
}

impl LoanLedger {
    pub fn new(store: Arc<MemoryStore>, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            events: Mutex::new(EventStore::new()),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// generate a schedule without persisting anything
    pub fn generate_schedule(
        principal: Money,
        annual_rate: Rate,
        term_count: u32,
        start_date: DateTime<Utc>,
    ) -> Result<Vec<ScheduledInstallment>> {
        generate_schedule(principal, annual_rate, term_count, start_date)
    }

    /// create a loan with its installment rows, one loan per client
    pub fn create_loan(
        &self,
        client_id: ClientId,
        principal: Money,
        annual_rate: Rate,
        term_count: u32,
        start_date: DateTime<Utc>,
        time: &SafeTimeProvider,
    ) -> Result<Loan> {
        let rows = generate_schedule(principal, annual_rate, term_count, start_date)?;
        let now = time.now();
        let loan = Loan {
            id: Uuid::new_v4(),
            client_id,
            principal,
            annual_rate,
            term_count,
            start_date,
            created_at: now,
        };
        let installments: Vec<Installment> = rows
            .iter()
            .map(|row| Installment::from_schedule(loan.id, row))
            .collect();

        self.store.insert_loan(loan.clone(), installments)?;
        self.emit(Event::LoanCreated {
            loan_id: loan.id,
            client_id,
            principal,
            term_count,
            timestamp: now,
        });
        Ok(loan)
    }

    /// snapshot of a loan with its full payment history
    pub fn loan_account(&self, loan_id: LoanId) -> Result<LoanAccount> {
        self.store.read_account(loan_id)
    }

    /// read-only per-installment status view
    pub fn installment_statuses(
        &self,
        loan_id: LoanId,
        time: &SafeTimeProvider,
    ) -> Result<Vec<InstallmentStatus>> {
        let account = self.store.read_account(loan_id)?;
        let policy = LateFeePolicy::new(self.config.late_fee.fee_rate);
        Ok(
            crate::allocation::assess_account(&account, &policy, time.now())
                .into_iter()
                .map(|(_, status)| status)
                .collect(),
        )
    }

    /// allocate one payment, retrying internally on write conflicts
    pub fn allocate_payment(
        &self,
        request: AllocationRequest,
        time: &SafeTimeProvider,
    ) -> Result<AllocationReceipt> {
        self.store
            .ensure_session_usable(request.cash_session_id, request.cashier_id)?;

        let mut attempts = 0;
        loop {
            let account = self.store.read_account(request.loan_id)?;
            let now = time.now();

            match plan_allocation(&account, &self.config, &request, now)? {
                PlanOutcome::Duplicate(payment) => {
                    return Ok(self.duplicate_receipt(payment, now));
                }
                PlanOutcome::New(plan) => {
                    match self.store.commit_allocation(
                        account.version,
                        request.cashier_id,
                        &plan,
                        now,
                    ) {
                        Ok(()) => {
                            self.emit_all(plan.events.clone());
                            return Ok(AllocationReceipt {
                                payment: plan.payment,
                                applications: plan.applications,
                                settled_installments: plan.settled_installments,
                                loan_settled: plan.loan_settled,
                                deduplicated: false,
                            });
                        }
                        Err(LedgerError::WriteConflict { .. })
                            if attempts + 1 < self.config.concurrency.max_commit_retries =>
                        {
                            attempts += 1;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    /// quote the exact amount owed for a set of installments, side-effect
    /// free, for the caller to display before charging
    pub fn quote_advance_payment(
        &self,
        loan_id: LoanId,
        installment_ids: &[InstallmentId],
        cash_session_id: SessionId,
        cashier_id: CashierId,
        time: &SafeTimeProvider,
    ) -> Result<AdvanceQuote> {
        self.store
            .ensure_session_usable(cash_session_id, cashier_id)?;
        let account = self.store.read_account(loan_id)?;
        quote_advance(&account, &self.config, installment_ids, time.now())
    }

    /// settle several installments with one consolidated payment
    pub fn allocate_advance_payment(
        &self,
        request: AdvanceRequest,
        time: &SafeTimeProvider,
    ) -> Result<AllocationReceipt> {
        self.store
            .ensure_session_usable(request.cash_session_id, request.cashier_id)?;

        let mut attempts = 0;
        loop {
            let account = self.store.read_account(request.loan_id)?;
            let now = time.now();

            match plan_advance(&account, &self.config, &request, now)? {
                PlanOutcome::Duplicate(payment) => {
                    return Ok(self.duplicate_receipt(payment, now));
                }
                PlanOutcome::New(plan) => {
                    match self.store.commit_allocation(
                        account.version,
                        request.cashier_id,
                        &plan,
                        now,
                    ) {
                        Ok(()) => {
                            self.emit_all(plan.events.clone());
                            return Ok(AllocationReceipt {
                                payment: plan.payment,
                                applications: plan.applications,
                                settled_installments: plan.settled_installments,
                                loan_settled: plan.loan_settled,
                                deduplicated: false,
                            });
                        }
                        Err(LedgerError::WriteConflict { .. })
                            if attempts + 1 < self.config.concurrency.max_commit_retries =>
                        {
                            attempts += 1;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    // --- cash sessions ---

    pub fn open_session(
        &self,
        cashier_id: CashierId,
        opening_balance: Money,
        time: &SafeTimeProvider,
    ) -> Result<CashSession> {
        let now = time.now();
        let session = self.store.open_session(cashier_id, opening_balance, now)?;
        self.emit(Event::SessionOpened {
            session_id: session.id,
            cashier_id,
            opening_balance,
            timestamp: now,
        });
        Ok(session)
    }

    pub fn close_session(
        &self,
        session_id: SessionId,
        cashier_id: CashierId,
        counted_balance: Money,
        time: &SafeTimeProvider,
    ) -> Result<CashSession> {
        let now = time.now();
        let session = self.store.close_session(
            session_id,
            cashier_id,
            counted_balance,
            self.config.tolerances.session_close_tolerance,
            now,
        )?;
        self.emit(Event::SessionClosed {
            session_id,
            counted_balance,
            computed_balance: session.computed_balance(),
            difference: session.difference.unwrap_or(Money::ZERO),
            timestamp: now,
        });
        Ok(session)
    }

    pub fn record_movement(
        &self,
        session_id: SessionId,
        cashier_id: CashierId,
        kind: MovementKind,
        amount: Money,
        description: String,
        time: &SafeTimeProvider,
    ) -> Result<CashMovement> {
        let now = time.now();
        let movement = self.store.record_movement(
            session_id, cashier_id, kind, amount, None, description, now,
        )?;
        self.emit(Event::MovementRecorded {
            session_id,
            movement_id: movement.id,
            kind,
            amount,
            timestamp: now,
        });
        Ok(movement)
    }

    pub fn session_balance(&self, session_id: SessionId) -> Result<Money> {
        Ok(self.store.read_session(session_id)?.computed_balance())
    }

    pub fn session_summary(&self, session_id: SessionId) -> Result<SessionSummary> {
        Ok(self.store.read_session(session_id)?.summary())
    }

    // --- gateway intents ---

    /// register a pending intent before redirecting the payer to the
    /// gateway; replaces the source lineage's in-memory callback cache
    pub fn register_payment_intent(
        &self,
        reference: String,
        loan_id: LoanId,
        installment_id: Option<InstallmentId>,
        amount: Money,
        method: PaymentMethod,
        time: &SafeTimeProvider,
    ) -> Result<PaymentIntent> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidPaymentAmount { amount });
        }
        let account = self.store.read_account(loan_id)?;
        if let Some(id) = installment_id {
            account.installment_by_id(id)?;
        }

        let intent = PaymentIntent::new(
            reference,
            loan_id,
            installment_id,
            amount,
            method,
            time.now(),
            self.config.intent_ttl(),
        );
        self.store.put_intent(intent.clone());
        Ok(intent)
    }

    /// consume a registered intent and allocate the payment it describes.
    ///
    /// The gateway reference doubles as the idempotency key. A failed
    /// allocation puts the intent back so the callback can be retried.
    pub fn allocate_from_intent(
        &self,
        reference: &str,
        cash_session_id: SessionId,
        cashier_id: CashierId,
        time: &SafeTimeProvider,
    ) -> Result<AllocationReceipt> {
        let intent = self.store.take_intent(reference, time.now())?;
        let request = AllocationRequest {
            loan_id: intent.loan_id,
            amount: intent.amount,
            method: intent.method,
            cash_session_id,
            cashier_id,
            installment_id: intent.installment_id,
            external_reference: Some(intent.reference.clone()),
        };

        match self.allocate_payment(request, time) {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                self.store.put_intent(intent);
                Err(err)
            }
        }
    }

    /// attach a receipt classification to a settled payment
    pub fn classify_payment(
        &self,
        loan_id: LoanId,
        payment_id: PaymentId,
        kind: ReceiptKind,
    ) -> Result<Payment> {
        self.store.classify_payment(loan_id, payment_id, kind)
    }

    /// take the events collected since the last drain
    pub fn drain_events(&self) -> Vec<Event> {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        events.take_events()
    }

    fn duplicate_receipt(&self, payment: Payment, now: DateTime<Utc>) -> AllocationReceipt {
        self.emit(Event::DuplicatePaymentShortCircuited {
            payment_id: payment.id,
            loan_id: payment.loan_id,
            timestamp: now,
        });
        AllocationReceipt {
            payment,
            applications: Vec::new(),
            settled_installments: Vec::new(),
            loan_settled: false,
            deduplicated: true,
        }
    }

    fn emit(&self, event: Event) {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        events.emit(event);
    }

    fn emit_all(&self, batch: Vec<Event>) {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        events.extend(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;

    fn money(s: &str) -> Money {
        Money::from_str_exact(s).unwrap()
    }

    fn ledger() -> LoanLedger {
        LoanLedger::new(Arc::new(MemoryStore::new()), LedgerConfig::default()).unwrap()
    }

    fn test_time() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap(),
        ))
    }

    fn setup(
        ledger: &LoanLedger,
        time: &SafeTimeProvider,
    ) -> (Loan, CashSession, CashierId) {
        let cashier_id = Uuid::new_v4();
        let loan = ledger
            .create_loan(
                Uuid::new_v4(),
                Money::from_major(1000),
                Rate::from_decimal(dec!(0.24)),
                3,
                time.now(),
                time,
            )
            .unwrap();
        let session = ledger
            .open_session(cashier_id, money("200.00"), time)
            .unwrap();
        (loan, session, cashier_id)
    }

    fn cash_request(
        loan: &Loan,
        session: &CashSession,
        cashier_id: CashierId,
        amount: &str,
    ) -> AllocationRequest {
        AllocationRequest {
            loan_id: loan.id,
            amount: money(amount),
            method: PaymentMethod::Cash,
            cash_session_id: session.id,
            cashier_id,
            installment_id: None,
            external_reference: None,
        }
    }

    #[test]
    fn test_full_cycle_pay_and_close() {
        let ledger = ledger();
        let time = test_time();
        let (loan, session, cashier_id) = setup(&ledger, &time);

        // target the first installment: its pending is 346.75, the cash
        // figure 346.80 carries a 0.05 rounding sliver
        let account = ledger.loan_account(loan.id).unwrap();
        let mut request = cash_request(&loan, &session, cashier_id, "346.80");
        request.installment_id = Some(account.installment_by_number(1).unwrap().id);
        let receipt = ledger.allocate_payment(request, &time).unwrap();
        assert_eq!(receipt.settled_installments, vec![1]);
        assert_eq!(
            receipt.payment.breakdown.rounding_adjustment,
            money("0.05")
        );

        // the cash landed in the drawer
        assert_eq!(ledger.session_balance(session.id).unwrap(), money("546.80"));

        // closing with the counted drawer succeeds and freezes the session
        let closed = ledger
            .close_session(session.id, cashier_id, money("546.80"), &time)
            .unwrap();
        assert!(closed.closed);
        assert_eq!(closed.difference, Some(Money::ZERO));

        // no further payments through a closed session
        let err = ledger
            .allocate_payment(cash_request(&loan, &session, cashier_id, "100.00"), &time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::SessionClosed { .. }));
    }

    #[test]
    fn test_close_with_discrepancy_fails_and_stays_open() {
        let ledger = ledger();
        let time = test_time();
        let (_, session, cashier_id) = setup(&ledger, &time);

        let err = ledger
            .close_session(session.id, cashier_id, money("180.00"), &time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::SessionOutOfBalance { .. }));

        // still open: balance queries and movements keep working
        ledger
            .record_movement(
                session.id,
                cashier_id,
                MovementKind::Outflow,
                money("20.00"),
                "petty cash".to_string(),
                &time,
            )
            .unwrap();
        assert_eq!(ledger.session_balance(session.id).unwrap(), money("180.00"));
        ledger
            .close_session(session.id, cashier_id, money("180.00"), &time)
            .unwrap();
    }

    #[test]
    fn test_statuses_reflect_time_travel() {
        let ledger = ledger();
        let time = test_time();
        let (loan, _, _) = setup(&ledger, &time);
        let controller = time.test_control().unwrap();

        let statuses = ledger.installment_statuses(loan.id, &time).unwrap();
        assert_eq!(statuses.len(), 3);
        assert!(statuses.iter().all(|s| !s.has_late_fee));

        // 45 days in, the first installment is overdue and carries 1%
        controller.advance(Duration::days(45));
        let statuses = ledger.installment_statuses(loan.id, &time).unwrap();
        assert!(statuses[0].has_late_fee);
        assert_eq!(statuses[0].late_fee_amount, money("3.47"));
        assert_eq!(statuses[0].pending_total, money("350.22"));
        assert!(!statuses[1].has_late_fee);
    }

    #[test]
    fn test_advance_quote_then_allocate() {
        let ledger = ledger();
        let time = test_time();
        let (loan, session, cashier_id) = setup(&ledger, &time);

        // settle the first installment so {2, 3} are targetable
        ledger
            .allocate_payment(
                AllocationRequest {
                    method: PaymentMethod::DebitCard,
                    ..cash_request(&loan, &session, cashier_id, "346.75")
                },
                &time,
            )
            .unwrap();

        let account = ledger.loan_account(loan.id).unwrap();
        let ids = vec![
            account.installment_by_number(2).unwrap().id,
            account.installment_by_number(3).unwrap().id,
        ];

        let quote = ledger
            .quote_advance_payment(loan.id, &ids, session.id, cashier_id, &time)
            .unwrap();
        assert_eq!(quote.total, money("693.51"));

        // wrong amount is rejected quoting the requirement
        let err = ledger
            .allocate_advance_payment(
                AdvanceRequest {
                    loan_id: loan.id,
                    installment_ids: ids.clone(),
                    amount: money("200.00"),
                    method: PaymentMethod::DebitCard,
                    cash_session_id: session.id,
                    cashier_id,
                    external_reference: None,
                },
                &time,
            )
            .unwrap_err();
        match err {
            LedgerError::AdvanceAmountMismatch { required, .. } => {
                assert_eq!(required, money("693.51"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let receipt = ledger
            .allocate_advance_payment(
                AdvanceRequest {
                    loan_id: loan.id,
                    installment_ids: ids,
                    amount: money("693.51"),
                    method: PaymentMethod::DebitCard,
                    cash_session_id: session.id,
                    cashier_id,
                    external_reference: None,
                },
                &time,
            )
            .unwrap();
        assert!(receipt.loan_settled);
        assert_eq!(receipt.settled_installments, vec![2, 3]);
        assert!(receipt.payment.installment_id.is_none());
    }

    #[test]
    fn test_intent_round_trip() {
        let ledger = ledger();
        let time = test_time();
        let (loan, session, cashier_id) = setup(&ledger, &time);

        ledger
            .register_payment_intent(
                "gw-550".to_string(),
                loan.id,
                None,
                money("346.75"),
                PaymentMethod::DigitalWallet,
                &time,
            )
            .unwrap();

        let receipt = ledger
            .allocate_from_intent("gw-550", session.id, cashier_id, &time)
            .unwrap();
        assert!(!receipt.deduplicated);
        assert_eq!(
            receipt.payment.external_reference.as_deref(),
            Some("gw-550")
        );

        // the intent is consumed
        let err = ledger
            .allocate_from_intent("gw-550", session.id, cashier_id, &time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::IntentNotFound { .. }));
    }

    #[test]
    fn test_expired_intent_is_rejected() {
        let ledger = ledger();
        let time = test_time();
        let (loan, session, cashier_id) = setup(&ledger, &time);
        let controller = time.test_control().unwrap();

        ledger
            .register_payment_intent(
                "gw-551".to_string(),
                loan.id,
                None,
                money("100.00"),
                PaymentMethod::DigitalWallet,
                &time,
            )
            .unwrap();

        controller.advance(Duration::hours(1));
        let err = ledger
            .allocate_from_intent("gw-551", session.id, cashier_id, &time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::IntentExpired { .. }));
    }

    #[test]
    fn test_failed_intent_allocation_is_retryable() {
        let ledger = ledger();
        let time = test_time();
        let (loan, session, cashier_id) = setup(&ledger, &time);

        ledger
            .register_payment_intent(
                "gw-552".to_string(),
                loan.id,
                None,
                money("100.00"),
                PaymentMethod::DigitalWallet,
                &time,
            )
            .unwrap();

        // wrong cashier fails the allocation but keeps the intent
        let err = ledger
            .allocate_from_intent("gw-552", session.id, Uuid::new_v4(), &time)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::SessionOwnedByAnotherCashier { .. }
        ));

        assert!(ledger
            .allocate_from_intent("gw-552", session.id, cashier_id, &time)
            .is_ok());
    }

    #[test]
    fn test_classification_is_one_shot() {
        let ledger = ledger();
        let time = test_time();
        let (loan, session, cashier_id) = setup(&ledger, &time);

        let receipt = ledger
            .allocate_payment(cash_request(&loan, &session, cashier_id, "100.00"), &time)
            .unwrap();

        let classified = ledger
            .classify_payment(loan.id, receipt.payment.id, ReceiptKind::FiscalReceipt)
            .unwrap();
        assert!(classified.receipt.is_classified());

        let err = ledger
            .classify_payment(loan.id, receipt.payment.id, ReceiptKind::Invoice)
            .unwrap_err();
        assert!(matches!(err, LedgerError::PaymentAlreadyClassified { .. }));
    }

    #[test]
    fn test_events_are_collected_and_drained() {
        let ledger = ledger();
        let time = test_time();
        let (loan, session, cashier_id) = setup(&ledger, &time);

        ledger
            .allocate_payment(cash_request(&loan, &session, cashier_id, "346.80"), &time)
            .unwrap();

        let events = ledger.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::LoanCreated { loan_id, .. } if *loan_id == loan.id)));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::SessionOpened { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::PaymentAllocated { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::InstallmentSettled { installment_number: 1, .. })));

        // drained
        assert!(ledger.drain_events().is_empty());
    }

    #[test]
    fn test_duplicate_cash_resubmission_returns_original() {
        let ledger = ledger();
        let time = test_time();
        let (loan, session, cashier_id) = setup(&ledger, &time);

        let first = ledger
            .allocate_payment(cash_request(&loan, &session, cashier_id, "100.00"), &time)
            .unwrap();
        let second = ledger
            .allocate_payment(cash_request(&loan, &session, cashier_id, "100.00"), &time)
            .unwrap();

        assert!(second.deduplicated);
        assert_eq!(second.payment.id, first.payment.id);

        // only one collection landed in the drawer
        assert_eq!(ledger.session_balance(session.id).unwrap(), money("300.00"));
    }

    #[test]
    fn test_create_loan_enforces_one_per_client() {
        let ledger = ledger();
        let time = test_time();
        let client_id = Uuid::new_v4();

        ledger
            .create_loan(
                client_id,
                Money::from_major(500),
                Rate::ZERO,
                2,
                time.now(),
                &time,
            )
            .unwrap();
        let err = ledger
            .create_loan(
                client_id,
                Money::from_major(800),
                Rate::ZERO,
                4,
                time.now(),
                &time,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::ClientAlreadyHasLoan { .. }));
    }
}

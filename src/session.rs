use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{CashierId, MovementId, MovementKind, PaymentId, PaymentMethod, SessionId};

/// an append-only cash movement within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashMovement {
    pub id: MovementId,
    pub kind: MovementKind,
    pub amount: Money,
    pub payment_id: Option<PaymentId>,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

/// a payment collected during a session, as the session sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPayment {
    pub payment_id: PaymentId,
    pub method: PaymentMethod,
    pub amount: Money,
    pub collected_at: DateTime<Utc>,
}

/// a cashier's shift: opening balance, movements, collected payments and
/// the close-out reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashSession {
    pub id: SessionId,
    pub cashier_id: CashierId,
    pub opening_balance: Money,
    pub movements: Vec<CashMovement>,
    pub payments: Vec<SessionPayment>,
    pub counted_balance: Option<Money>,
    pub difference: Option<Money>,
    pub closed: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl CashSession {
    pub fn open(cashier_id: CashierId, opening_balance: Money, now: DateTime<Utc>) -> Result<Self> {
        if opening_balance.is_negative() {
            return Err(LedgerError::InvalidMovementAmount {
                amount: opening_balance,
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            cashier_id,
            opening_balance,
            movements: Vec::new(),
            payments: Vec::new(),
            counted_balance: None,
            difference: None,
            closed: false,
            opened_at: now,
            closed_at: None,
        })
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(LedgerError::SessionClosed {
                session_id: self.id,
            });
        }
        Ok(())
    }

    pub fn ensure_owned_by(&self, cashier_id: CashierId) -> Result<()> {
        if self.cashier_id != cashier_id {
            return Err(LedgerError::SessionOwnedByAnotherCashier {
                session_id: self.id,
            });
        }
        Ok(())
    }

    /// append a movement; amounts must be strictly positive
    pub fn record_movement(
        &mut self,
        kind: MovementKind,
        amount: Money,
        payment_id: Option<PaymentId>,
        description: String,
        now: DateTime<Utc>,
    ) -> Result<CashMovement> {
        self.ensure_open()?;
        if !amount.is_positive() {
            return Err(LedgerError::InvalidMovementAmount { amount });
        }

        let movement = CashMovement {
            id: Uuid::new_v4(),
            kind,
            amount,
            payment_id,
            description,
            recorded_at: now,
        };
        self.movements.push(movement.clone());
        Ok(movement)
    }

    /// attach a collected payment; cash payments also move the drawer
    pub fn record_payment(
        &mut self,
        payment_id: PaymentId,
        method: PaymentMethod,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.payments.push(SessionPayment {
            payment_id,
            method,
            amount,
            collected_at: now,
        });
        if method.is_cash() {
            self.record_movement(
                MovementKind::Collection,
                amount,
                Some(payment_id),
                "loan payment collection".to_string(),
                now,
            )?;
        }
        Ok(())
    }

    /// opening + inflows + collections - outflows - change given.
    ///
    /// Never adjusted directly; only movements and payments feed it.
    pub fn computed_balance(&self) -> Money {
        self.movements
            .iter()
            .fold(self.opening_balance, |balance, movement| {
                if movement.kind.is_credit() {
                    balance + movement.amount
                } else {
                    balance - movement.amount
                }
            })
    }

    /// close against a physically counted amount.
    ///
    /// A difference beyond the tolerance fails the close and leaves the
    /// session open; there is no closing with a discrepancy.
    pub fn close(
        &mut self,
        counted_balance: Money,
        tolerance: Money,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_open()?;

        let computed = self.computed_balance();
        let difference = counted_balance - computed;
        if difference.abs() > tolerance {
            return Err(LedgerError::SessionOutOfBalance {
                counted: counted_balance,
                computed,
                difference,
            });
        }

        self.counted_balance = Some(counted_balance);
        self.difference = Some(difference);
        self.closed = true;
        self.closed_at = Some(now);
        Ok(())
    }

    pub fn summary(&self) -> SessionSummary {
        let mut collected_by_method: BTreeMap<String, Money> = BTreeMap::new();
        for payment in &self.payments {
            let entry = collected_by_method
                .entry(format!("{:?}", payment.method))
                .or_insert(Money::ZERO);
            *entry += payment.amount;
        }

        let total = |kind: MovementKind| -> Money {
            self.movements
                .iter()
                .filter(|m| m.kind == kind)
                .map(|m| m.amount)
                .sum()
        };

        SessionSummary {
            session_id: self.id,
            cashier_id: self.cashier_id,
            opening_balance: self.opening_balance,
            inflows: total(MovementKind::Inflow),
            outflows: total(MovementKind::Outflow),
            change_given: total(MovementKind::ChangeGiven),
            collections: total(MovementKind::Collection),
            computed_balance: self.computed_balance(),
            counted_balance: self.counted_balance,
            difference: self.difference,
            payment_count: self.payments.len(),
            collected_by_method,
            closed: self.closed,
        }
    }
}

/// read-only aggregate of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub cashier_id: CashierId,
    pub opening_balance: Money,
    pub inflows: Money,
    pub outflows: Money,
    pub change_given: Money,
    pub collections: Money,
    pub computed_balance: Money,
    pub counted_balance: Option<Money>,
    pub difference: Option<Money>,
    pub payment_count: usize,
    pub collected_by_method: BTreeMap<String, Money>,
    pub closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(s: &str) -> Money {
        Money::from_str_exact(s).unwrap()
    }

    fn open_session() -> CashSession {
        CashSession::open(Uuid::new_v4(), money("150.00"), Utc::now()).unwrap()
    }

    #[test]
    fn test_balance_composition() {
        let mut session = open_session();
        let now = Utc::now();

        session
            .record_movement(MovementKind::Inflow, money("50.00"), None, "float top-up".into(), now)
            .unwrap();
        session
            .record_payment(Uuid::new_v4(), PaymentMethod::Cash, money("95.50"), now)
            .unwrap();
        session
            .record_movement(MovementKind::ChangeGiven, money("4.50"), None, "change".into(), now)
            .unwrap();
        session
            .record_movement(MovementKind::Outflow, money("20.00"), None, "supplier".into(), now)
            .unwrap();

        // 150 + 50 + 95.50 - 4.50 - 20
        assert_eq!(session.computed_balance(), money("271.00"));
    }

    #[test]
    fn test_digital_payments_do_not_move_cash() {
        let mut session = open_session();
        let now = Utc::now();

        session
            .record_payment(Uuid::new_v4(), PaymentMethod::DebitCard, money("346.75"), now)
            .unwrap();

        assert_eq!(session.computed_balance(), money("150.00"));
        assert_eq!(session.payments.len(), 1);
        assert!(session.movements.is_empty());
    }

    #[test]
    fn test_movement_must_be_positive() {
        let mut session = open_session();
        let now = Utc::now();

        let err = session
            .record_movement(MovementKind::Inflow, Money::ZERO, None, "zero".into(), now)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidMovementAmount { .. }));
    }

    #[test]
    fn test_close_requires_counted_match() {
        let mut session = open_session();
        let now = Utc::now();
        let tolerance = money("0.01");

        session
            .record_payment(Uuid::new_v4(), PaymentMethod::Cash, money("95.50"), now)
            .unwrap();

        // counted amount off by 5.00 fails and leaves the session open
        let err = session.close(money("240.50"), tolerance, now).unwrap_err();
        match err {
            LedgerError::SessionOutOfBalance { difference, .. } => {
                assert_eq!(difference, money("-5.00"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!session.closed);

        // exact count closes
        session.close(money("245.50"), tolerance, now).unwrap();
        assert!(session.closed);
        assert_eq!(session.difference, Some(Money::ZERO));

        // closed sessions are immutable
        let err = session
            .record_movement(MovementKind::Inflow, money("1.00"), None, "late".into(), now)
            .unwrap_err();
        assert!(matches!(err, LedgerError::SessionClosed { .. }));
    }

    #[test]
    fn test_summary_aggregates_by_method_and_kind() {
        let mut session = open_session();
        let now = Utc::now();

        session
            .record_payment(Uuid::new_v4(), PaymentMethod::Cash, money("95.50"), now)
            .unwrap();
        session
            .record_payment(Uuid::new_v4(), PaymentMethod::Cash, money("100.00"), now)
            .unwrap();
        session
            .record_payment(Uuid::new_v4(), PaymentMethod::DigitalWallet, money("50.00"), now)
            .unwrap();
        session
            .record_movement(MovementKind::Outflow, money("30.00"), None, "supplier".into(), now)
            .unwrap();

        let summary = session.summary();
        assert_eq!(summary.collections, money("195.50"));
        assert_eq!(summary.outflows, money("30.00"));
        assert_eq!(summary.payment_count, 3);
        assert_eq!(summary.collected_by_method["Cash"], money("195.50"));
        assert_eq!(summary.collected_by_method["DigitalWallet"], money("50.00"));
        assert_eq!(summary.computed_balance, money("315.50"));
    }

    #[test]
    fn test_ownership_check() {
        let session = open_session();
        assert!(session.ensure_owned_by(session.cashier_id).is_ok());
        let err = session.ensure_owned_by(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, LedgerError::SessionOwnedByAnotherCashier { .. }));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    CashierId, ClientId, InstallmentId, LoanId, MovementId, MovementKind, PaymentId,
    PaymentMethod, SessionId,
};

/// all events that can be emitted by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // loan lifecycle
    LoanCreated {
        loan_id: LoanId,
        client_id: ClientId,
        principal: Money,
        term_count: u32,
        timestamp: DateTime<Utc>,
    },
    LoanSettled {
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentAllocated {
        payment_id: PaymentId,
        loan_id: LoanId,
        installment_id: Option<InstallmentId>,
        amount: Money,
        method: PaymentMethod,
        applied_to_principal: Money,
        applied_to_interest: Money,
        applied_to_late_fee: Money,
        rounding_adjustment: Money,
        timestamp: DateTime<Utc>,
    },
    AdvancePaymentAllocated {
        payment_id: PaymentId,
        loan_id: LoanId,
        installment_numbers: Vec<u32>,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    DuplicatePaymentShortCircuited {
        payment_id: PaymentId,
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },
    InstallmentSettled {
        loan_id: LoanId,
        installment_number: u32,
        timestamp: DateTime<Utc>,
    },

    // late fee events
    LateFeeCollected {
        loan_id: LoanId,
        installment_number: u32,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    LateFeeWaived {
        loan_id: LoanId,
        installment_number: u32,
        amount: Money,
        timestamp: DateTime<Utc>,
    },

    // cash session events
    SessionOpened {
        session_id: SessionId,
        cashier_id: CashierId,
        opening_balance: Money,
        timestamp: DateTime<Utc>,
    },
    SessionClosed {
        session_id: SessionId,
        counted_balance: Money,
        computed_balance: Money,
        difference: Money,
        timestamp: DateTime<Utc>,
    },
    MovementRecorded {
        session_id: SessionId,
        movement_id: MovementId,
        kind: MovementKind,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn extend(&mut self, events: Vec<Event>) {
        self.events.extend(events);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_emit_and_take() {
        let mut store = EventStore::new();
        let loan_id = Uuid::new_v4();
        store.emit(Event::InstallmentSettled {
            loan_id,
            installment_number: 1,
            timestamp: Utc::now(),
        });
        assert_eq!(store.events().len(), 1);

        let taken = store.take_events();
        assert_eq!(taken.len(), 1);
        assert!(store.events().is_empty());
    }

    #[test]
    fn test_extend() {
        let mut store = EventStore::new();
        let loan_id = Uuid::new_v4();
        let now = Utc::now();
        store.extend(vec![
            Event::LoanSettled {
                loan_id,
                timestamp: now,
            },
            Event::InstallmentSettled {
                loan_id,
                installment_number: 3,
                timestamp: now,
            },
        ]);
        assert_eq!(store.events().len(), 2);
    }
}

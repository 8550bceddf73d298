use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{OrderId, PlanId, InstallmentId, ProductId, ReservationId, ReservationStatus};

/// all events that can be emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // reservation events
    ReservationCreated {
        reservation_id: ReservationId,
        product_id: ProductId,
        order_id: OrderId,
        quantity: u32,
        price: Money,
        deposit: Money,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        reservation_id: ReservationId,
        old_status: ReservationStatus,
        new_status: ReservationStatus,
        timestamp: DateTime<Utc>,
    },
    LateFeeAssessed {
        reservation_id: ReservationId,
        fee_amount: Money,
        days_late: u32,
        timestamp: DateTime<Utc>,
    },
    DepositRefunded {
        reservation_id: ReservationId,
        deposit: Money,
        deductions: Money,
        refund: Money,
        timestamp: DateTime<Utc>,
    },
    ReservationExtended {
        reservation_id: ReservationId,
        old_end_at: DateTime<Utc>,
        new_end_at: DateTime<Utc>,
        extra_charge: Money,
        timestamp: DateTime<Utc>,
    },

    // installment events
    PlanCreated {
        plan_id: PlanId,
        order_id: OrderId,
        total_amount: Money,
        installments: u32,
        timestamp: DateTime<Utc>,
    },
    InstallmentPaid {
        plan_id: PlanId,
        installment_id: InstallmentId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    InstallmentOverdue {
        plan_id: PlanId,
        installment_id: InstallmentId,
        due_date: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    PlanCompleted {
        plan_id: PlanId,
        timestamp: DateTime<Utc>,
    },
    PlanDefaulted {
        plan_id: PlanId,
        timestamp: DateTime<Utc>,
    },

    // promo events
    PromoRedeemed {
        code: String,
        order_amount: Money,
        discount_amount: Money,
        used_count: u32,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
///
/// Holds at most `capacity` events; the oldest are dropped to make room.
#[derive(Debug)]
pub struct EventStore {
    events: VecDeque<Event>,
    capacity: usize,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// returns how many old events were dropped
    pub fn emit(&mut self, event: Event) -> usize {
        self.events.push_back(event);
        self.trim()
    }

    /// returns how many old events were dropped
    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) -> usize {
        self.events.extend(events);
        self.trim()
    }

    fn trim(&mut self) -> usize {
        let excess = self.events.len().saturating_sub(self.capacity);
        self.events.drain(..excess);
        excess
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events).into()
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// immutable audit record of one lifecycle move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_id: Uuid,
    pub reservation_id: ReservationId,
    /// `None` for the creation record
    pub from_status: Option<ReservationStatus>,
    pub to_status: ReservationStatus,
    pub timestamp: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl LifecycleEvent {
    pub fn new(
        reservation_id: ReservationId,
        from_status: Option<ReservationStatus>,
        to_status: ReservationStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            reservation_id,
            from_status,
            to_status,
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

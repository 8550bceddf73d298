use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::availability::Occupancy;
use crate::decimal::Money;
use crate::types::{DateWindow, OrderId, ProductId, ReservationId, ReservationStatus, TenureUnit};

/// reservation record
///
/// Created at checkout and only mutated through the lifecycle engine. Terminal
/// reservations are kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    // identification
    pub id: ReservationId,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub quantity: u32,

    // window and terms
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub tenure_unit: TenureUnit,
    pub pricelist: String,

    // money
    pub price: Money,
    pub deposit: Money,
    pub late_fee: Money,
    pub days_late: u32,
    pub extension_charges: Money,
    pub deductions: Money,
    pub deposit_refund: Option<Money>,

    // lifecycle
    pub status: ReservationStatus,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// bumped on every committed transition
    pub version: u64,
}

/// everything checkout knows when it creates a reservation
#[derive(Debug, Clone, PartialEq)]
pub struct NewReservation {
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub quantity: u32,
    pub window: DateWindow,
    pub tenure_unit: TenureUnit,
    pub pricelist: String,
    pub price: Money,
    pub deposit: Money,
}

impl Reservation {
    pub fn new(draft: NewReservation, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: draft.product_id,
            order_id: draft.order_id,
            quantity: draft.quantity,
            start_at: draft.window.start,
            end_at: draft.window.end,
            tenure_unit: draft.tenure_unit,
            pricelist: draft.pricelist,
            price: draft.price,
            deposit: draft.deposit,
            late_fee: Money::ZERO,
            days_late: 0,
            extension_charges: Money::ZERO,
            deductions: Money::ZERO,
            deposit_refund: None,
            status: ReservationStatus::Reserved,
            picked_up_at: None,
            returned_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn window(&self) -> DateWindow {
        DateWindow {
            start: self.start_at,
            end: self.end_at,
        }
    }

    /// the span this reservation keeps stock busy, if any
    pub fn occupancy(&self) -> Option<Occupancy> {
        let end = match self.status {
            ReservationStatus::Cancelled => return None,
            ReservationStatus::Returned => self
                .returned_at
                .map_or(self.end_at, |returned| returned.min(self.end_at)),
            _ => self.end_at,
        };
        if end < self.start_at {
            return None;
        }
        Some(Occupancy {
            window: DateWindow {
                start: self.start_at,
                end,
            },
            quantity: self.quantity,
        })
    }

    /// rent plus fees charged so far, deposit excluded
    pub fn total_charges(&self) -> Money {
        self.price + self.late_fee + self.extension_charges
    }

    pub fn update_status(&mut self, new_status: ReservationStatus, timestamp: DateTime<Utc>) {
        self.status = new_status;
        self.updated_at = timestamp;
        self.version += 1;
    }
}

/// allowed moves; late -> late is handled separately as a no-op
///
/// Extended -> late and extended -> extended are intentional additions so an
/// extended rental can still run over or be extended again.
pub fn can_transition(from: ReservationStatus, to: ReservationStatus) -> bool {
    use ReservationStatus::{Cancelled, Extended, Late, PickedUp, Reserved, Returned};

    matches!(
        (from, to),
        (Reserved, PickedUp)
            | (Reserved, Cancelled)
            | (PickedUp, Returned)
            | (PickedUp, Late)
            | (PickedUp, Extended)
            | (Late, Returned)
            | (Extended, Returned)
            | (Extended, Late)
            | (Extended, Extended)
    )
}

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{RentalError, Result};

pub type ProductId = Uuid;
pub type ReservationId = Uuid;
pub type OrderId = Uuid;
pub type PlanId = Uuid;
pub type InstallmentId = Uuid;

/// billing granularity of a rental
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenureUnit {
    Hour,
    Day,
    Week,
    Month,
}

impl TenureUnit {
    pub const ALL: [TenureUnit; 4] = [
        TenureUnit::Hour,
        TenureUnit::Day,
        TenureUnit::Week,
        TenureUnit::Month,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TenureUnit::Hour => "hour",
            TenureUnit::Day => "day",
            TenureUnit::Week => "week",
            TenureUnit::Month => "month",
        }
    }

    /// whole units elapsed between start and end; negative when end < start
    pub fn whole_units_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        let span = end - start;
        match self {
            TenureUnit::Hour => span.num_hours(),
            TenureUnit::Day => span.num_days(),
            TenureUnit::Week => span.num_weeks(),
            TenureUnit::Month => whole_months_between(start, end),
        }
    }
}

/// calendar months, counting a month only once the same day-of-month and time is reached
fn whole_months_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    if end < start {
        return -whole_months_between(end, start);
    }
    let mut months: u32 = 0;
    while let Some(next) = start.checked_add_months(Months::new(months + 1)) {
        if next > end {
            break;
        }
        months += 1;
    }
    i64::from(months)
}

impl fmt::Display for TenureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenureUnit {
    type Err = RentalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "hourly" => Ok(TenureUnit::Hour),
            "day" | "daily" => Ok(TenureUnit::Day),
            "week" | "weekly" => Ok(TenureUnit::Week),
            "month" | "monthly" => Ok(TenureUnit::Month),
            other => Err(RentalError::validation(format!("unknown tenure unit: {other}"))),
        }
    }
}

/// reservation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// created at checkout, nothing handed over yet
    Reserved,
    /// item is with the customer
    PickedUp,
    /// past end plus grace period, late fee assessed
    Late,
    /// end moved later while the item is out
    Extended,
    /// item back, deposit settled
    Returned,
    /// called off before pickup
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::PickedUp => "picked_up",
            ReservationStatus::Late => "late",
            ReservationStatus::Extended => "extended",
            ReservationStatus::Returned => "returned",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Returned | ReservationStatus::Cancelled)
    }

    /// item physically out with the customer
    pub fn is_out(&self) -> bool {
        matches!(
            self,
            ReservationStatus::PickedUp | ReservationStatus::Late | ReservationStatus::Extended
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// tri-state availability for a product and window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    /// fully available
    Green,
    /// partially booked
    Yellow,
    /// fully booked
    Red,
}

/// product as seen by the engine; owned by the external catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// canonical sale price used as the pricing base
    pub base_price: Money,
    pub quantity_on_hand: u32,
}

impl Product {
    pub fn new(name: impl Into<String>, base_price: Money, quantity_on_hand: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            base_price,
            quantity_on_hand,
        }
    }
}

/// half-open in spirit, but identical windows always collide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    /// build a window, rejecting end <= start
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(RentalError::validation(format!(
                "window end {end} must be after start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn overlaps(&self, other: &DateWindow) -> bool {
        (self.start < other.end && self.end > other.start)
            || (self.start == other.start && self.end == other.end)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_whole_units() {
        let start = at(2024, 8, 10, 9);
        let end = at(2024, 8, 13, 8);
        assert_eq!(TenureUnit::Hour.whole_units_between(start, end), 71);
        assert_eq!(TenureUnit::Day.whole_units_between(start, end), 2);
        assert_eq!(TenureUnit::Week.whole_units_between(start, end), 0);
        assert_eq!(TenureUnit::Day.whole_units_between(end, start), -2);
    }

    #[test]
    fn test_calendar_months() {
        assert_eq!(
            TenureUnit::Month.whole_units_between(at(2024, 1, 31, 0), at(2024, 2, 29, 0)),
            1
        );
        assert_eq!(
            TenureUnit::Month.whole_units_between(at(2024, 1, 15, 0), at(2024, 4, 14, 23)),
            2
        );
        assert_eq!(
            TenureUnit::Month.whole_units_between(at(2024, 1, 15, 0), at(2024, 4, 15, 0)),
            3
        );
    }

    #[test]
    fn test_tenure_parse() {
        assert_eq!("Day".parse::<TenureUnit>().unwrap(), TenureUnit::Day);
        assert_eq!("monthly".parse::<TenureUnit>().unwrap(), TenureUnit::Month);
        assert!(matches!(
            "fortnight".parse::<TenureUnit>(),
            Err(RentalError::Validation { .. })
        ));
    }

    #[test]
    fn test_window_overlap_rules() {
        let existing = DateWindow::new(at(2024, 8, 10, 0), at(2024, 8, 15, 0)).unwrap();
        let inside = DateWindow::new(at(2024, 8, 12, 0), at(2024, 8, 14, 0)).unwrap();
        let touching = DateWindow::new(at(2024, 8, 15, 0), at(2024, 8, 16, 0)).unwrap();

        assert!(existing.overlaps(&inside));
        assert!(inside.overlaps(&existing));
        assert!(existing.overlaps(&existing));
        assert!(!existing.overlaps(&touching));
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        assert!(DateWindow::new(at(2024, 8, 10, 0), at(2024, 8, 10, 0)).is_err());
        assert!(DateWindow::new(at(2024, 8, 11, 0), at(2024, 8, 10, 0)).is_err());
    }
}

use chrono::{DateTime, Utc};

use crate::types::{AvailabilityStatus, DateWindow, Product};

/// units held over a window, as the checker sees a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub window: DateWindow,
    pub quantity: u32,
}

/// overlap including exact boundary equality of identical windows
pub fn overlaps(
    requested_start: DateTime<Utc>,
    requested_end: DateTime<Utc>,
    existing: &DateWindow,
) -> bool {
    (requested_start < existing.end && requested_end > existing.start)
        || (requested_start == existing.start && requested_end == existing.end)
}

/// units already reserved over the requested window
pub fn overlapping_units(
    occupancies: &[Occupancy],
    requested_start: DateTime<Utc>,
    requested_end: DateTime<Utc>,
) -> u32 {
    occupancies
        .iter()
        .filter(|o| overlaps(requested_start, requested_end, &o.window))
        .fold(0u32, |acc, o| acc.saturating_add(o.quantity))
}

/// units still free over the requested window
pub fn remaining_units(
    product: &Product,
    occupancies: &[Occupancy],
    requested_start: DateTime<Utc>,
    requested_end: DateTime<Utc>,
) -> u32 {
    product
        .quantity_on_hand
        .saturating_sub(overlapping_units(occupancies, requested_start, requested_end))
}

/// tri-state availability for a requested window
///
/// Without a window, reports whether a single-unit product is out right now;
/// `now` is only read in that branch.
pub fn check_availability(
    product: &Product,
    occupancies: &[Occupancy],
    requested: Option<(DateTime<Utc>, DateTime<Utc>)>,
    now: DateTime<Utc>,
) -> AvailabilityStatus {
    if product.quantity_on_hand == 0 {
        return AvailabilityStatus::Red;
    }

    let Some((start, end)) = requested else {
        let out_now = occupancies.iter().any(|o| o.window.contains(now));
        return if out_now && product.quantity_on_hand == 1 {
            AvailabilityStatus::Yellow
        } else {
            AvailabilityStatus::Green
        };
    };

    let booked = overlapping_units(occupancies, start, end);
    if booked >= product.quantity_on_hand {
        AvailabilityStatus::Red
    } else if booked > 0 {
        AvailabilityStatus::Yellow
    } else {
        AvailabilityStatus::Green
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use chrono::{Duration, TimeZone};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, d, 0, 0, 0).unwrap()
    }

    fn held(start: u32, end: u32, quantity: u32) -> Occupancy {
        Occupancy {
            window: DateWindow::new(day(start), day(end)).unwrap(),
            quantity,
        }
    }

    fn product(quantity: u32) -> Product {
        Product::new("tent", Money::from_major(9_000), quantity)
    }

    #[test]
    fn test_request_inside_existing_is_red() {
        let status = check_availability(
            &product(1),
            &[held(10, 15, 1)],
            Some((day(12), day(14))),
            day(1),
        );
        assert_eq!(status, AvailabilityStatus::Red);
    }

    #[test]
    fn test_out_of_stock_is_always_red() {
        assert_eq!(
            check_availability(&product(0), &[], Some((day(1), day(2))), day(1)),
            AvailabilityStatus::Red
        );
        assert_eq!(
            check_availability(&product(0), &[], None, day(1)),
            AvailabilityStatus::Red
        );
    }

    #[test]
    fn test_touching_windows_do_not_overlap() {
        let status = check_availability(
            &product(1),
            &[held(10, 15, 1)],
            Some((day(15), day(18))),
            day(1),
        );
        assert_eq!(status, AvailabilityStatus::Green);
    }

    #[test]
    fn test_identical_window_overlaps() {
        let existing = DateWindow::new(day(10), day(15)).unwrap();
        assert!(overlaps(day(10), day(15), &existing));
    }

    #[test]
    fn test_degenerate_identical_window_overlaps() {
        let instant = DateWindow {
            start: day(10),
            end: day(10),
        };
        assert!(overlaps(day(10), day(10), &instant));
    }

    #[test]
    fn test_counts_quantities_into_tri_state() {
        // bookings summing to exactly the stock, then one unit less, then no overlap
        for stock in 1..=6u32 {
            let full: Vec<Occupancy> = (0..stock).map(|i| held(10 + (i % 3), 20, 1)).collect();
            assert_eq!(
                check_availability(&product(stock), &full, Some((day(18), day(19))), day(1)),
                AvailabilityStatus::Red
            );

            let partial = &full[..(stock - 1) as usize];
            let expected = if stock == 1 {
                AvailabilityStatus::Green
            } else {
                AvailabilityStatus::Yellow
            };
            assert_eq!(
                check_availability(&product(stock), partial, Some((day(18), day(19))), day(1)),
                expected
            );

            assert_eq!(
                check_availability(&product(stock), &full, Some((day(21), day(25))), day(1)),
                AvailabilityStatus::Green
            );
        }
    }

    #[test]
    fn test_no_window_reports_current_handoff() {
        let now = day(12) + Duration::hours(6);
        let occupancies = [held(10, 15, 1)];

        assert_eq!(
            check_availability(&product(1), &occupancies, None, now),
            AvailabilityStatus::Yellow
        );
        assert_eq!(
            check_availability(&product(2), &occupancies, None, now),
            AvailabilityStatus::Green
        );
        assert_eq!(
            check_availability(&product(1), &occupancies, None, day(20)),
            AvailabilityStatus::Green
        );
    }

    #[test]
    fn test_pure_for_identical_inputs() {
        let occupancies = [held(10, 15, 2), held(14, 18, 1)];
        let first = check_availability(&product(3), &occupancies, Some((day(13), day(16))), day(1));
        for _ in 0..10 {
            assert_eq!(
                check_availability(&product(3), &occupancies, Some((day(13), day(16))), day(1)),
                first
            );
        }
        assert_eq!(first, AvailabilityStatus::Red);
    }

    #[test]
    fn test_remaining_units() {
        let occupancies = [held(10, 15, 2), held(20, 25, 1)];
        assert_eq!(remaining_units(&product(3), &occupancies, day(12), day(22)), 0);
        assert_eq!(remaining_units(&product(3), &occupancies, day(16), day(19)), 3);
        assert_eq!(remaining_units(&product(3), &occupancies, day(11), day(12)), 1);
    }
}

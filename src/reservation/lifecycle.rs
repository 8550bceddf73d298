use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ExtensionPricing, LifecycleConfig};
use crate::decimal::Money;
use crate::errors::{RentalError, Result};
use crate::events::{Event, LifecycleEvent};
use crate::pricing::PricingCalculator;
use crate::reservation::fees::{Deduction, DepositSettlement, LateFeeCalculation, LateFeePolicy};
use crate::reservation::state::{can_transition, Reservation};
use crate::types::{Product, ReservationStatus};

/// a requested lifecycle move and the data it needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransitionRequest {
    PickUp,
    Return { deductions: Vec<Deduction> },
    MarkLate,
    Extend { new_end_at: DateTime<Utc> },
    Cancel,
}

impl TransitionRequest {
    pub fn target(&self) -> ReservationStatus {
        match self {
            TransitionRequest::PickUp => ReservationStatus::PickedUp,
            TransitionRequest::Return { .. } => ReservationStatus::Returned,
            TransitionRequest::MarkLate => ReservationStatus::Late,
            TransitionRequest::Extend { .. } => ReservationStatus::Extended,
            TransitionRequest::Cancel => ReservationStatus::Cancelled,
        }
    }
}

/// inputs from outside the reservation record
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub now: DateTime<Utc>,
    /// needed to re-price extensions
    pub product: Option<&'a Product>,
}

/// what a transition does to physical stock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEffect {
    None,
    /// units moved from available to with the customer
    HandedOver,
    /// units free again from this instant onward
    Released { from: DateTime<Utc> },
    /// window grew to a new end
    Held { until: DateTime<Utc> },
}

/// side effects of one transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEffects {
    pub stock: StockEffect,
    pub late_fee: Option<LateFeeCalculation>,
    pub settlement: Option<DepositSettlement>,
    pub extra_charge: Option<Money>,
}

impl TransitionEffects {
    fn stock(stock: StockEffect) -> Self {
        Self {
            stock,
            late_fee: None,
            settlement: None,
            extra_charge: None,
        }
    }
}

/// result of applying a transition to a reservation value
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub reservation: Reservation,
    pub from: ReservationStatus,
    /// false when the request was an idempotent repeat
    pub changed: bool,
    pub effects: TransitionEffects,
    pub audit: Option<LifecycleEvent>,
    pub events: Vec<Event>,
}

/// state machine for a single reservation
///
/// Pure: takes a reservation value and returns the updated copy plus its side
/// effects. Persisting and serialising concurrent callers is the engine's job.
pub struct LifecycleEngine<'a> {
    pub config: &'a LifecycleConfig,
    pub pricing: &'a PricingCalculator,
}

impl<'a> LifecycleEngine<'a> {
    pub fn new(config: &'a LifecycleConfig, pricing: &'a PricingCalculator) -> Self {
        Self { config, pricing }
    }

    pub fn late_fee_policy(&self) -> LateFeePolicy {
        LateFeePolicy::from(self.config)
    }

    pub fn apply_transition(
        &self,
        reservation: &Reservation,
        request: &TransitionRequest,
        ctx: TransitionContext<'_>,
    ) -> Result<TransitionOutcome> {
        let from = reservation.status;
        let to = request.target();

        if from == ReservationStatus::Late && to == ReservationStatus::Late {
            return Ok(TransitionOutcome {
                reservation: reservation.clone(),
                from,
                changed: false,
                effects: TransitionEffects::stock(StockEffect::None),
                audit: None,
                events: Vec::new(),
            });
        }

        if !can_transition(from, to) {
            return Err(RentalError::InvalidTransition { from, to });
        }

        let now = ctx.now;
        let mut updated = reservation.clone();
        let mut audit = LifecycleEvent::new(reservation.id, Some(from), to, now);
        let mut events = Vec::new();

        let effects = match request {
            TransitionRequest::PickUp => {
                updated.picked_up_at = Some(now);
                TransitionEffects::stock(StockEffect::HandedOver)
            }
            TransitionRequest::Return { deductions } => {
                let settlement = DepositSettlement::compute(reservation.deposit, deductions)?;
                updated.returned_at = Some(now);
                updated.deductions = settlement.deductions;
                updated.deposit_refund = Some(settlement.refund);

                audit = audit
                    .with("deductions", settlement.deductions)
                    .with("deposit_refund", settlement.refund);
                events.push(Event::DepositRefunded {
                    reservation_id: reservation.id,
                    deposit: settlement.deposit,
                    deductions: settlement.deductions,
                    refund: settlement.refund,
                    timestamp: now,
                });

                TransitionEffects {
                    settlement: Some(settlement),
                    ..TransitionEffects::stock(StockEffect::Released {
                        from: now.min(reservation.end_at),
                    })
                }
            }
            TransitionRequest::MarkLate => {
                let policy = self.late_fee_policy();
                let grace_ends_at = policy.grace_ends_at(reservation.end_at)?;
                if now <= grace_ends_at {
                    return Err(RentalError::validation(format!(
                        "reservation {} is not past its grace period until {grace_ends_at}",
                        reservation.id
                    )));
                }
                let calc = policy.calculate(reservation.end_at, now);
                updated.late_fee = calc.fee;
                updated.days_late = calc.days_late;

                audit = audit
                    .with("late_fee", calc.fee)
                    .with("days_late", calc.days_late);
                events.push(Event::LateFeeAssessed {
                    reservation_id: reservation.id,
                    fee_amount: calc.fee,
                    days_late: calc.days_late,
                    timestamp: now,
                });

                TransitionEffects {
                    late_fee: Some(calc),
                    ..TransitionEffects::stock(StockEffect::None)
                }
            }
            TransitionRequest::Extend { new_end_at } => {
                let new_end_at = *new_end_at;
                if new_end_at <= reservation.end_at {
                    return Err(RentalError::validation(format!(
                        "new end {new_end_at} must be after current end {}",
                        reservation.end_at
                    )));
                }
                let extra_charge = self.extension_charge(reservation, new_end_at, ctx.product)?;
                updated.end_at = new_end_at;
                updated.extension_charges += extra_charge;

                audit = audit
                    .with("old_end_at", reservation.end_at.to_rfc3339())
                    .with("new_end_at", new_end_at.to_rfc3339())
                    .with("extra_charge", extra_charge);
                events.push(Event::ReservationExtended {
                    reservation_id: reservation.id,
                    old_end_at: reservation.end_at,
                    new_end_at,
                    extra_charge,
                    timestamp: now,
                });

                TransitionEffects {
                    extra_charge: Some(extra_charge),
                    ..TransitionEffects::stock(StockEffect::Held { until: new_end_at })
                }
            }
            TransitionRequest::Cancel => {
                let settlement = DepositSettlement::full(reservation.deposit);
                updated.cancelled_at = Some(now);
                updated.deposit_refund = Some(settlement.refund);
                audit = audit.with("deposit_refund", settlement.refund);

                TransitionEffects {
                    settlement: Some(settlement),
                    ..TransitionEffects::stock(StockEffect::Released { from: now })
                }
            }
        };

        updated.update_status(to, now);
        events.insert(
            0,
            Event::StatusChanged {
                reservation_id: reservation.id,
                old_status: from,
                new_status: to,
                timestamp: now,
            },
        );

        Ok(TransitionOutcome {
            reservation: updated,
            from,
            changed: true,
            effects,
            audit: Some(audit),
            events,
        })
    }

    /// extra charge for moving the end of a reservation later
    pub fn extension_charge(
        &self,
        reservation: &Reservation,
        new_end_at: DateTime<Utc>,
        product: Option<&Product>,
    ) -> Result<Money> {
        match self.config.extension_pricing {
            ExtensionPricing::Repriced => {
                let product = product.ok_or_else(|| {
                    RentalError::validation("product is required to re-price an extension")
                })?;
                let quote = self.pricing.calculate_price(
                    product,
                    reservation.tenure_unit,
                    reservation.end_at,
                    new_end_at,
                    &reservation.pricelist,
                );
                Ok(quote.price.times(reservation.quantity))
            }
            ExtensionPricing::DailyRateOfTotal { rate } => {
                let extra_days = extra_days(reservation.end_at, new_end_at);
                Ok(reservation.price.apply_rate(rate).times(extra_days).round_whole())
            }
        }
    }
}

/// whole days added, any partial day counts, at least one
fn extra_days(old_end: DateTime<Utc>, new_end: DateTime<Utc>) -> u32 {
    let span = new_end - old_end;
    let mut days = span.num_days();
    if span > chrono::Duration::days(days) {
        days += 1;
    }
    u32::try_from(days.max(1)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservation::state::NewReservation;
    use crate::types::{DateWindow, TenureUnit};
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 10, 10, 0, 0).unwrap()
    }

    fn camera() -> Product {
        Product::new("camera", Money::from_major(25_000), 2)
    }

    fn reservation(product: &Product) -> Reservation {
        Reservation::new(
            NewReservation {
                product_id: product.id,
                order_id: Uuid::new_v4(),
                quantity: 1,
                window: DateWindow::new(t0(), t0() + Duration::days(3)).unwrap(),
                tenure_unit: TenureUnit::Day,
                pricelist: "standard".to_string(),
                price: Money::from_major(37_500),
                deposit: Money::from_major(2_500),
            },
            t0(),
        )
    }

    fn ctx(now: DateTime<Utc>) -> TransitionContext<'static> {
        TransitionContext { now, product: None }
    }

    #[test]
    fn test_reserved_to_returned_is_invalid() {
        let config = LifecycleConfig::default();
        let pricing = PricingCalculator::default();
        let engine = LifecycleEngine::new(&config, &pricing);
        let r = reservation(&camera());

        let err = engine
            .apply_transition(&r, &TransitionRequest::Return { deductions: vec![] }, ctx(t0()))
            .unwrap_err();
        assert_eq!(
            err,
            RentalError::InvalidTransition {
                from: ReservationStatus::Reserved,
                to: ReservationStatus::Returned,
            }
        );
    }

    #[test]
    fn test_pickup_then_return_refunds_deposit() {
        let config = LifecycleConfig::default();
        let pricing = PricingCalculator::default();
        let engine = LifecycleEngine::new(&config, &pricing);
        let r = reservation(&camera());

        let picked = engine
            .apply_transition(&r, &TransitionRequest::PickUp, ctx(t0() + Duration::hours(1)))
            .unwrap();
        assert_eq!(picked.reservation.status, ReservationStatus::PickedUp);
        assert_eq!(picked.effects.stock, StockEffect::HandedOver);
        assert_eq!(picked.reservation.version, 1);

        let returned_at = t0() + Duration::days(2);
        let returned = engine
            .apply_transition(
                &picked.reservation,
                &TransitionRequest::Return {
                    deductions: vec![Deduction::new("dent", Money::from_major(400))],
                },
                ctx(returned_at),
            )
            .unwrap();
        assert_eq!(returned.reservation.status, ReservationStatus::Returned);
        assert_eq!(returned.reservation.deposit_refund, Some(Money::from_major(2_100)));
        assert_eq!(returned.effects.stock, StockEffect::Released { from: returned_at });
        assert_eq!(
            returned.audit.as_ref().unwrap().metadata.get("deposit_refund").map(String::as_str),
            Some("2100")
        );
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let config = LifecycleConfig::default();
        let pricing = PricingCalculator::default();
        let engine = LifecycleEngine::new(&config, &pricing);
        let r = reservation(&camera());

        let cancelled = engine
            .apply_transition(&r, &TransitionRequest::Cancel, ctx(t0()))
            .unwrap()
            .reservation;
        assert_eq!(cancelled.deposit_refund, Some(Money::from_major(2_500)));

        for request in [
            TransitionRequest::PickUp,
            TransitionRequest::MarkLate,
            TransitionRequest::Cancel,
            TransitionRequest::Extend {
                new_end_at: t0() + Duration::days(9),
            },
        ] {
            let before = cancelled.clone();
            assert!(matches!(
                engine.apply_transition(&cancelled, &request, ctx(t0() + Duration::days(10))),
                Err(RentalError::InvalidTransition { .. })
            ));
            assert_eq!(before, cancelled);
        }
    }

    #[test]
    fn test_late_is_idempotent() {
        let config = LifecycleConfig::default();
        let pricing = PricingCalculator::default();
        let engine = LifecycleEngine::new(&config, &pricing);
        let picked = engine
            .apply_transition(&reservation(&camera()), &TransitionRequest::PickUp, ctx(t0()))
            .unwrap()
            .reservation;

        let now = picked.end_at + Duration::days(2);
        let late = engine
            .apply_transition(&picked, &TransitionRequest::MarkLate, ctx(now))
            .unwrap();
        assert_eq!(late.reservation.late_fee, Money::from_major(100));
        assert_eq!(late.reservation.days_late, 1);

        let again = engine
            .apply_transition(
                &late.reservation,
                &TransitionRequest::MarkLate,
                ctx(now + Duration::days(3)),
            )
            .unwrap();
        assert!(!again.changed);
        assert!(again.audit.is_none());
        assert_eq!(again.reservation.late_fee, Money::from_major(100));
        assert_eq!(again.reservation, late.reservation);
    }

    #[test]
    fn test_late_before_grace_ends_is_rejected() {
        let config = LifecycleConfig::default();
        let pricing = PricingCalculator::default();
        let engine = LifecycleEngine::new(&config, &pricing);
        let picked = engine
            .apply_transition(&reservation(&camera()), &TransitionRequest::PickUp, ctx(t0()))
            .unwrap()
            .reservation;

        let result = engine.apply_transition(
            &picked,
            &TransitionRequest::MarkLate,
            ctx(picked.end_at + Duration::hours(23)),
        );
        assert!(matches!(result, Err(RentalError::Validation { .. })));
    }

    #[test]
    fn test_extension_reprices_added_window() {
        let config = LifecycleConfig::default();
        let pricing = PricingCalculator::default();
        let engine = LifecycleEngine::new(&config, &pricing);
        let product = camera();
        let picked = engine
            .apply_transition(&reservation(&product), &TransitionRequest::PickUp, ctx(t0()))
            .unwrap()
            .reservation;

        let new_end_at = picked.end_at + Duration::days(2);
        let request = TransitionRequest::Extend { new_end_at };

        let missing_product = engine.apply_transition(&picked, &request, ctx(t0()));
        assert!(matches!(missing_product, Err(RentalError::Validation { .. })));

        let extended = engine
            .apply_transition(
                &picked,
                &request,
                TransitionContext {
                    now: t0() + Duration::days(1),
                    product: Some(&product),
                },
            )
            .unwrap();
        assert_eq!(extended.reservation.end_at, new_end_at);
        assert_eq!(extended.effects.extra_charge, Some(Money::from_major(25_000)));
        assert_eq!(extended.reservation.total_charges(), Money::from_major(62_500));
    }

    #[test]
    fn test_extension_with_daily_rate_of_total() {
        let config = LifecycleConfig {
            extension_pricing: ExtensionPricing::legacy(),
            ..LifecycleConfig::default()
        };
        let pricing = PricingCalculator::default();
        let engine = LifecycleEngine::new(&config, &pricing);
        let picked = engine
            .apply_transition(&reservation(&camera()), &TransitionRequest::PickUp, ctx(t0()))
            .unwrap()
            .reservation;

        // 37500 * 0.06 = 2250 per day, 1 day 2 hours rounds up to 2 days
        let extended = engine
            .apply_transition(
                &picked,
                &TransitionRequest::Extend {
                    new_end_at: picked.end_at + Duration::hours(26),
                },
                ctx(t0()),
            )
            .unwrap();
        assert_eq!(extended.effects.extra_charge, Some(Money::from_major(4_500)));
    }

    #[test]
    fn test_extension_must_move_end_later() {
        let config = LifecycleConfig::default();
        let pricing = PricingCalculator::default();
        let engine = LifecycleEngine::new(&config, &pricing);
        let product = camera();
        let picked = engine
            .apply_transition(&reservation(&product), &TransitionRequest::PickUp, ctx(t0()))
            .unwrap()
            .reservation;

        let result = engine.apply_transition(
            &picked,
            &TransitionRequest::Extend {
                new_end_at: picked.end_at,
            },
            TransitionContext {
                now: t0(),
                product: Some(&product),
            },
        );
        assert!(matches!(result, Err(RentalError::Validation { .. })));
    }

    #[test]
    fn test_extended_reservation_can_go_late() {
        let config = LifecycleConfig::default();
        let pricing = PricingCalculator::default();
        let engine = LifecycleEngine::new(&config, &pricing);
        let product = camera();
        let picked = engine
            .apply_transition(&reservation(&product), &TransitionRequest::PickUp, ctx(t0()))
            .unwrap()
            .reservation;
        let new_end_at = picked.end_at + Duration::days(1);
        let extended = engine
            .apply_transition(
                &picked,
                &TransitionRequest::Extend { new_end_at },
                TransitionContext {
                    now: t0(),
                    product: Some(&product),
                },
            )
            .unwrap()
            .reservation;

        let late = engine
            .apply_transition(
                &extended,
                &TransitionRequest::MarkLate,
                ctx(new_end_at + Duration::days(4)),
            )
            .unwrap();
        assert_eq!(late.reservation.status, ReservationStatus::Late);
        assert_eq!(late.reservation.late_fee, Money::from_major(300));
        assert!(matches!(late.events[0], Event::StatusChanged { .. }));
    }
}

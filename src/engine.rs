use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use crate::availability::{check_availability, remaining_units, Occupancy};
use crate::config::EngineConfig;
use crate::decimal::Money;
use crate::errors::{RentalError, Result};
use crate::events::{Event, EventStore, LifecycleEvent};
use crate::locks::KeyedLocks;
use crate::payments::{
    normalize_code, validate_promo, InstallmentPlan, PaymentOutcome, PlanStatus, PlanType,
    PromoCode, PromoQuote, PromoRejection, PromoValidation,
};
use crate::pricing::{PriceQuote, PricelistCatalog, PricingCalculator};
use crate::reservation::{
    can_transition, Deduction, LifecycleEngine, NewReservation, Reservation, TransitionContext,
    TransitionOutcome, TransitionRequest,
};
use crate::store::{ReservationFilter, Stores};
use crate::types::{
    AvailabilityStatus, DateWindow, InstallmentId, OrderId, PlanId, Product, ProductId,
    ReservationId, ReservationStatus, TenureUnit,
};

/// what a customer asks for at checkout
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub quantity: u32,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub tenure_unit: TenureUnit,
    pub pricelist: String,
    pub promo_code: Option<String>,
    pub plan_type: Option<PlanType>,
}

impl CheckoutRequest {
    pub fn new(
        product_id: ProductId,
        quantity: u32,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        tenure_unit: TenureUnit,
    ) -> Self {
        Self {
            product_id,
            order_id: Uuid::new_v4(),
            quantity,
            start_at,
            end_at,
            tenure_unit,
            pricelist: "standard".to_string(),
            promo_code: None,
            plan_type: None,
        }
    }

    pub fn with_pricelist(mut self, pricelist: impl Into<String>) -> Self {
        self.pricelist = pricelist.into();
        self
    }

    pub fn with_promo(mut self, code: impl Into<String>) -> Self {
        self.promo_code = Some(code.into());
        self
    }

    pub fn with_plan(mut self, plan_type: PlanType) -> Self {
        self.plan_type = Some(plan_type);
        self
    }
}

/// result of a successful checkout
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutReceipt {
    pub reservation: Reservation,
    /// per-unit quote
    pub quote: PriceQuote,
    /// rent for all units before any promo
    pub rent: Money,
    pub deposit: Money,
    pub promo: Option<PromoQuote>,
    /// rent after promo, deposit excluded
    pub amount_due: Money,
    pub plan: Option<InstallmentPlan>,
}

/// counts from one overdue-installment pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverdueSummary {
    pub plans_checked: usize,
    pub installments_overdue: usize,
    pub plans_defaulted: usize,
}

/// rental commerce engine
///
/// Decision logic lives in the pure modules; this type loads values from the
/// stores, serialises writers per key and persists the results.
pub struct RentalEngine {
    config: EngineConfig,
    pricing: PricingCalculator,
    stores: Stores,
    reservation_locks: KeyedLocks<ReservationId>,
    product_locks: KeyedLocks<ProductId>,
    promo_locks: KeyedLocks<String>,
    plan_locks: KeyedLocks<PlanId>,
    events: Mutex<EventStore>,
}

impl RentalEngine {
    pub fn new(config: EngineConfig, stores: Stores) -> Result<Self> {
        Self::with_pricelists(config, PricelistCatalog::new(), stores)
    }

    pub fn with_pricelists(
        config: EngineConfig,
        pricelists: PricelistCatalog,
        stores: Stores,
    ) -> Result<Self> {
        config.validate()?;
        let pricing = PricingCalculator::new(pricelists, config.pricing.clone());
        let events = EventStore::with_capacity(config.events.capacity);
        Ok(Self {
            config,
            pricing,
            stores,
            reservation_locks: KeyedLocks::new(),
            product_locks: KeyedLocks::new(),
            promo_locks: KeyedLocks::new(),
            plan_locks: KeyedLocks::new(),
            events: Mutex::new(events),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pricing(&self) -> &PricingCalculator {
        &self.pricing
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// drain events recorded since the last call
    pub fn take_events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take_events()
    }

    fn record(&self, events: impl IntoIterator<Item = Event>) {
        let mut store = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped = store.extend(events);
        if dropped > 0 {
            tracing::warn!(
                dropped,
                capacity = store.capacity(),
                "event buffer full, dropped oldest events"
            );
        }
    }

    // ---- pricing and availability ----

    pub fn quote(
        &self,
        product_id: ProductId,
        tenure_unit: TenureUnit,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        pricelist: &str,
    ) -> Result<PriceQuote> {
        let product = self.stores.catalog.get_product(product_id)?;
        Ok(self
            .pricing
            .calculate_price(&product, tenure_unit, start_at, end_at, pricelist))
    }

    /// windows currently holding stock for a product
    fn occupancies(&self, product_id: ProductId, exclude: Option<ReservationId>) -> Result<Vec<Occupancy>> {
        Ok(self
            .stores
            .reservations
            .list_reservations(&ReservationFilter::for_product(product_id))?
            .iter()
            .filter(|r| Some(r.id) != exclude)
            .filter_map(Reservation::occupancy)
            .collect())
    }

    pub fn availability(
        &self,
        product_id: ProductId,
        requested: Option<(DateTime<Utc>, DateTime<Utc>)>,
        time: &SafeTimeProvider,
    ) -> Result<AvailabilityStatus> {
        if let Some((start, end)) = requested {
            DateWindow::new(start, end)?;
        }
        let product = self.stores.catalog.get_product(product_id)?;
        let occupancies = self.occupancies(product_id, None)?;
        Ok(check_availability(&product, &occupancies, requested, time.now()))
    }

    pub fn remaining_units(
        &self,
        product_id: ProductId,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<u32> {
        let window = DateWindow::new(start_at, end_at)?;
        let product = self.stores.catalog.get_product(product_id)?;
        let occupancies = self.occupancies(product_id, None)?;
        Ok(remaining_units(&product, &occupancies, window.start, window.end))
    }

    // ---- checkout ----

    pub fn checkout(&self, request: CheckoutRequest, time: &SafeTimeProvider) -> Result<CheckoutReceipt> {
        self.checkout_at(request, time.now())
    }

    /// price, gate on availability, persist, then redeem promo and split payments
    ///
    /// A promo or plan failure after the reservation is stored cancels it again.
    pub fn checkout_at(&self, request: CheckoutRequest, now: DateTime<Utc>) -> Result<CheckoutReceipt> {
        if request.quantity == 0 {
            return Err(RentalError::validation("quantity must be at least 1"));
        }
        let window = DateWindow::new(request.start_at, request.end_at)?;
        let product = self.stores.catalog.get_product(request.product_id)?;
        if request.quantity > product.quantity_on_hand {
            return Err(RentalError::limit_exceeded(format!(
                "requested {} units of {} but only {} on hand",
                request.quantity, product.name, product.quantity_on_hand
            )));
        }

        let quote = self.pricing.calculate_price(
            &product,
            request.tenure_unit,
            window.start,
            window.end,
            &request.pricelist,
        );
        let rent = quote.price.times(request.quantity);
        let deposit = quote.deposit.times(request.quantity);

        // fail fast before anything is written
        let expected_due = match &request.promo_code {
            Some(code) => self.validate_promo_at(code, rent, now)?.into_result()?.final_amount,
            None => rent,
        };
        if let Some(plan_type) = request.plan_type {
            InstallmentPlan::generate(request.order_id, expected_due, plan_type, now)?;
        }

        let reservation = self.product_locks.with_lock(&product.id, || {
            self.reserve_locked(&product, &request, window, &quote, rent, deposit, now)
        })?;

        let promo = match &request.promo_code {
            Some(code) => match self.redeem_promo_at(code, rent, now) {
                Ok(promo) => Some(promo),
                Err(err) => return Err(self.abort_checkout(reservation.id, now, err)),
            },
            None => None,
        };
        let amount_due = promo.as_ref().map_or(rent, |p| p.final_amount);

        let plan = match request.plan_type {
            Some(plan_type) => {
                match self.create_installment_plan_at(request.order_id, amount_due, plan_type, now) {
                    Ok(plan) => Some(plan),
                    Err(err) => return Err(self.abort_checkout(reservation.id, now, err)),
                }
            }
            None => None,
        };

        Ok(CheckoutReceipt {
            reservation,
            quote,
            rent,
            deposit,
            promo,
            amount_due,
            plan,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn reserve_locked(
        &self,
        product: &Product,
        request: &CheckoutRequest,
        window: DateWindow,
        quote: &PriceQuote,
        rent: Money,
        deposit: Money,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let occupancies = self.occupancies(product.id, None)?;
        let status = check_availability(product, &occupancies, Some((window.start, window.end)), now);
        let free = remaining_units(product, &occupancies, window.start, window.end);
        if status == AvailabilityStatus::Red || free < request.quantity {
            tracing::warn!(
                product_id = %product.id,
                requested = request.quantity,
                free,
                ?status,
                "checkout refused, window is booked"
            );
            return Err(RentalError::limit_exceeded(format!(
                "only {free} of {} units free between {} and {}",
                product.quantity_on_hand, window.start, window.end
            )));
        }

        let reservation = Reservation::new(
            NewReservation {
                product_id: product.id,
                order_id: request.order_id,
                quantity: request.quantity,
                window,
                tenure_unit: request.tenure_unit,
                pricelist: quote.pricelist.clone(),
                price: rent,
                deposit,
            },
            now,
        );

        let reservation = self.stores.reservations.create_reservation(reservation)?;
        if let Err(err) = self.stores.audit.append_lifecycle_event(
            LifecycleEvent::new(reservation.id, None, ReservationStatus::Reserved, now)
                .with("price", rent)
                .with("deposit", deposit)
                .with("quantity", request.quantity),
        ) {
            tracing::error!(reservation_id = %reservation.id, error = %err, "audit append failed, removing reservation");
            if let Err(remove_err) = self.stores.reservations.delete_reservation(reservation.id) {
                tracing::error!(reservation_id = %reservation.id, error = %remove_err, "remove failed");
            }
            return Err(err);
        }

        self.record([Event::ReservationCreated {
            reservation_id: reservation.id,
            product_id: product.id,
            order_id: reservation.order_id,
            quantity: reservation.quantity,
            price: rent,
            deposit,
            timestamp: now,
        }]);
        tracing::info!(
            reservation_id = %reservation.id,
            product_id = %product.id,
            quantity = reservation.quantity,
            price = %rent,
            deposit = %deposit,
            "reservation created"
        );
        Ok(reservation)
    }

    fn abort_checkout(&self, reservation_id: ReservationId, now: DateTime<Utc>, err: RentalError) -> RentalError {
        tracing::warn!(%reservation_id, error = %err, "checkout failed after reserving, cancelling");
        if let Err(cancel_err) = self.transition_at(reservation_id, TransitionRequest::Cancel, now) {
            tracing::error!(%reservation_id, error = %cancel_err, "could not cancel abandoned reservation");
        }
        err
    }

    // ---- lifecycle ----

    pub fn get_reservation(&self, id: ReservationId) -> Result<Reservation> {
        self.stores.reservations.get_reservation(id)
    }

    pub fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>> {
        self.stores.reservations.list_reservations(filter)
    }

    pub fn transition(
        &self,
        id: ReservationId,
        request: TransitionRequest,
        time: &SafeTimeProvider,
    ) -> Result<TransitionOutcome> {
        self.transition_at(id, request, time.now())
    }

    /// apply one lifecycle move under the reservation's lock
    ///
    /// Either the new record and its audit entry are both stored, or neither.
    pub fn transition_at(
        &self,
        id: ReservationId,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        self.reservation_locks.with_lock(&id, || {
            let current = self.stores.reservations.get_reservation(id)?;
            match &request {
                TransitionRequest::Extend { new_end_at }
                    if can_transition(current.status, ReservationStatus::Extended) =>
                {
                    let product = self.stores.catalog.get_product(current.product_id)?;
                    self.product_locks.with_lock(&product.id, || {
                        self.ensure_extension_fits(&current, &product, *new_end_at)?;
                        self.commit_transition(&current, &request, Some(&product), now)
                    })
                }
                _ => self.commit_transition(&current, &request, None, now),
            }
        })
    }

    fn ensure_extension_fits(
        &self,
        reservation: &Reservation,
        product: &Product,
        new_end_at: DateTime<Utc>,
    ) -> Result<()> {
        if new_end_at <= reservation.end_at {
            // the state machine reports this one
            return Ok(());
        }
        let others = self.occupancies(product.id, Some(reservation.id))?;
        let free = remaining_units(product, &others, reservation.end_at, new_end_at);
        if free < reservation.quantity {
            return Err(RentalError::limit_exceeded(format!(
                "cannot extend {} to {new_end_at}: only {free} units free",
                reservation.id
            )));
        }
        Ok(())
    }

    fn commit_transition(
        &self,
        current: &Reservation,
        request: &TransitionRequest,
        product: Option<&Product>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let lifecycle = LifecycleEngine::new(&self.config.lifecycle, &self.pricing);
        let outcome = lifecycle
            .apply_transition(current, request, TransitionContext { now, product })
            .map_err(|err| {
                tracing::warn!(reservation_id = %current.id, status = %current.status, error = %err, "transition rejected");
                err
            })?;

        if !outcome.changed {
            tracing::debug!(reservation_id = %current.id, status = %current.status, "transition already applied");
            return Ok(outcome);
        }

        self.stores
            .reservations
            .update_reservation(outcome.reservation.clone(), current.version)?;

        if let Some(audit) = &outcome.audit {
            if let Err(err) = self.stores.audit.append_lifecycle_event(audit.clone()) {
                tracing::error!(reservation_id = %current.id, error = %err, "audit append failed, restoring reservation");
                if let Err(restore_err) = self
                    .stores
                    .reservations
                    .update_reservation(current.clone(), outcome.reservation.version)
                {
                    tracing::error!(reservation_id = %current.id, error = %restore_err, "restore failed");
                }
                return Err(err);
            }
        }

        self.record(outcome.events.iter().cloned());
        tracing::info!(
            reservation_id = %current.id,
            from = %outcome.from,
            to = %outcome.reservation.status,
            version = outcome.reservation.version,
            "reservation transitioned"
        );
        Ok(outcome)
    }

    pub fn pick_up(&self, id: ReservationId, time: &SafeTimeProvider) -> Result<Reservation> {
        Ok(self.transition(id, TransitionRequest::PickUp, time)?.reservation)
    }

    pub fn return_item(
        &self,
        id: ReservationId,
        deductions: Vec<Deduction>,
        time: &SafeTimeProvider,
    ) -> Result<Reservation> {
        Ok(self
            .transition(id, TransitionRequest::Return { deductions }, time)?
            .reservation)
    }

    pub fn mark_late(&self, id: ReservationId, time: &SafeTimeProvider) -> Result<Reservation> {
        Ok(self.transition(id, TransitionRequest::MarkLate, time)?.reservation)
    }

    pub fn extend(
        &self,
        id: ReservationId,
        new_end_at: DateTime<Utc>,
        time: &SafeTimeProvider,
    ) -> Result<Reservation> {
        Ok(self
            .transition(id, TransitionRequest::Extend { new_end_at }, time)?
            .reservation)
    }

    pub fn cancel(&self, id: ReservationId, time: &SafeTimeProvider) -> Result<Reservation> {
        Ok(self.transition(id, TransitionRequest::Cancel, time)?.reservation)
    }

    // ---- installments ----

    pub fn create_installment_plan(
        &self,
        order_id: OrderId,
        total_amount: Money,
        plan_type: &str,
        time: &SafeTimeProvider,
    ) -> Result<InstallmentPlan> {
        let plan_type: PlanType = plan_type.parse()?;
        self.create_installment_plan_at(order_id, total_amount, plan_type, time.now())
    }

    pub fn create_installment_plan_at(
        &self,
        order_id: OrderId,
        total_amount: Money,
        plan_type: PlanType,
        now: DateTime<Utc>,
    ) -> Result<InstallmentPlan> {
        let plan = InstallmentPlan::generate(order_id, total_amount, plan_type, now)?;
        let plan = self.stores.plans.create_plan(plan)?;

        self.record([Event::PlanCreated {
            plan_id: plan.id,
            order_id,
            total_amount,
            installments: plan_type.installments(),
            timestamp: now,
        }]);
        tracing::info!(plan_id = %plan.id, %order_id, %total_amount, %plan_type, "installment plan created");
        Ok(plan)
    }

    pub fn get_plan(&self, plan_id: PlanId) -> Result<InstallmentPlan> {
        self.stores.plans.get_plan(plan_id)
    }

    /// idempotent; paying the last open installment completes the plan
    pub fn mark_installment_paid(
        &self,
        installment_id: InstallmentId,
        time: &SafeTimeProvider,
    ) -> Result<InstallmentPlan> {
        let now = time.now();
        let plan_id = self.stores.plans.find_plan_by_installment(installment_id)?.id;

        self.plan_locks.with_lock(&plan_id, || {
            let mut plan = self.stores.plans.get_plan(plan_id)?;
            match plan.mark_paid(installment_id, now)? {
                PaymentOutcome::AlreadyPaid => {
                    tracing::debug!(%plan_id, %installment_id, "installment already paid");
                    Ok(plan)
                }
                PaymentOutcome::Paid { amount, completed } => {
                    let plan = self.stores.plans.update_plan(plan)?;
                    let mut events = vec![Event::InstallmentPaid {
                        plan_id,
                        installment_id,
                        amount,
                        timestamp: now,
                    }];
                    if completed {
                        events.push(Event::PlanCompleted {
                            plan_id,
                            timestamp: now,
                        });
                    }
                    self.record(events);
                    tracing::info!(%plan_id, %installment_id, %amount, completed, "installment paid");
                    Ok(plan)
                }
            }
        })
    }

    /// flag overdue installments across all open plans
    pub fn refresh_overdue_installments(&self, time: &SafeTimeProvider) -> Result<OverdueSummary> {
        let now = time.now();
        let default_after = self.config.installments.default_after_days;
        let mut summary = OverdueSummary::default();

        for listed in self.stores.plans.list_plans()? {
            if listed.status == PlanStatus::Completed {
                continue;
            }
            summary.plans_checked += 1;

            let update = self.plan_locks.with_lock(&listed.id, || -> Result<_> {
                let mut plan = self.stores.plans.get_plan(listed.id)?;
                let update = plan.refresh_overdue(now, default_after);
                if update.newly_overdue.is_empty() && !update.defaulted {
                    return Ok(update);
                }

                let due_dates: Vec<_> = update
                    .newly_overdue
                    .iter()
                    .filter_map(|id| plan.installment(*id).map(|i| (*id, i.due_date)))
                    .collect();
                self.stores.plans.update_plan(plan)?;

                let mut events: Vec<Event> = due_dates
                    .into_iter()
                    .map(|(installment_id, due_date)| Event::InstallmentOverdue {
                        plan_id: listed.id,
                        installment_id,
                        due_date,
                        timestamp: now,
                    })
                    .collect();
                if update.defaulted {
                    tracing::warn!(plan_id = %listed.id, "installment plan defaulted");
                    events.push(Event::PlanDefaulted {
                        plan_id: listed.id,
                        timestamp: now,
                    });
                }
                self.record(events);
                Ok(update)
            })?;

            summary.installments_overdue += update.newly_overdue.len();
            if update.defaulted {
                summary.plans_defaulted += 1;
            }
        }

        tracing::info!(
            checked = summary.plans_checked,
            overdue = summary.installments_overdue,
            defaulted = summary.plans_defaulted,
            "overdue installment pass finished"
        );
        Ok(summary)
    }

    // ---- promo codes ----

    pub fn create_promo(&self, promo: PromoCode) -> Result<PromoCode> {
        let promo = PromoCode {
            code: normalize_code(&promo.code),
            ..promo
        };
        promo.validate()?;
        let promo = self.stores.promos.create_promo(promo)?;
        tracing::info!(code = %promo.code, kind = ?promo.kind, value = %promo.value, "promo created");
        Ok(promo)
    }

    pub fn get_promo(&self, code: &str) -> Result<PromoCode> {
        self.stores
            .promos
            .get_promo(code)?
            .ok_or_else(|| RentalError::not_found("promo", normalize_code(code)))
    }

    pub fn deactivate_promo(&self, code: &str) -> Result<PromoCode> {
        let key = normalize_code(code);
        self.promo_locks.with_lock(&key, || {
            let mut promo = self.get_promo(&key)?;
            promo.is_active = false;
            let promo = self.stores.promos.update_promo(promo)?;
            tracing::info!(code = %key, "promo deactivated");
            Ok(promo)
        })
    }

    pub fn validate_promo(
        &self,
        code: &str,
        order_amount: Money,
        time: &SafeTimeProvider,
    ) -> Result<PromoValidation> {
        self.validate_promo_at(code, order_amount, time.now())
    }

    /// read-only check; rejections are values, bad input is an error
    pub fn validate_promo_at(&self, code: &str, order_amount: Money, now: DateTime<Utc>) -> Result<PromoValidation> {
        if order_amount.is_negative() {
            return Err(RentalError::validation(format!(
                "order amount must not be negative, got {order_amount}"
            )));
        }
        let promo = self.stores.promos.get_promo(code)?;
        let validation = validate_promo(promo.as_ref(), order_amount, now);
        if let PromoValidation::Rejected(reason) = &validation {
            tracing::debug!(code = %normalize_code(code), %reason, "promo rejected");
        }
        Ok(validation)
    }

    /// count one use of a code
    ///
    /// Does not deduplicate per order; callers apply once per order.
    pub fn apply_promo(&self, code: &str) -> Result<PromoCode> {
        let key = normalize_code(code);
        self.promo_locks.with_lock(&key, || {
            let promo = self.get_promo(&key)?;
            if !promo.has_uses_left() {
                return Err(PromoRejection::UsageLimitExceeded.into());
            }
            self.stores.promos.increment_usage(&key, promo.used_count)
        })
    }

    pub fn redeem_promo(
        &self,
        code: &str,
        order_amount: Money,
        time: &SafeTimeProvider,
    ) -> Result<PromoQuote> {
        self.redeem_promo_at(code, order_amount, time.now())
    }

    /// validate then apply, under the code's lock
    pub fn redeem_promo_at(&self, code: &str, order_amount: Money, now: DateTime<Utc>) -> Result<PromoQuote> {
        let key = normalize_code(code);
        self.promo_locks.with_lock(&key, || {
            let quote = self.validate_promo_at(&key, order_amount, now)?.into_result()?;
            let used = self
                .stores
                .promos
                .get_promo(&key)?
                .map(|p| p.used_count)
                .ok_or_else(|| RentalError::not_found("promo", &key))?;
            let promo = self.stores.promos.increment_usage(&key, used)?;

            self.record([Event::PromoRedeemed {
                code: key.clone(),
                order_amount,
                discount_amount: quote.discount_amount,
                used_count: promo.used_count,
                timestamp: now,
            }]);
            tracing::info!(
                code = %key,
                %order_amount,
                discount = %quote.discount_amount,
                used_count = promo.used_count,
                "promo redeemed"
            );
            Ok(quote)
        })
    }
}

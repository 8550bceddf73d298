//! In-process stores for tests and demos.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    AuditLog, Catalog, InstallmentStore, LateReturnNotifier, PromoStore, ReservationFilter,
    ReservationStore, Stores,
};
use crate::errors::{RentalError, Result};
use crate::events::LifecycleEvent;
use crate::payments::{normalize_code, InstallmentPlan, PromoCode, PromoRejection};
use crate::reservation::Reservation;
use crate::types::{InstallmentId, PlanId, Product, ProductId, ReservationId};

fn poisoned(what: &str) -> RentalError {
    RentalError::Storage {
        message: format!("{what} lock poisoned"),
    }
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    products: DashMap<ProductId, Product>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product: Product) -> ProductId {
        let id = product.id;
        self.products.insert(id, product);
        id
    }
}

impl Catalog for MemoryCatalog {
    fn get_product(&self, id: ProductId) -> Result<Product> {
        self.products
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or_else(|| RentalError::not_found("product", id))
    }
}

#[derive(Debug, Default)]
pub struct MemoryReservationStore {
    rows: DashMap<ReservationId, Reservation>,
}

impl MemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl ReservationStore for MemoryReservationStore {
    fn create_reservation(&self, reservation: Reservation) -> Result<Reservation> {
        match self.rows.entry(reservation.id) {
            Entry::Occupied(_) => Err(RentalError::Conflict {
                entity: "reservation",
                id: reservation.id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(reservation.clone());
                Ok(reservation)
            }
        }
    }

    fn get_reservation(&self, id: ReservationId) -> Result<Reservation> {
        self.rows
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| RentalError::not_found("reservation", id))
    }

    fn update_reservation(&self, reservation: Reservation, expected_version: u64) -> Result<Reservation> {
        let mut row = self
            .rows
            .get_mut(&reservation.id)
            .ok_or_else(|| RentalError::not_found("reservation", reservation.id))?;
        if row.version != expected_version {
            return Err(RentalError::Conflict {
                entity: "reservation",
                id: reservation.id.to_string(),
            });
        }
        *row = reservation.clone();
        Ok(reservation)
    }

    fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>> {
        let mut out: Vec<Reservation> = self
            .rows
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    fn delete_reservation(&self, id: ReservationId) -> Result<()> {
        self.rows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RentalError::not_found("reservation", id))
    }
}

/// audit log that can be told to fail, for rollback tests
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<LifecycleEvent>>,
    failing: AtomicBool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_for(&self, reservation_id: ReservationId) -> Vec<LifecycleEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.reservation_id == reservation_id)
            .collect()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append_lifecycle_event(&self, event: LifecycleEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RentalError::Storage {
                message: "audit log unavailable".to_string(),
            });
        }
        self.events.lock().map_err(|_| poisoned("audit log"))?.push(event);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryPromoStore {
    codes: DashMap<String, PromoCode>,
}

impl MemoryPromoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PromoStore for MemoryPromoStore {
    fn create_promo(&self, mut promo: PromoCode) -> Result<PromoCode> {
        promo.code = normalize_code(&promo.code);
        match self.codes.entry(promo.code.clone()) {
            Entry::Occupied(_) => Err(RentalError::validation(format!(
                "promo code {} already exists",
                promo.code
            ))),
            Entry::Vacant(slot) => {
                slot.insert(promo.clone());
                Ok(promo)
            }
        }
    }

    fn get_promo(&self, code: &str) -> Result<Option<PromoCode>> {
        Ok(self.codes.get(&normalize_code(code)).map(|p| p.value().clone()))
    }

    fn update_promo(&self, promo: PromoCode) -> Result<PromoCode> {
        let key = normalize_code(&promo.code);
        let mut row = self
            .codes
            .get_mut(&key)
            .ok_or_else(|| RentalError::not_found("promo", &key))?;
        *row = promo.clone();
        Ok(promo)
    }

    fn increment_usage(&self, code: &str, expected_used_count: u32) -> Result<PromoCode> {
        let key = normalize_code(code);
        let mut row = self
            .codes
            .get_mut(&key)
            .ok_or_else(|| RentalError::not_found("promo", &key))?;
        if row.used_count != expected_used_count {
            return Err(RentalError::Conflict {
                entity: "promo",
                id: key,
            });
        }
        if !row.has_uses_left() {
            return Err(PromoRejection::UsageLimitExceeded.into());
        }
        row.record_use()?;
        Ok(row.value().clone())
    }

    fn list_promos(&self) -> Result<Vec<PromoCode>> {
        let mut out: Vec<PromoCode> = self.codes.iter().map(|p| p.value().clone()).collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct MemoryInstallmentStore {
    plans: DashMap<PlanId, InstallmentPlan>,
    by_installment: DashMap<InstallmentId, PlanId>,
}

impl MemoryInstallmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstallmentStore for MemoryInstallmentStore {
    fn create_plan(&self, plan: InstallmentPlan) -> Result<InstallmentPlan> {
        match self.plans.entry(plan.id) {
            Entry::Occupied(_) => Err(RentalError::Conflict {
                entity: "installment plan",
                id: plan.id.to_string(),
            }),
            Entry::Vacant(slot) => {
                for installment in &plan.installments {
                    self.by_installment.insert(installment.id, plan.id);
                }
                slot.insert(plan.clone());
                Ok(plan)
            }
        }
    }

    fn get_plan(&self, id: PlanId) -> Result<InstallmentPlan> {
        self.plans
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or_else(|| RentalError::not_found("installment plan", id))
    }

    fn find_plan_by_installment(&self, installment_id: InstallmentId) -> Result<InstallmentPlan> {
        let plan_id = self
            .by_installment
            .get(&installment_id)
            .map(|p| *p.value())
            .ok_or_else(|| RentalError::not_found("installment", installment_id))?;
        self.get_plan(plan_id)
    }

    fn update_plan(&self, plan: InstallmentPlan) -> Result<InstallmentPlan> {
        let mut row = self
            .plans
            .get_mut(&plan.id)
            .ok_or_else(|| RentalError::not_found("installment plan", plan.id))?;
        *row = plan.clone();
        Ok(plan)
    }

    fn list_plans(&self) -> Result<Vec<InstallmentPlan>> {
        let mut out: Vec<InstallmentPlan> = self.plans.iter().map(|p| p.value().clone()).collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

/// notifier that records deliveries and can fail or stall on demand
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<ReservationId>>,
    attempts: AtomicU32,
    failures_left: AtomicU32,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// fail the next `n` attempts
    pub fn failing_first(n: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(n),
            ..Self::default()
        }
    }

    /// sleep before every delivery
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn delivered(&self) -> Vec<ReservationId> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LateReturnNotifier for RecordingNotifier {
    async fn notify_late_return(&self, reservation: &Reservation) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(RentalError::Storage {
                message: format!("notification gateway rejected {}", reservation.id),
            });
        }
        self.delivered
            .lock()
            .map_err(|_| poisoned("notifier"))?
            .push(reservation.id);
        Ok(())
    }
}

/// concrete in-memory stores kept alongside the `dyn` handles the engine sees
#[derive(Debug, Clone, Default)]
pub struct InMemory {
    pub catalog: Arc<MemoryCatalog>,
    pub reservations: Arc<MemoryReservationStore>,
    pub audit: Arc<MemoryAuditLog>,
    pub promos: Arc<MemoryPromoStore>,
    pub plans: Arc<MemoryInstallmentStore>,
}

impl InMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stores(&self) -> Stores {
        Stores {
            catalog: self.catalog.clone(),
            reservations: self.reservations.clone(),
            audit: self.audit.clone(),
            promos: self.promos.clone(),
            plans: self.plans.clone(),
        }
    }
}

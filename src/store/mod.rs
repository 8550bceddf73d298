//! Collaborator seams the engine reads and writes through.
//!
//! Every trait is object safe and `Send + Sync` so the engine can hold them as
//! `Arc<dyn ..>` and share them with the sweeper.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::Result;
use crate::events::LifecycleEvent;
use crate::payments::{InstallmentPlan, PromoCode};
use crate::reservation::Reservation;
use crate::types::{InstallmentId, PlanId, Product, ProductId, ReservationId, ReservationStatus};

pub use memory::{
    InMemory, MemoryAuditLog, MemoryCatalog, MemoryInstallmentStore, MemoryPromoStore,
    MemoryReservationStore, RecordingNotifier,
};

/// read-only product catalog
pub trait Catalog: Send + Sync {
    fn get_product(&self, id: ProductId) -> Result<Product>;
}

/// reservation query; empty fields match everything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub status: Option<ReservationStatus>,
    pub product_id: Option<ProductId>,
}

impl ReservationFilter {
    pub fn with_status(status: ReservationStatus) -> Self {
        Self {
            status: Some(status),
            product_id: None,
        }
    }

    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            status: None,
            product_id: Some(product_id),
        }
    }

    pub fn matches(&self, reservation: &Reservation) -> bool {
        self.status.map_or(true, |s| reservation.status == s)
            && self.product_id.map_or(true, |p| reservation.product_id == p)
    }
}

pub trait ReservationStore: Send + Sync {
    fn create_reservation(&self, reservation: Reservation) -> Result<Reservation>;

    fn get_reservation(&self, id: ReservationId) -> Result<Reservation>;

    /// replace the stored row only if its version still equals `expected_version`
    fn update_reservation(&self, reservation: Reservation, expected_version: u64) -> Result<Reservation>;

    fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>>;

    /// only used to undo a create whose audit record could not be written
    fn delete_reservation(&self, id: ReservationId) -> Result<()>;
}

/// append-only lifecycle history
pub trait AuditLog: Send + Sync {
    fn append_lifecycle_event(&self, event: LifecycleEvent) -> Result<()>;
}

/// best-effort late-return delivery (sms, email)
#[async_trait]
pub trait LateReturnNotifier: Send + Sync {
    async fn notify_late_return(&self, reservation: &Reservation) -> Result<()>;
}

pub trait PromoStore: Send + Sync {
    /// duplicate codes are rejected
    fn create_promo(&self, promo: PromoCode) -> Result<PromoCode>;

    /// case-insensitive lookup
    fn get_promo(&self, code: &str) -> Result<Option<PromoCode>>;

    fn update_promo(&self, promo: PromoCode) -> Result<PromoCode>;

    /// add one use if the stored count still equals `expected_used_count`
    fn increment_usage(&self, code: &str, expected_used_count: u32) -> Result<PromoCode>;

    fn list_promos(&self) -> Result<Vec<PromoCode>>;
}

pub trait InstallmentStore: Send + Sync {
    fn create_plan(&self, plan: InstallmentPlan) -> Result<InstallmentPlan>;

    fn get_plan(&self, id: PlanId) -> Result<InstallmentPlan>;

    fn find_plan_by_installment(&self, installment_id: InstallmentId) -> Result<InstallmentPlan>;

    fn update_plan(&self, plan: InstallmentPlan) -> Result<InstallmentPlan>;

    fn list_plans(&self) -> Result<Vec<InstallmentPlan>>;
}

/// the set of collaborators a [`crate::engine::RentalEngine`] is wired to
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn Catalog>,
    pub reservations: Arc<dyn ReservationStore>,
    pub audit: Arc<dyn AuditLog>,
    pub promos: Arc<dyn PromoStore>,
    pub plans: Arc<dyn InstallmentStore>,
}

pub mod availability;
pub mod config;
pub mod decimal;
pub mod engine;
pub mod errors;
pub mod events;
pub mod locks;
pub mod payments;
pub mod pricing;
pub mod reservation;
pub mod store;
pub mod sweeper;
pub mod types;

// re-export key types
pub use availability::{check_availability, overlaps, remaining_units, Occupancy};
pub use config::{
    EngineConfig, ExtensionPricing, InstallmentConfig, LifecycleConfig, PricingConfig,
    SweeperConfig,
};
pub use decimal::{Money, Rate};
pub use engine::{CheckoutReceipt, CheckoutRequest, OverdueSummary, RentalEngine};
pub use errors::{RentalError, Result};
pub use events::{Event, EventStore, LifecycleEvent};
pub use payments::{
    Installment, InstallmentPlan, InstallmentStatus, PlanStatus, PlanType, PromoCode, PromoKind,
    PromoOutcome, PromoQuote, PromoRejection, PromoValidation,
};
pub use pricing::{Discount, DiscountKind, PriceQuote, PricelistCatalog, PricelistRule, PricingCalculator};
pub use reservation::{
    Deduction, DepositSettlement, LateFeePolicy, LifecycleEngine, Reservation, TransitionOutcome,
    TransitionRequest,
};
pub use store::{
    AuditLog, Catalog, InMemory, InstallmentStore, LateReturnNotifier, PromoStore,
    ReservationFilter, ReservationStore, Stores,
};
pub use sweeper::{DeliveryStats, LateReturnSweeper, NotificationDispatcher, NotificationWorker, SweepSummary};
pub use types::{
    AvailabilityStatus, DateWindow, InstallmentId, OrderId, PlanId, Product, ProductId,
    ReservationId, ReservationStatus, TenureUnit,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;

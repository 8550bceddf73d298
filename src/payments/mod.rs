pub mod installments;
pub mod promo;

pub use installments::{
    Installment, InstallmentPlan, InstallmentStatus, OverdueUpdate, PaymentOutcome, PlanStatus,
    PlanType,
};
pub use promo::{
    normalize_code, validate_promo, PromoCode, PromoKind, PromoOutcome, PromoQuote,
    PromoRejection, PromoValidation,
};

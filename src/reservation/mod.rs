pub mod fees;
pub mod lifecycle;
pub mod state;

pub use fees::{Deduction, DepositSettlement, LateFeeCalculation, LateFeePolicy};
pub use lifecycle::{
    LifecycleEngine, StockEffect, TransitionContext, TransitionEffects, TransitionOutcome,
    TransitionRequest,
};
pub use state::{can_transition, NewReservation, Reservation};

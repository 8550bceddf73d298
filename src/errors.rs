use thiserror::Error;

use crate::types::ReservationStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RentalError {
    /// bad input shape: unknown tenure, non-positive quantity, malformed window
    #[error("validation failed: {message}")]
    Validation {
        message: String,
    },

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("{entity} not found: {id}")]
    NotFound {
        entity: &'static str,
        id: String,
    },

    /// promo usage cap, or a quantity beyond on-hand stock
    #[error("limit exceeded: {message}")]
    LimitExceeded {
        message: String,
    },

    #[error("{message}")]
    ExpiredOrInactive {
        message: String,
    },

    #[error("invalid plan type: {plan_type}")]
    InvalidPlanType {
        plan_type: String,
    },

    /// optimistic version check lost against a concurrent writer
    #[error("concurrent modification of {entity} {id}")]
    Conflict {
        entity: &'static str,
        id: String,
    },

    #[error("storage error: {message}")]
    Storage {
        message: String,
    },
}

impl RentalError {
    pub fn validation(message: impl Into<String>) -> Self {
        RentalError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        RentalError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        RentalError::LimitExceeded {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RentalError>;

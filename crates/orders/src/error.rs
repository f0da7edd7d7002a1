use common::OrderId;
use domain::{CollaboratorError, TransitionError};
use gateway::PaymentError;
use store::StoreError;
use thiserror::Error;

/// Errors returned by lifecycle operations.
#[derive(Debug, Error)]
pub enum OrderServiceError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Payment failed: {0}")]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The order is past the notice window or already in service.
    #[error("Order {order_id} cannot be rescheduled: {reason}")]
    RescheduleNotAllowed { order_id: OrderId, reason: String },
}

impl OrderServiceError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, OrderServiceError::Store(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OrderServiceError::Store(StoreError::OrderNotFound(_)))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            OrderServiceError::Store(e) => e.is_retryable(),
            OrderServiceError::Payment(e) => e.is_retryable(),
            OrderServiceError::Collaborator(e) => e.is_retryable(),
            OrderServiceError::Transition(_)
            | OrderServiceError::Validation(_)
            | OrderServiceError::RescheduleNotAllowed { .. } => false,
        }
    }

    /// Message safe to show to the person who made the request.
    pub fn user_message(&self) -> &'static str {
        match self {
            OrderServiceError::Payment(e) => e.user_message(),
            e if e.is_conflict() => {
                "This order changed while you were working on it. Please refresh and try again."
            }
            e if e.is_not_found() => "We could not find that order.",
            OrderServiceError::Transition(TransitionError::Unauthorized { .. }) => {
                "You are not allowed to make this change to the order."
            }
            OrderServiceError::Transition(_) => "This change is not possible for the order right now.",
            OrderServiceError::RescheduleNotAllowed { .. } => {
                "This order can no longer be rescheduled. Please cancel and book again."
            }
            OrderServiceError::Validation(_) => "The request was not valid.",
            _ => "Something went wrong. Please try again shortly.",
        }
    }
}

pub type Result<T> = std::result::Result<T, OrderServiceError>;

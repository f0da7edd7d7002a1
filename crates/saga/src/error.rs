//! Saga error types.

use common::{OrderId, SagaId};
use domain::{CollaboratorError, ServiceType};
use orders::OrderServiceError;
use store::StoreError;
use thiserror::Error;

/// A saga that ran at least one step and was compensated.
#[derive(Debug, Error)]
#[error("Saga {saga_id} failed at step '{step}': {cause}")]
pub struct SagaFailure {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub step: &'static str,
    #[source]
    pub cause: OrderServiceError,
    /// A compensating action failed, or a payment call ended without a
    /// definite answer, and an operator must reconcile the gateway against
    /// the order records.
    pub reconciliation_required: bool,
}

/// Errors that can occur during saga execution.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The booking request was rejected before any step ran.
    #[error("Invalid booking: {0}")]
    Validation(String),

    #[error("No active cancellation policy for {0}")]
    NoActivePolicy(ServiceType),

    #[error("Policy store error: {0}")]
    Policy(#[from] CollaboratorError),

    /// The saga record could not be created; nothing ran.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Failed(#[from] SagaFailure),
}

impl SagaError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::Validation(_) | SagaError::NoActivePolicy(_) => false,
            SagaError::Policy(e) => e.is_retryable(),
            SagaError::Store(e) => e.is_retryable(),
            SagaError::Failed(f) => f.cause.is_retryable(),
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            SagaError::Failed(f) => f.cause.user_message(),
            SagaError::Validation(_) => "The booking request was not valid.",
            _ => "We could not complete your booking right now. Please try again shortly.",
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

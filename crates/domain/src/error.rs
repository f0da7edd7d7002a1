//! Domain error types.

use thiserror::Error;

use crate::order::{Actor, Condition, OrderStatus};

/// Reasons a requested transition is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// No rule declares this edge for the order's service type.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The edge exists but not for this actor.
    #[error("Unauthorized: {actor} may not move an order from {from} to {to}")]
    Unauthorized {
        actor: Actor,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// A required condition evaluated false.
    #[error("Condition not met: {0}")]
    ConditionNotMet(Condition),
}

/// Failures reported by external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The collaborator could not be reached.
    #[error("{collaborator} unavailable: {message}")]
    Unavailable {
        collaborator: &'static str,
        message: String,
    },

    /// The collaborator refused the request.
    #[error("{collaborator} rejected request: {message}")]
    Rejected {
        collaborator: &'static str,
        message: String,
    },
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Unavailable { .. })
    }
}

use common::{OrderId, SagaId, Version};
use domain::CollaboratorError;
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer updated the order first. The caller must re-read.
    #[error("Version conflict for order {order_id}: expected version {expected}")]
    Conflict { order_id: OrderId, expected: Version },

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Order already exists: {0}")]
    OrderExists(OrderId),

    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// The saga reached a terminal status and no longer accepts writes.
    #[error("Saga {0} is closed")]
    SagaClosed(SagaId),

    /// The webhook event was already recorded by another delivery.
    #[error("Webhook event already processed: {0}")]
    DuplicateEvent(String),

    /// The backend could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be decoded into a domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Returns true if retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Conflict { .. } | StoreError::Unavailable(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

impl From<StoreError> for CollaboratorError {
    fn from(err: StoreError) -> Self {
        if err.is_retryable() {
            CollaboratorError::Unavailable {
                collaborator: "policy store",
                message: err.to_string(),
            }
        } else {
            CollaboratorError::Rejected {
                collaborator: "policy store",
                message: err.to_string(),
            }
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

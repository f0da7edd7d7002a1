use common::OrderId;
use domain::TransitionError;
use orders::OrderServiceError;
use store::StoreError;
use thiserror::Error;

/// Errors returned while handling a webhook delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Permanent: the delivery is not from the gateway.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Permanent: the body could not be understood.
    #[error("Malformed webhook payload: {0}")]
    Malformed(String),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Lifecycle(OrderServiceError),
}

impl WebhookError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, WebhookError::Store(e) if e.is_conflict())
    }

    /// Returns true if the gateway should redeliver later.
    pub fn is_retryable(&self) -> bool {
        match self {
            WebhookError::Store(e) => e.is_retryable(),
            WebhookError::Lifecycle(e) => e.is_retryable(),
            WebhookError::InvalidSignature
            | WebhookError::Malformed(_)
            | WebhookError::OrderNotFound(_)
            | WebhookError::Transition(_) => false,
        }
    }
}

impl From<StoreError> for WebhookError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OrderNotFound(id) => WebhookError::OrderNotFound(id),
            other => WebhookError::Store(other),
        }
    }
}

impl From<OrderServiceError> for WebhookError {
    fn from(err: OrderServiceError) -> Self {
        match err {
            OrderServiceError::Transition(e) => WebhookError::Transition(e),
            OrderServiceError::Store(e) => e.into(),
            other => WebhookError::Lifecycle(other),
        }
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::Malformed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WebhookError>;

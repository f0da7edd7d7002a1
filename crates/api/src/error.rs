//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::TransitionError;
use orders::OrderServiceError;
use saga::SagaError;
use store::StoreError;
use thiserror::Error;
use webhooks::WebhookError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Order(#[from] OrderServiceError),

    #[error(transparent)]
    Saga(#[from] SagaError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Order(err) => order_status(err),
            ApiError::Saga(err) => saga_status(err),
            ApiError::Webhook(err) => webhook_status(err),
            ApiError::Store(err) => store_status(err),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            ApiError::BadRequest(_) => false,
            ApiError::Order(err) => err.is_retryable(),
            ApiError::Saga(err) => err.is_retryable(),
            ApiError::Webhook(err) => err.is_retryable(),
            ApiError::Store(err) => err.is_retryable(),
        }
    }

    fn user_message(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "The request was not valid.",
            ApiError::Order(err) => err.user_message(),
            ApiError::Saga(err) => err.user_message(),
            ApiError::Webhook(_) | ApiError::Store(_) => "The request could not be processed.",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, %status, "request failed");
        } else {
            tracing::warn!(error = %self, %status, "request rejected");
        }

        let mut body = serde_json::json!({
            "error": self.to_string(),
            "message": self.user_message(),
            "retryable": self.retryable(),
        });
        if let ApiError::Saga(SagaError::Failed(failure)) = &self {
            body["saga_id"] = serde_json::json!(failure.saga_id);
            body["failed_step"] = serde_json::json!(failure.step);
            body["reconciliation_required"] = serde_json::json!(failure.reconciliation_required);
        }
        (status, axum::Json(body)).into_response()
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::OrderNotFound(_) | StoreError::SagaNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict { .. } | StoreError::OrderExists(_) | StoreError::SagaClosed(_) => {
            StatusCode::CONFLICT
        }
        e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn transition_status(err: &TransitionError) -> StatusCode {
    match err {
        TransitionError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        TransitionError::InvalidTransition { .. } | TransitionError::ConditionNotMet(_) => {
            StatusCode::CONFLICT
        }
    }
}

fn order_status(err: &OrderServiceError) -> StatusCode {
    match err {
        OrderServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        OrderServiceError::RescheduleNotAllowed { .. } => StatusCode::CONFLICT,
        OrderServiceError::Transition(e) => transition_status(e),
        OrderServiceError::Store(e) => store_status(e),
        OrderServiceError::Payment(e) if e.kind.is_card_error() => StatusCode::PAYMENT_REQUIRED,
        OrderServiceError::Payment(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        OrderServiceError::Payment(_) => StatusCode::INTERNAL_SERVER_ERROR,
        OrderServiceError::Collaborator(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        OrderServiceError::Collaborator(_) => StatusCode::CONFLICT,
    }
}

fn saga_status(err: &SagaError) -> StatusCode {
    match err {
        SagaError::Validation(_) => StatusCode::BAD_REQUEST,
        SagaError::Failed(failure) => order_status(&failure.cause),
        SagaError::Store(e) => store_status(e),
        SagaError::Policy(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        SagaError::Policy(_) | SagaError::NoActivePolicy(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn webhook_status(err: &WebhookError) -> StatusCode {
    match err {
        WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
        WebhookError::Malformed(_) => StatusCode::BAD_REQUEST,
        WebhookError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        WebhookError::Transition(e) => transition_status(e),
        // The gateway redelivers on 5xx.
        WebhookError::Store(e) if e.is_conflict() => StatusCode::SERVICE_UNAVAILABLE,
        WebhookError::Store(e) => store_status(e),
        WebhookError::Lifecycle(e) => order_status(e),
    }
}

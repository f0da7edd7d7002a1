//! Error classifier.
//!
//! Maps guard and gateway failures onto the payment error taxonomy, with
//! retryability and a message that can be shown to the customer.

use serde::Serialize;
use thiserror::Error;

use crate::error::{GatewayError, GuardError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentErrorKind {
    CardDeclined,
    InsufficientFunds,
    ExpiredCard,
    NetworkError,
    RateLimited,
    CircuitOpen,
    QuotaExceeded,
    Unknown,
}

impl PaymentErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentErrorKind::CardDeclined => "card_declined",
            PaymentErrorKind::InsufficientFunds => "insufficient_funds",
            PaymentErrorKind::ExpiredCard => "expired_card",
            PaymentErrorKind::NetworkError => "network_error",
            PaymentErrorKind::RateLimited => "rate_limited",
            PaymentErrorKind::CircuitOpen => "circuit_open",
            PaymentErrorKind::QuotaExceeded => "quota_exceeded",
            PaymentErrorKind::Unknown => "unknown",
        }
    }

    /// Card problems the customer must fix by switching payment method.
    pub fn is_card_error(&self) -> bool {
        matches!(
            self,
            PaymentErrorKind::CardDeclined
                | PaymentErrorKind::InsufficientFunds
                | PaymentErrorKind::ExpiredCard
        )
    }
}

impl std::fmt::Display for PaymentErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified payment failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct PaymentError {
    pub kind: PaymentErrorKind,
    pub retryable: bool,
    pub user_message: &'static str,
    /// The underlying error, for logs.
    pub detail: String,
}

impl PaymentError {
    fn new(kind: PaymentErrorKind, detail: impl Into<String>) -> Self {
        let (retryable, user_message) = match kind {
            PaymentErrorKind::CardDeclined => (
                false,
                "Your card was declined. Please use a different payment method.",
            ),
            PaymentErrorKind::InsufficientFunds => (
                false,
                "Your card has insufficient funds. Please use a different payment method.",
            ),
            PaymentErrorKind::ExpiredCard => (
                false,
                "Your card has expired. Please update your payment method.",
            ),
            PaymentErrorKind::NetworkError => (
                true,
                "We could not reach our payment provider. Please try again in a moment.",
            ),
            PaymentErrorKind::RateLimited => (
                true,
                "Our payment provider is busy. Please try again in a moment.",
            ),
            PaymentErrorKind::CircuitOpen | PaymentErrorKind::QuotaExceeded => (
                true,
                "Payments are temporarily unavailable. Please try again shortly.",
            ),
            PaymentErrorKind::Unknown => (
                false,
                "Something went wrong processing your payment. Please contact support.",
            ),
        };
        Self {
            kind,
            retryable,
            user_message,
            detail: detail.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn user_message(&self) -> &'static str {
        self.user_message
    }

    /// The request may have reached the gateway, so whether it took effect
    /// is not known.
    pub fn outcome_unknown(&self) -> bool {
        self.kind == PaymentErrorKind::NetworkError
    }
}

fn classify_gateway(err: &GatewayError) -> PaymentErrorKind {
    match err {
        GatewayError::Declined { code, .. } => match code.as_str() {
            "insufficient_funds" => PaymentErrorKind::InsufficientFunds,
            "expired_card" => PaymentErrorKind::ExpiredCard,
            _ => PaymentErrorKind::CardDeclined,
        },
        GatewayError::Timeout | GatewayError::Connection(_) => PaymentErrorKind::NetworkError,
        GatewayError::RateLimited => PaymentErrorKind::RateLimited,
        GatewayError::Api { status: 429, .. } => PaymentErrorKind::RateLimited,
        GatewayError::Api { status, .. } if *status >= 500 => PaymentErrorKind::NetworkError,
        GatewayError::Api { .. } | GatewayError::InvalidRequest(_) => PaymentErrorKind::Unknown,
    }
}

/// Classifies a guarded gateway failure.
pub fn classify(err: &GuardError) -> PaymentError {
    let kind = match err {
        GuardError::CircuitOpen { .. } => PaymentErrorKind::CircuitOpen,
        GuardError::QuotaExceeded { .. } => PaymentErrorKind::QuotaExceeded,
        GuardError::Timeout(_) => PaymentErrorKind::NetworkError,
        GuardError::Gateway(inner) => classify_gateway(inner),
    };
    PaymentError::new(kind, err.to_string())
}

impl From<GuardError> for PaymentError {
    fn from(err: GuardError) -> Self {
        classify(&err)
    }
}

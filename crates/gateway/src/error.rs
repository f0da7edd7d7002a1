use std::time::Duration;

use thiserror::Error;

/// Raw failures reported by the payment gateway client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The issuer or gateway declined the card.
    #[error("Card declined ({code}): {message}")]
    Declined { code: String, message: String },

    #[error("Gateway request timed out")]
    Timeout,

    #[error("Gateway connection error: {0}")]
    Connection(String),

    #[error("Gateway rate limit hit")]
    RateLimited,

    #[error("Gateway API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request referenced an unknown object or was malformed.
    #[error("Invalid gateway request: {0}")]
    InvalidRequest(String),
}

/// Errors produced by the gateway guard around a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// The breaker is failing fast; the gateway was not called.
    #[error("Circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: &'static str },

    /// Waiting for quota would exceed the configured limit.
    #[error("Gateway quota exceeded; next slot in {retry_after:?}")]
    QuotaExceeded { retry_after: Duration },

    /// The call did not finish within the guard timeout.
    #[error("Gateway call timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

//! Payment gateway client, error classifier and the guard that isolates the
//! lifecycle engine from gateway failures.

pub mod breaker;
pub mod classify;
pub mod client;
pub mod error;
pub mod guard;
pub mod memory;
pub mod quota;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker, Permit};
pub use classify::{PaymentError, PaymentErrorKind, classify};
pub use client::{Authorization, PaymentGateway};
pub use error::{GatewayError, GuardError};
pub use guard::{CallKind, GatewayGuard, GuardConfig, GuardStatus, GuardedGateway};
pub use memory::{GatewayOp, InMemoryGateway};
pub use quota::{QuotaConfig, QuotaLimiter};

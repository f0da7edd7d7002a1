//! Order lifecycle operations.
//!
//! [`OrderTransitions`] is the guarded write path for status changes;
//! [`OrderService`] builds cancel, reschedule, quotes and overrides on top
//! of it.

pub mod config;
pub mod error;
pub mod service;
pub mod transitions;

pub use config::LifecycleConfig;
pub use error::{OrderServiceError, Result};
pub use service::{CancelOutcome, OrderService, RescheduleOutcome, StatusUpdate};
pub use transitions::{Applied, OrderTransitions, PendingTransition};

//! Payment authorization saga for new bookings.
//!
//! A booking runs three steps in order:
//! 1. Create the draft order with the active policy snapshot locked on it
//! 2. Secure payment with the configured [`PaymentStrategy`]
//! 3. Finalize the order to `scheduled` and close the saga in the same write
//!
//! If any step fails, executed steps are compensated in reverse order.

pub mod coordinator;
pub mod error;
pub mod strategy;

pub use coordinator::{
    BookingRequest, PaymentAuthorizationSaga, STEP_CREATE_DRAFT, STEP_FINALIZE,
    STEP_SECURE_PAYMENT,
};
pub use error::{Result, SagaError, SagaFailure};
pub use strategy::PaymentStrategy;

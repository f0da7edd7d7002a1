//! The order entity, its lifecycle states and the transition table.

mod entity;
mod machine;
mod status;
mod transitions;
mod value_objects;

pub use entity::{BookingDetails, CancellationRecord, Order};
pub use machine::{StateMachine, TransitionContext, quote_within_threshold};
pub use status::OrderStatus;
pub use transitions::{Condition, MAX_CHARGE_ATTEMPTS, SideEffect, TRANSITIONS, Transition};
pub use value_objects::{Actor, PaymentRefs, RefundStatus, ServiceType, SlotId};

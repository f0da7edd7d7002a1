//! Domain layer for the order lifecycle engine.
//!
//! This crate provides:
//! - The Order entity and its closed set of lifecycle states
//! - A declarative transition table and the validator over it
//! - The cancellation/reschedule policy engine
//! - Payment saga records
//! - Ports for the capacity allocator, notification dispatcher and policy store

pub mod error;
pub mod order;
pub mod policy;
pub mod ports;
pub mod saga;

pub use error::{CollaboratorError, TransitionError};
pub use order::{
    Actor, BookingDetails, CancellationRecord, Condition, Order, OrderStatus, PaymentRefs,
    RefundStatus, ServiceType, SideEffect, SlotId, StateMachine, Transition, TransitionContext,
};
pub use policy::{CancellationPolicy, FeeQuote, FeeRate, PolicyEngine, PolicySnapshot};
pub use ports::{
    CapacityAllocator, InMemoryCapacity, NotificationDispatcher, PolicyStore, RecordingDispatcher,
};
pub use saga::{PaymentSaga, SagaStatus, SagaStep, StepRecord, StrategyKind};

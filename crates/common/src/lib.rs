//! Shared types for the order lifecycle engine.

mod money;
mod types;
mod version;

pub use money::Money;
pub use types::{CustomerId, OrderId, SagaId};
pub use version::Version;

//! Persistence for the order lifecycle engine.
//!
//! Orders change only through [`OrderStore::update_with_version`], a
//! conditional write on the row version. The saga log, webhook ledger and
//! audit log are committed inside the same write when an [`OrderUpdate`]
//! carries them.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;
pub mod update;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, UpdateFault};
pub use postgres::PostgresStore;
pub use records::{AuditEntry, EventOutcome, SaveResult, WebhookRecord};
pub use store::{LifecycleStore, OrderStore, OrderStoreExt, SagaStore, WebhookLedger};
pub use update::{Mutation, OrderUpdate};

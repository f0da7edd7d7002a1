use async_trait::async_trait;
use common::{OrderId, SagaId};
use domain::{Order, PaymentSaga, StepRecord};

use crate::records::{AuditEntry, SaveResult, WebhookRecord};
use crate::update::OrderUpdate;
use crate::{Result, StoreError};

/// Order persistence with optimistic concurrency.
///
/// [`OrderStore::update_with_version`] is the only way to change an existing
/// row. Rows are never deleted once they leave `draft`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order. Fails with `OrderExists` if the id is taken.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Applies `update` if the row is still at `update.expected_version`.
    ///
    /// Returns the written row at `expected_version + 1`, or `Conflict` if
    /// another writer got there first.
    async fn update_with_version(&self, id: OrderId, update: OrderUpdate) -> Result<Order>;

    /// Deletes the row if and only if it is still in `draft`.
    ///
    /// Returns true if a row was deleted.
    async fn delete_draft(&self, id: OrderId) -> Result<bool>;

    /// Returns the order's audit log, oldest first.
    async fn audit_trail(&self, id: OrderId) -> Result<Vec<AuditEntry>>;
}

/// Append-only saga log.
#[async_trait]
pub trait SagaStore: Send + Sync {
    async fn create_saga(&self, saga: &PaymentSaga) -> Result<()>;

    /// Appends a step. Fails with `SagaClosed` once the saga is terminal.
    async fn append_step(&self, id: SagaId, step: StepRecord) -> Result<()>;

    /// Marks the saga failed. Fails with `SagaClosed` once terminal.
    async fn fail_saga(&self, id: SagaId, error: &str, needs_reconciliation: bool) -> Result<()>;

    async fn get_saga(&self, id: SagaId) -> Result<Option<PaymentSaga>>;
}

/// Idempotency ledger for gateway events.
#[async_trait]
pub trait WebhookLedger: Send + Sync {
    async fn find_event(&self, event_id: &str) -> Result<Option<WebhookRecord>>;

    /// Records an event that did not change any order.
    async fn record_event(&self, record: &WebhookRecord) -> Result<SaveResult>;
}

/// Convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Loads an order, failing with `OrderNotFound` if absent.
    async fn require_order(&self, id: OrderId) -> Result<Order> {
        self.get_order(id).await?.ok_or(StoreError::OrderNotFound(id))
    }
}

impl<T: OrderStore + ?Sized> OrderStoreExt for T {}

/// Every store capability the lifecycle engine needs.
pub trait LifecycleStore: OrderStore + SagaStore + WebhookLedger + domain::PolicyStore {}

impl<T: OrderStore + SagaStore + WebhookLedger + domain::PolicyStore + ?Sized> LifecycleStore for T {}

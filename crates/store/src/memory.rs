use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, SagaId};
use domain::{
    CancellationPolicy, CollaboratorError, Order, OrderStatus, PaymentSaga, PolicyStore,
    SagaStatus, ServiceType, StepRecord,
};
use tokio::sync::RwLock;

use crate::records::{AuditEntry, SaveResult, WebhookRecord};
use crate::store::{OrderStore, SagaStore, WebhookLedger};
use crate::update::{OrderUpdate, next_row};
use crate::{Result, StoreError};

/// Failure returned by an injected [`InMemoryStore::fail_updates`] plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFault {
    Unavailable,
    Conflict,
}

#[derive(Debug)]
struct UpdateFaults {
    skip: usize,
    remaining: usize,
    fault: UpdateFault,
}

#[derive(Debug, Default)]
struct MemoryState {
    orders: HashMap<OrderId, Order>,
    audit: Vec<AuditEntry>,
    sagas: HashMap<SagaId, PaymentSaga>,
    events: HashMap<String, WebhookRecord>,
    policies: Vec<CancellationPolicy>,
    unavailable: bool,
    fail_on_insert: bool,
    fail_on_update: bool,
    update_faults: Option<UpdateFaults>,
}

impl MemoryState {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

/// In-memory store implementation for testing and the default binary.
///
/// One lock covers every table, so an [`OrderUpdate`] is applied atomically
/// the same way the PostgreSQL transaction applies it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    event_lookups: Arc<AtomicUsize>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `Unavailable` while set.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Makes `insert_order` fail with `Unavailable` while set.
    pub async fn set_fail_on_insert(&self, fail: bool) {
        self.state.write().await.fail_on_insert = fail;
    }

    /// Makes `update_with_version` fail with `Unavailable` while set.
    pub async fn set_fail_on_update(&self, fail: bool) {
        self.state.write().await.fail_on_update = fail;
    }

    /// Lets the next `skip` version-guarded updates through, then fails the
    /// following `count` with `fault`.
    pub async fn fail_updates(&self, skip: usize, count: usize, fault: UpdateFault) {
        self.state.write().await.update_faults = Some(UpdateFaults {
            skip,
            remaining: count,
            fault,
        });
    }

    /// Returns the number of order rows.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the number of rows not in `draft`.
    pub async fn non_draft_count(&self) -> usize {
        self.state
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.status != OrderStatus::Draft)
            .count()
    }

    /// Returns the number of ledger rows.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Returns how many times the ledger was consulted.
    pub fn event_lookup_count(&self) -> usize {
        self.event_lookups.load(Ordering::SeqCst)
    }

    /// Clears all rows and failure flags.
    pub async fn clear(&self) {
        *self.state.write().await = MemoryState::default();
        self.event_lookups.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_available()?;
        if state.fail_on_insert {
            return Err(StoreError::Unavailable("insert rejected".to_string()));
        }
        if state.orders.contains_key(&order.id) {
            return Err(StoreError::OrderExists(order.id));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.orders.get(&id).cloned())
    }

    async fn update_with_version(&self, id: OrderId, update: OrderUpdate) -> Result<Order> {
        let OrderUpdate {
            expected_version,
            mutation,
            audit,
            saga_completion,
            webhook,
        } = update;

        let mut state = self.state.write().await;
        state.check_available()?;
        if state.fail_on_update {
            return Err(StoreError::Unavailable("update rejected".to_string()));
        }
        if let Some(faults) = state.update_faults.as_mut() {
            if faults.skip > 0 {
                faults.skip -= 1;
            } else if faults.remaining > 0 {
                faults.remaining -= 1;
                return Err(match faults.fault {
                    UpdateFault::Unavailable => {
                        StoreError::Unavailable("injected update failure".to_string())
                    }
                    UpdateFault::Conflict => StoreError::Conflict {
                        order_id: id,
                        expected: expected_version,
                    },
                });
            }
        }

        let current = state.orders.get(&id).ok_or(StoreError::OrderNotFound(id))?;
        if current.version != expected_version {
            metrics::counter!("order_version_conflicts_total").increment(1);
            tracing::debug!(order_id = %id, expected = %expected_version, "version conflict");
            return Err(StoreError::Conflict {
                order_id: id,
                expected: expected_version,
            });
        }

        // Validate every dependent write before touching anything.
        if let Some((saga_id, _)) = &saga_completion {
            match state.sagas.get(saga_id) {
                None => return Err(StoreError::SagaNotFound(*saga_id)),
                Some(saga) if saga.is_terminal() => return Err(StoreError::SagaClosed(*saga_id)),
                Some(_) => {}
            }
        }
        if let Some(record) = &webhook
            && state.events.contains_key(&record.event_id)
        {
            return Err(StoreError::DuplicateEvent(record.event_id.clone()));
        }

        let now = Utc::now();
        let next = next_row(current, mutation, now);
        state.orders.insert(id, next.clone());
        state.audit.extend(audit);
        if let Some((saga_id, step)) = saga_completion
            && let Some(saga) = state.sagas.get_mut(&saga_id)
        {
            saga.record(step, now);
            saga.complete(now);
        }
        if let Some(record) = webhook {
            state.events.insert(record.event_id.clone(), record);
        }

        Ok(next)
    }

    async fn delete_draft(&self, id: OrderId) -> Result<bool> {
        let mut state = self.state.write().await;
        state.check_available()?;
        match state.orders.get(&id) {
            Some(order) if order.status == OrderStatus::Draft => {
                state.orders.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn audit_trail(&self, id: OrderId) -> Result<Vec<AuditEntry>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .audit
            .iter()
            .filter(|e| e.order_id == id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SagaStore for InMemoryStore {
    async fn create_saga(&self, saga: &PaymentSaga) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_available()?;
        state.sagas.insert(saga.id, saga.clone());
        Ok(())
    }

    async fn append_step(&self, id: SagaId, step: StepRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_available()?;
        let saga = state.sagas.get_mut(&id).ok_or(StoreError::SagaNotFound(id))?;
        if saga.is_terminal() {
            return Err(StoreError::SagaClosed(id));
        }
        saga.steps.push(step);
        Ok(())
    }

    async fn fail_saga(&self, id: SagaId, error: &str, needs_reconciliation: bool) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_available()?;
        let saga = state.sagas.get_mut(&id).ok_or(StoreError::SagaNotFound(id))?;
        if saga.status != SagaStatus::Pending {
            return Err(StoreError::SagaClosed(id));
        }
        saga.fail(error, needs_reconciliation, Utc::now());
        Ok(())
    }

    async fn get_saga(&self, id: SagaId) -> Result<Option<PaymentSaga>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.sagas.get(&id).cloned())
    }
}

#[async_trait]
impl WebhookLedger for InMemoryStore {
    async fn find_event(&self, event_id: &str) -> Result<Option<WebhookRecord>> {
        self.event_lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.events.get(event_id).cloned())
    }

    async fn record_event(&self, record: &WebhookRecord) -> Result<SaveResult> {
        let mut state = self.state.write().await;
        state.check_available()?;
        if state.events.contains_key(&record.event_id) {
            return Ok(SaveResult::AlreadyExists);
        }
        state.events.insert(record.event_id.clone(), record.clone());
        Ok(SaveResult::Inserted)
    }
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn active_policy(
        &self,
        service_type: ServiceType,
    ) -> std::result::Result<Option<CancellationPolicy>, CollaboratorError> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .policies
            .iter()
            .filter(|p| p.active && p.service_type == service_type)
            .max_by_key(|p| p.version)
            .cloned())
    }

    async fn put_policy(&self, policy: CancellationPolicy) -> std::result::Result<(), CollaboratorError> {
        let mut state = self.state.write().await;
        state.check_available()?;
        if policy.active {
            for existing in state
                .policies
                .iter_mut()
                .filter(|p| p.service_type == policy.service_type)
            {
                existing.active = false;
            }
        }
        state
            .policies
            .retain(|p| !(p.id == policy.id && p.version == policy.version));
        state.policies.push(policy);
        Ok(())
    }
}

//! Collaborator interfaces consumed by the lifecycle engine, with in-memory
//! implementations for tests and the default binary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::OrderId;

use crate::error::CollaboratorError;
use crate::order::{ServiceType, SideEffect, SlotId};
use crate::policy::CancellationPolicy;

/// Slot inventory owned by the scheduling system. Slots are opaque here.
#[async_trait]
pub trait CapacityAllocator: Send + Sync {
    async fn reserve_slot(&self, slot: &SlotId, order_id: OrderId) -> Result<(), CollaboratorError>;

    async fn release_slot(&self, slot: &SlotId, order_id: OrderId) -> Result<(), CollaboratorError>;
}

/// Receives side-effect tags emitted by transitions. Delivery and templating
/// are the dispatcher's concern.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, order_id: OrderId, effects: &[SideEffect]) -> Result<(), CollaboratorError>;
}

/// Source of the live cancellation policy, read once per booking.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn active_policy(
        &self,
        service_type: ServiceType,
    ) -> Result<Option<CancellationPolicy>, CollaboratorError>;

    /// Stores a policy row. An active row deactivates earlier rows for the
    /// same service type.
    async fn put_policy(&self, policy: CancellationPolicy) -> Result<(), CollaboratorError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct CapacityState {
    holders: HashMap<SlotId, OrderId>,
    fail_on_reserve: bool,
}

/// In-memory allocator: a slot is held by at most one order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCapacity {
    state: Arc<Mutex<CapacityState>>,
}

impl InMemoryCapacity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the allocator to refuse every reservation.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        lock(&self.state).fail_on_reserve = fail;
    }

    pub fn holder(&self, slot: &SlotId) -> Option<OrderId> {
        lock(&self.state).holders.get(slot).copied()
    }

    pub fn reserved_count(&self) -> usize {
        lock(&self.state).holders.len()
    }
}

#[async_trait]
impl CapacityAllocator for InMemoryCapacity {
    async fn reserve_slot(&self, slot: &SlotId, order_id: OrderId) -> Result<(), CollaboratorError> {
        let mut state = lock(&self.state);
        if state.fail_on_reserve {
            return Err(CollaboratorError::Unavailable {
                collaborator: "capacity",
                message: "allocator offline".to_string(),
            });
        }
        match state.holders.get(slot) {
            Some(holder) if *holder != order_id => Err(CollaboratorError::Rejected {
                collaborator: "capacity",
                message: format!("slot {slot} is already reserved"),
            }),
            _ => {
                state.holders.insert(slot.clone(), order_id);
                Ok(())
            }
        }
    }

    async fn release_slot(&self, slot: &SlotId, order_id: OrderId) -> Result<(), CollaboratorError> {
        let mut state = lock(&self.state);
        if state.holders.get(slot) == Some(&order_id) {
            state.holders.remove(slot);
        }
        Ok(())
    }
}

/// Dispatcher that records every batch it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    dispatched: Arc<Mutex<Vec<(OrderId, Vec<SideEffect>)>>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched(&self) -> Vec<(OrderId, Vec<SideEffect>)> {
        lock(&self.dispatched).clone()
    }

    /// Returns every effect dispatched for one order, in order.
    pub fn effects_for(&self, order_id: OrderId) -> Vec<SideEffect> {
        lock(&self.dispatched)
            .iter()
            .filter(|(id, _)| *id == order_id)
            .flat_map(|(_, effects)| effects.iter().copied())
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, order_id: OrderId, effects: &[SideEffect]) -> Result<(), CollaboratorError> {
        if effects.is_empty() {
            return Ok(());
        }
        tracing::debug!(%order_id, count = effects.len(), "dispatching side effects");
        lock(&self.dispatched).push((order_id, effects.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_held_by_one_order() {
        let capacity = InMemoryCapacity::new();
        let slot = SlotId::from("slot-1");
        let first = OrderId::new();
        let second = OrderId::new();

        capacity.reserve_slot(&slot, first).await.unwrap();
        // Re-reserving for the same order is idempotent.
        capacity.reserve_slot(&slot, first).await.unwrap();
        let err = capacity.reserve_slot(&slot, second).await.unwrap_err();
        assert!(!err.is_retryable());

        // Only the holder can release.
        capacity.release_slot(&slot, second).await.unwrap();
        assert_eq!(capacity.holder(&slot), Some(first));
        capacity.release_slot(&slot, first).await.unwrap();
        assert_eq!(capacity.reserved_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_on_reserve() {
        let capacity = InMemoryCapacity::new();
        capacity.set_fail_on_reserve(true);
        let err = capacity
            .reserve_slot(&SlotId::from("slot-1"), OrderId::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_dispatcher_records_non_empty_batches() {
        let dispatcher = RecordingDispatcher::new();
        let order_id = OrderId::new();
        dispatcher.dispatch(order_id, &[]).await.unwrap();
        dispatcher
            .dispatch(order_id, &[SideEffect::NotifyCustomer, SideEffect::ReleaseCapacity])
            .await
            .unwrap();
        assert_eq!(dispatcher.dispatched().len(), 1);
        assert_eq!(
            dispatcher.effects_for(order_id),
            vec![SideEffect::NotifyCustomer, SideEffect::ReleaseCapacity]
        );
    }
}

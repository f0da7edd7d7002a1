//! Version-guarded status changes.
//!
//! Validation is delegated to [`StateMachine`]; writing goes through
//! [`OrderStore::update_with_version`]. Nothing here retries on conflict:
//! callers re-read and decide.

use std::sync::Arc;

use chrono::Utc;
use common::Money;
use domain::{
    Actor, Order, OrderStatus, SideEffect, StateMachine, Transition, TransitionContext,
    TransitionError,
};
use store::{AuditEntry, OrderStore, OrderUpdate};
use tracing::{info, warn};

use crate::error::Result;

/// A validated status change waiting to be written.
#[derive(Debug, Clone)]
pub struct PendingTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: Actor,
    pub rule: &'static Transition,
    pub reason: Option<String>,
    pub is_override: bool,
}

impl PendingTransition {
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

/// The written row and the side effects its transitions emitted.
#[derive(Debug, Clone)]
pub struct Applied {
    pub order: Order,
    pub side_effects: Vec<SideEffect>,
}

impl Applied {
    pub fn emits(&self, effect: SideEffect) -> bool {
        self.side_effects.contains(&effect)
    }
}

pub struct OrderTransitions<S: ?Sized> {
    store: Arc<S>,
    machine: StateMachine,
}

impl<S: ?Sized> Clone for OrderTransitions<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            machine: self.machine,
        }
    }
}

impl<S: OrderStore + ?Sized> OrderTransitions<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            machine: StateMachine::new(),
        }
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Validates `order.status → to` for `actor`.
    pub fn validate(
        &self,
        order: &Order,
        to: OrderStatus,
        actor: Actor,
        ctx: &TransitionContext,
    ) -> std::result::Result<PendingTransition, TransitionError> {
        match self.machine.validate(order, to, actor, ctx) {
            Ok(rule) => Ok(PendingTransition {
                from: order.status,
                to,
                actor,
                rule,
                reason: None,
                is_override: false,
            }),
            Err(err) => {
                warn!(
                    order_id = %order.id,
                    from = %order.status,
                    %to,
                    %actor,
                    service_type = %order.service_type,
                    error = %err,
                    "transition rejected"
                );
                Err(err)
            }
        }
    }

    /// Validates an administrative override. Only the edge must exist.
    pub fn validate_override(
        &self,
        order: &Order,
        to: OrderStatus,
        reason: String,
    ) -> std::result::Result<PendingTransition, TransitionError> {
        let rule = self.machine.validate_override(order, to).inspect_err(|err| {
            warn!(order_id = %order.id, from = %order.status, %to, error = %err, "override rejected");
        })?;
        Ok(PendingTransition {
            from: order.status,
            to,
            actor: Actor::Admin,
            rule,
            reason: Some(reason),
            is_override: true,
        })
    }

    /// Validates a quote submission and, when the quote is close enough to
    /// the estimate, the automatic charge that follows it.
    pub fn quote_transitions(
        &self,
        order: &Order,
        amount: Money,
        actor: Actor,
        ctx: &TransitionContext,
    ) -> std::result::Result<Vec<PendingTransition>, TransitionError> {
        let awaiting = self.validate(order, OrderStatus::AwaitingPayment, actor, ctx)?;

        let mut quoted = order.clone();
        quoted.status = OrderStatus::AwaitingPayment;
        quoted.quoted_total = Some(amount);
        let mut steps = vec![awaiting];
        if let Ok(rule) = self
            .machine
            .validate(&quoted, OrderStatus::Processing, Actor::System, ctx)
        {
            steps.push(PendingTransition {
                from: OrderStatus::AwaitingPayment,
                to: OrderStatus::Processing,
                actor: Actor::System,
                rule,
                reason: Some("quote within auto-charge threshold".to_string()),
                is_override: false,
            });
        }
        Ok(steps)
    }

    /// Writes `steps` and `changes` in one version-guarded update.
    ///
    /// `decorate` may attach a saga completion or webhook record to the same
    /// write. With no steps only the field changes are written.
    pub async fn commit<F>(
        &self,
        order: &Order,
        steps: Vec<PendingTransition>,
        changes: F,
        decorate: impl FnOnce(OrderUpdate) -> OrderUpdate + Send,
    ) -> Result<Applied>
    where
        F: FnOnce(&mut Order) + Send + 'static,
    {
        let now = Utc::now();
        let final_status = steps.last().map(|s| s.to);
        let charges = steps
            .iter()
            .any(|s| s.rule.side_effects.contains(&SideEffect::ChargePaymentMethod));

        let mut update = OrderUpdate::new(order.version, move |row: &mut Order| {
            changes(row);
            if let Some(status) = final_status {
                row.status = status;
            }
            // Charging locks in what the customer pays.
            if charges {
                row.final_total = Some(row.total());
                row.payment.charge_attempts += 1;
            }
        });
        for step in &steps {
            let mut entry = AuditEntry::transition(order.id, step.from, step.to, step.actor, now)
                .with_reason(step.reason.clone());
            if step.is_override {
                entry = entry.as_override();
            }
            update = update.with_audit(entry);
        }

        let written = self
            .store
            .update_with_version(order.id, decorate(update))
            .await?;

        let mut side_effects = Vec::new();
        for step in &steps {
            metrics::counter!(
                "order_transitions_total",
                "from" => step.from.as_str(),
                "to" => step.to.as_str()
            )
            .increment(1);
            if step.is_override {
                warn!(
                    order_id = %order.id,
                    from = %step.from,
                    to = %step.to,
                    reason = step.reason.as_deref().unwrap_or_default(),
                    version = %written.version,
                    "status forced by administrator"
                );
            } else {
                info!(
                    order_id = %order.id,
                    from = %step.from,
                    to = %step.to,
                    actor = %step.actor,
                    version = %written.version,
                    "order transitioned"
                );
            }
            for effect in step.rule.side_effects {
                if !side_effects.contains(effect) {
                    side_effects.push(*effect);
                }
            }
        }

        Ok(Applied {
            order: written,
            side_effects,
        })
    }

    /// Validates and writes a single transition.
    pub async fn apply(
        &self,
        order: &Order,
        to: OrderStatus,
        actor: Actor,
        ctx: &TransitionContext,
    ) -> Result<Applied> {
        let step = self.validate(order, to, actor, ctx)?;
        self.commit(order, vec![step], |_| {}, |u| u).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use common::{CustomerId, OrderId, Version};
    use domain::{BookingDetails, FeeRate, PolicySnapshot, ServiceType};
    use store::{InMemoryStore, StoreError};

    use super::*;

    async fn seeded(store: &InMemoryStore, status: OrderStatus) -> Order {
        let now = Utc::now();
        let mut order = Order::draft(
            OrderId::new(),
            BookingDetails {
                customer_id: CustomerId::new(),
                service_type: ServiceType::PickupDelivery,
                slot_ids: vec!["slot-1".into()],
                scheduled_time: now + Duration::hours(48),
                estimated_total: Money::from_cents(6_000),
            },
            PolicySnapshot {
                policy_id: "std".to_string(),
                policy_version: 1,
                notice_hours: 24,
                fee_percent: FeeRate::from_bps(1_500),
            },
            now,
        );
        order.status = status;
        store.insert_order(&order).await.unwrap();
        order
    }

    fn ctx() -> TransitionContext {
        TransitionContext::at(Utc::now()).with_auto_charge_threshold(FeeRate::from_bps(500))
    }

    #[tokio::test]
    async fn test_apply_writes_status_and_audit() {
        let store = Arc::new(InMemoryStore::new());
        let order = seeded(&store, OrderStatus::Draft).await;
        let transitions = OrderTransitions::new(store.clone());

        let applied = transitions
            .apply(&order, OrderStatus::Scheduled, Actor::System, &ctx())
            .await
            .unwrap();
        assert_eq!(applied.order.status, OrderStatus::Scheduled);
        assert_eq!(applied.order.version, Version::new(1));
        assert!(applied.emits(SideEffect::NotifyPartner));

        let trail = store.audit_trail(order.id).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].from, OrderStatus::Draft);
        assert!(!trail[0].is_override);
    }

    #[tokio::test]
    async fn test_apply_does_not_retry_conflicts() {
        let store = Arc::new(InMemoryStore::new());
        let order = seeded(&store, OrderStatus::Draft).await;
        let transitions = OrderTransitions::new(store.clone());
        transitions
            .apply(&order, OrderStatus::Scheduled, Actor::System, &ctx())
            .await
            .unwrap();

        let mut stale = order.clone();
        stale.status = OrderStatus::Scheduled;
        let err = transitions
            .apply(&stale, OrderStatus::PickedUp, Actor::Partner, &ctx())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(err, crate::OrderServiceError::Store(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_rejected_transition_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let order = seeded(&store, OrderStatus::Scheduled).await;
        let transitions = OrderTransitions::new(store.clone());

        let err = transitions
            .apply(&order, OrderStatus::Delivered, Actor::Partner, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::OrderServiceError::Transition(TransitionError::InvalidTransition { .. })
        ));
        let current = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(current.version, Version::initial());
    }

    #[tokio::test]
    async fn test_quote_within_threshold_charges_in_one_write() {
        let store = Arc::new(InMemoryStore::new());
        let order = seeded(&store, OrderStatus::AtFacility).await;
        let transitions = OrderTransitions::new(store.clone());

        let amount = Money::from_cents(5_800);
        let steps = transitions
            .quote_transitions(&order, amount, Actor::Partner, &ctx())
            .unwrap();
        assert_eq!(steps.len(), 2);
        let applied = transitions
            .commit(&order, steps, move |o| o.quoted_total = Some(amount), |u| u)
            .await
            .unwrap();

        assert_eq!(applied.order.status, OrderStatus::Processing);
        assert_eq!(applied.order.version, Version::new(1));
        assert_eq!(applied.order.final_total, Some(amount));
        assert_eq!(applied.order.payment.charge_attempts, 1);
        assert!(applied.emits(SideEffect::ChargePaymentMethod));
        assert_eq!(store.audit_trail(order.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_quote_outside_threshold_waits_for_approval() {
        let store = Arc::new(InMemoryStore::new());
        let order = seeded(&store, OrderStatus::AtFacility).await;
        let transitions = OrderTransitions::new(store);

        let steps = transitions
            .quote_transitions(&order, Money::from_cents(7_500), Actor::Partner, &ctx())
            .unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].to, OrderStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_override_requires_declared_edge() {
        let store = Arc::new(InMemoryStore::new());
        let order = seeded(&store, OrderStatus::Scheduled).await;
        let transitions = OrderTransitions::new(store.clone());

        assert!(
            transitions
                .validate_override(&order, OrderStatus::Delivered, "skip".to_string())
                .is_err()
        );
        let step = transitions
            .validate_override(&order, OrderStatus::PickedUp, "partner app down".to_string())
            .unwrap();
        transitions.commit(&order, vec![step], |_| {}, |u| u).await.unwrap();

        let trail = store.audit_trail(order.id).await.unwrap();
        assert!(trail[0].is_override);
        assert_eq!(trail[0].actor, Actor::Admin);
        assert_eq!(trail[0].reason.as_deref(), Some("partner app down"));
    }
}

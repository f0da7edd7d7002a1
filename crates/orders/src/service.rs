//! Lifecycle operations invoked by the application layer.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, Version};
use domain::{
    Actor, CancellationRecord, CapacityAllocator, NotificationDispatcher, Order, OrderStatus,
    PolicyEngine, RefundStatus, SideEffect, SlotId, TransitionContext,
};
use gateway::GuardedGateway;
use serde::Serialize;
use store::{AuditEntry, LifecycleStore, OrderStore, OrderStoreExt};
use tracing::{debug, error, info, warn};

use crate::config::LifecycleConfig;
use crate::error::{OrderServiceError, Result};
use crate::transitions::{Applied, OrderTransitions};

const PROMOTE_ATTEMPTS: u32 = 3;

/// Result of a cancel request.
#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub order_id: OrderId,
    pub fee: Money,
    pub refund: Money,
    pub refund_status: RefundStatus,
    /// The order was already terminal; nothing was changed.
    pub already_final: bool,
    pub version: Version,
}

/// Result of a reschedule request.
#[derive(Debug, Clone, Serialize)]
pub struct RescheduleOutcome {
    pub old_order_id: OrderId,
    pub new_order_id: OrderId,
    pub new_order: Order,
    /// The new row could not be moved out of `draft` and needs an operator.
    pub reconciliation_required: bool,
}

/// Partner or system status update request.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub to: OrderStatus,
    pub actor: Actor,
    pub new_payment_method: Option<String>,
    pub payment_confirmed: bool,
    pub metadata: Option<serde_json::Value>,
    pub reason: Option<String>,
}

impl StatusUpdate {
    pub fn new(to: OrderStatus, actor: Actor) -> Self {
        Self {
            to,
            actor,
            new_payment_method: None,
            payment_confirmed: false,
            metadata: None,
            reason: None,
        }
    }

    pub fn with_new_payment_method(mut self, payment_method: impl Into<String>) -> Self {
        self.new_payment_method = Some(payment_method.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Service for the order mutations that bypass the booking saga.
pub struct OrderService<S: LifecycleStore + ?Sized> {
    store: Arc<S>,
    transitions: OrderTransitions<S>,
    gateway: GuardedGateway,
    capacity: Arc<dyn CapacityAllocator>,
    notifier: Arc<dyn NotificationDispatcher>,
    config: LifecycleConfig,
}

impl<S: LifecycleStore + ?Sized> OrderService<S> {
    pub fn new(
        store: Arc<S>,
        gateway: GuardedGateway,
        capacity: Arc<dyn CapacityAllocator>,
        notifier: Arc<dyn NotificationDispatcher>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            transitions: OrderTransitions::new(Arc::clone(&store)),
            store,
            gateway,
            capacity,
            notifier,
            config,
        }
    }

    pub fn transitions(&self) -> &OrderTransitions<S> {
        &self.transitions
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        Ok(self.store.require_order(order_id).await?)
    }

    pub async fn audit_trail(&self, order_id: OrderId) -> Result<Vec<AuditEntry>> {
        self.store.require_order(order_id).await?;
        Ok(self.store.audit_trail(order_id).await?)
    }

    /// Re-reads the order and retries `attempt` after each version conflict,
    /// up to the configured limit.
    async fn retry_on_conflict<T, F, Fut>(&self, order_id: OrderId, mut attempt: F) -> Result<T>
    where
        F: FnMut(Order) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            let order = self.store.require_order(order_id).await?;
            match attempt(order).await {
                Err(err) if err.is_conflict() && retries < self.config.max_conflict_retries => {
                    retries += 1;
                    debug!(%order_id, retries, "version conflict, re-reading order");
                }
                result => return result,
            }
        }
    }

    /// Hands emitted side effects to the dispatcher. Delivery failures are
    /// logged and do not undo the committed transition.
    async fn dispatch(&self, applied: &Applied) {
        if applied.side_effects.is_empty() {
            return;
        }
        if let Err(err) = self
            .notifier
            .dispatch(applied.order.id, &applied.side_effects)
            .await
        {
            warn!(order_id = %applied.order.id, error = %err, "side effect dispatch failed");
        }
    }

    /// Cancels an order, charging the fee from its locked policy and refunding
    /// the rest.
    #[tracing::instrument(skip_all, fields(%order_id, %actor))]
    pub async fn cancel(
        &self,
        order_id: OrderId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<CancelOutcome> {
        let committed = self
            .retry_on_conflict(order_id, |order| {
                let reason = reason.clone();
                async move { self.cancel_once(order, actor, reason, Utc::now()).await }
            })
            .await?;

        let mut applied = match committed {
            CancelStep::AlreadyFinal(outcome) => return Ok(outcome),
            CancelStep::Canceled(applied) => applied,
        };
        // The refund is issued below, not by the dispatcher.
        applied
            .side_effects
            .retain(|effect| *effect != SideEffect::RefundPayment);
        self.dispatch(&applied).await;

        let record = applied
            .order
            .cancellation
            .clone()
            .ok_or_else(|| OrderServiceError::Validation("cancellation not recorded".to_string()))?;
        let mut outcome = CancelOutcome {
            order_id,
            fee: record.fee,
            refund: record.refund,
            refund_status: record.refund_status,
            already_final: false,
            version: applied.order.version,
        };
        if record.refund.is_positive() {
            match self.refund(applied.order, record.refund).await {
                Ok(order) => {
                    outcome.version = order.version;
                    if let Some(record) = &order.cancellation {
                        outcome.refund_status = record.refund_status;
                    }
                }
                Err(err) => error!(
                    %order_id,
                    error = %err,
                    reconciliation_required = true,
                    "could not record refund result"
                ),
            }
        }
        Ok(outcome)
    }

    async fn cancel_once(
        &self,
        order: Order,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CancelStep> {
        if order.status.is_terminal() {
            info!(order_id = %order.id, status = %order.status, "cancel ignored, order already final");
            let (fee, refund, refund_status) = match &order.cancellation {
                Some(record) => (record.fee, record.refund, record.refund_status),
                None => (Money::zero(), Money::zero(), RefundStatus::NotRequired),
            };
            return Ok(CancelStep::AlreadyFinal(CancelOutcome {
                order_id: order.id,
                fee,
                refund,
                refund_status,
                already_final: true,
                version: order.version,
            }));
        }

        let quote = PolicyEngine::calculate_fee(&order, now);
        let step = self
            .transitions
            .validate(&order, OrderStatus::Canceled, actor, &self.config.context(now))?
            .with_reason(reason.clone());
        info!(
            order_id = %order.id,
            hours_until = order.hours_until_service(now),
            policy_id = %order.policy.policy_id,
            policy_version = order.policy.policy_version,
            fee = %quote.fee,
            refund = %quote.refund,
            "cancellation fee computed"
        );

        let record = CancellationRecord {
            fee: quote.fee,
            refund: quote.refund,
            refund_status: if quote.refund.is_positive() {
                RefundStatus::Requested
            } else {
                RefundStatus::NotRequired
            },
            refund_ref: None,
            reason,
        };
        let applied = self
            .transitions
            .commit(&order, vec![step], move |o| o.cancellation = Some(record), |u| u)
            .await?;
        Ok(CancelStep::Canceled(applied))
    }

    /// Requests the refund for a committed cancel and records the result on
    /// the order. A failed refund leaves the cancel in place and flags the
    /// order for reconciliation.
    async fn refund(&self, order: Order, amount: Money) -> Result<Order> {
        let payment_ref = order
            .payment
            .authorization_ref
            .clone()
            .or_else(|| order.payment.payment_method_ref.clone());

        let outcome = match payment_ref {
            Some(payment_ref) => self.gateway.refund(&payment_ref, amount).await.map_err(|e| {
                error!(
                    order_id = %order.id,
                    %amount,
                    kind = %e.kind,
                    error = %e,
                    reconciliation_required = true,
                    "refund failed after cancellation"
                );
                e.to_string()
            }),
            None => {
                error!(
                    order_id = %order.id,
                    %amount,
                    reconciliation_required = true,
                    "refund owed but order has no payment reference"
                );
                Err("no payment reference on order".to_string())
            }
        };

        self.retry_on_conflict(order.id, |current| {
            let outcome = outcome.clone();
            async move {
                let applied = self
                    .transitions
                    .commit(
                        &current,
                        vec![],
                        move |o| {
                            let Some(record) = o.cancellation.as_mut() else {
                                return;
                            };
                            match outcome {
                                Ok(refund_ref) => record.refund_ref = Some(refund_ref),
                                Err(message) => {
                                    record.refund_status = RefundStatus::PendingReconciliation;
                                    o.payment.last_payment_error = Some(message);
                                }
                            }
                        },
                        |u| u,
                    )
                    .await?;
                Ok(applied.order)
            }
        })
        .await
    }

    /// Moves an order to a new slot and time without a new charge.
    ///
    /// The new row is inserted as a draft and the new slot reserved before
    /// the old row is retired; losing that race undoes both.
    #[tracing::instrument(skip_all, fields(%order_id, %actor, %new_time))]
    pub async fn reschedule(
        &self,
        order_id: OrderId,
        new_slot_ids: Vec<SlotId>,
        new_time: DateTime<Utc>,
        actor: Actor,
    ) -> Result<RescheduleOutcome> {
        if new_slot_ids.is_empty() {
            return Err(OrderServiceError::Validation(
                "reschedule needs at least one slot".to_string(),
            ));
        }
        let now = Utc::now();
        if new_time <= now {
            return Err(OrderServiceError::Validation(
                "new time must be in the future".to_string(),
            ));
        }

        let old = self.store.require_order(order_id).await?;
        if !PolicyEngine::can_reschedule(&old, now) {
            return Err(OrderServiceError::RescheduleNotAllowed {
                order_id,
                reason: format!(
                    "status {} with {:.1}h notice, policy requires {}h",
                    old.status,
                    old.hours_until_service(now),
                    old.policy.notice_hours
                ),
            });
        }
        let ctx = self.config.context(now);
        let retire = self
            .transitions
            .validate(&old, OrderStatus::Rescheduled, actor, &ctx)?;

        let new_id = OrderId::new();
        self.reserve_all(&new_slot_ids, new_id).await?;

        let mut draft = old.clone();
        draft.id = new_id;
        draft.version = Version::initial();
        draft.status = OrderStatus::Draft;
        draft.slot_ids = new_slot_ids.clone();
        draft.scheduled_time = new_time;
        draft.cancellation = None;
        draft.rescheduled_from = Some(old.id);
        draft.rescheduled_to = None;
        draft.created_at = now;
        draft.updated_at = now;
        if let Err(err) = self.store.insert_order(&draft).await {
            self.release_all(&new_slot_ids, new_id).await;
            return Err(err.into());
        }

        let retired = match self
            .transitions
            .commit(&old, vec![retire], move |o| o.rescheduled_to = Some(new_id), |u| u)
            .await
        {
            Ok(applied) => applied,
            Err(err) => {
                warn!(%order_id, new_order_id = %new_id, error = %err, "reschedule lost a race, undoing");
                if let Err(undo) = self.store.delete_draft(new_id).await {
                    error!(new_order_id = %new_id, error = %undo, "failed to delete rescheduled draft");
                }
                self.release_all(&new_slot_ids, new_id).await;
                return Err(err);
            }
        };

        // The old row is retired; from here on the caller gets the linked
        // outcome whether or not the new row can be promoted.
        let promoted = self.promote(&mut draft, &ctx).await;
        self.release_all(&old.slot_ids, old.id).await;

        self.dispatch(&retired).await;
        let (new_order, reconciliation_required) = match promoted {
            Some(applied) => {
                self.dispatch(&applied).await;
                info!(%order_id, new_order_id = %new_id, %new_time, "order rescheduled");
                (applied.order, false)
            }
            None => {
                error!(
                    %order_id,
                    new_order_id = %new_id,
                    reconciliation_required = true,
                    "rescheduled order left in draft"
                );
                (draft, true)
            }
        };

        Ok(RescheduleOutcome {
            old_order_id: order_id,
            new_order_id: new_id,
            new_order,
            reconciliation_required,
        })
    }

    /// Moves a rescheduled draft to `scheduled`, re-reading it between
    /// attempts. `draft` holds the last row seen when every attempt fails.
    async fn promote(&self, draft: &mut Order, ctx: &TransitionContext) -> Option<Applied> {
        for attempt in 1..=PROMOTE_ATTEMPTS {
            match self
                .transitions
                .apply(draft, OrderStatus::Scheduled, Actor::System, ctx)
                .await
            {
                Ok(applied) => return Some(applied),
                Err(err) => {
                    warn!(order_id = %draft.id, attempt, error = %err, "promoting rescheduled order failed");
                }
            }
            match self.store.get_order(draft.id).await {
                Ok(Some(current)) if current.status == OrderStatus::Scheduled => {
                    // An earlier attempt landed before its error was reported.
                    return Some(Applied {
                        order: current,
                        side_effects: Vec::new(),
                    });
                }
                Ok(Some(current)) if current.status == OrderStatus::Draft => *draft = current,
                Ok(_) => return None,
                Err(err) => debug!(order_id = %draft.id, error = %err, "re-reading draft failed"),
            }
        }
        None
    }

    async fn reserve_all(&self, slots: &[SlotId], order_id: OrderId) -> Result<()> {
        for (i, slot) in slots.iter().enumerate() {
            if let Err(err) = self.capacity.reserve_slot(slot, order_id).await {
                self.release_all(&slots[..i], order_id).await;
                return Err(err.into());
            }
        }
        Ok(())
    }

    async fn release_all(&self, slots: &[SlotId], order_id: OrderId) {
        for slot in slots {
            if let Err(err) = self.capacity.release_slot(slot, order_id).await {
                warn!(%order_id, %slot, error = %err, "slot release failed");
            }
        }
    }

    /// Administrative override to any status declared reachable from the
    /// current one.
    #[tracing::instrument(skip_all, fields(%order_id, %to))]
    pub async fn force_status(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        reason: String,
    ) -> Result<Applied> {
        if reason.trim().is_empty() {
            return Err(OrderServiceError::Validation(
                "an override needs a reason".to_string(),
            ));
        }
        let applied = self
            .retry_on_conflict(order_id, |order| {
                let reason = reason.clone();
                async move {
                    let step = self.transitions.validate_override(&order, to, reason)?;
                    self.transitions.commit(&order, vec![step], |_| {}, |u| u).await
                }
            })
            .await?;
        self.dispatch(&applied).await;
        Ok(applied)
    }

    /// Records a partner quote. Moves the order to `awaiting_payment`, or
    /// straight on to `processing` when the quote is within the auto-charge
    /// threshold.
    #[tracing::instrument(skip_all, fields(%order_id, %amount, %actor))]
    pub async fn submit_quote(
        &self,
        order_id: OrderId,
        amount: Money,
        metadata: Option<serde_json::Value>,
        actor: Actor,
    ) -> Result<Applied> {
        if !amount.is_positive() {
            return Err(OrderServiceError::Validation(
                "quote amount must be positive".to_string(),
            ));
        }
        let applied = self
            .retry_on_conflict(order_id, |order| {
                let metadata = metadata.clone();
                async move {
                    let ctx = self.config.context(Utc::now());
                    let steps = self.transitions.quote_transitions(&order, amount, actor, &ctx)?;
                    self.transitions
                        .commit(
                            &order,
                            steps,
                            move |o| {
                                o.quoted_total = Some(amount);
                                o.quote_metadata = metadata;
                            },
                            |u| u,
                        )
                        .await
                }
            })
            .await?;
        self.dispatch(&applied).await;
        Ok(applied)
    }

    /// Customer approval of a quote that needed it.
    #[tracing::instrument(skip(self))]
    pub async fn approve_quote(&self, order_id: OrderId) -> Result<Applied> {
        let applied = self
            .retry_on_conflict(order_id, |order| async move {
                if order.quoted_total.is_none() {
                    return Err(OrderServiceError::Validation(
                        "order has no quote to approve".to_string(),
                    ));
                }
                let ctx = self.config.context(Utc::now());
                self.transitions
                    .apply(&order, OrderStatus::Processing, Actor::Customer, &ctx)
                    .await
            })
            .await?;
        self.dispatch(&applied).await;
        Ok(applied)
    }

    /// General status update for partners and automated jobs.
    #[tracing::instrument(skip_all, fields(%order_id, to = %update.to, actor = %update.actor))]
    pub async fn update_status(&self, order_id: OrderId, update: StatusUpdate) -> Result<Applied> {
        let applied = self
            .retry_on_conflict(order_id, |order| {
                let update = update.clone();
                async move {
                    let mut ctx = self.config.context(Utc::now());
                    if let Some(pm) = &update.new_payment_method {
                        ctx = ctx.with_new_payment_method(pm.clone());
                    }
                    if update.payment_confirmed {
                        ctx = ctx.with_payment_confirmed();
                    }
                    if let Some(metadata) = &update.metadata {
                        ctx = ctx.with_metadata(metadata.clone());
                    }
                    let step = self
                        .transitions
                        .validate(&order, update.to, update.actor, &ctx)?
                        .with_reason(update.reason);
                    let new_payment_method = update.new_payment_method;
                    self.transitions
                        .commit(
                            &order,
                            vec![step],
                            move |o| {
                                if let Some(pm) = new_payment_method {
                                    o.payment.payment_method_ref = Some(pm);
                                    o.payment.last_payment_error = None;
                                }
                            },
                            |u| u,
                        )
                        .await
                }
            })
            .await?;
        if applied.emits(SideEffect::ChargeNoShowFee) {
            info!(%order_id, "no-show fee requested");
        }
        self.dispatch(&applied).await;
        Ok(applied)
    }
}

enum CancelStep {
    AlreadyFinal(CancelOutcome),
    Canceled(Applied),
}

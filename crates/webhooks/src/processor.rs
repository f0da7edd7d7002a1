//! Idempotent webhook event processing.
//!
//! 1. Verify the signature; nothing else runs for a bad one
//! 2. Parse the envelope
//! 3. Look the event id up in the ledger; a hit is acknowledged as a duplicate
//! 4. Apply the transition and write the ledger row in the same update
//!
//! A delivery that loses a version race re-reads the order and tries again.
//! If the order has become terminal meanwhile, the event is recorded as a
//! no-op.

use std::sync::Arc;

use chrono::Utc;
use domain::{Actor, NotificationDispatcher, Order, OrderStatus, TransitionContext};
use orders::{Applied, OrderTransitions, PendingTransition};
use serde::Serialize;
use store::{
    EventOutcome, LifecycleStore, OrderStoreExt, SaveResult, StoreError, WebhookLedger,
    WebhookRecord,
};
use tracing::{debug, info, warn};

use crate::config::WebhookConfig;
use crate::error::{Result, WebhookError};
use crate::event::{EventAction, GatewayEvent};
use crate::signature::SignatureVerifier;

type Changes = Box<dyn FnOnce(&mut Order) + Send>;

/// Acknowledgement returned to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookReceipt {
    pub accepted: bool,
    pub event_id: String,
    /// What this delivery did. `None` when another delivery of the same
    /// event got there first.
    pub outcome: Option<EventOutcome>,
    pub duplicate: bool,
}

impl WebhookReceipt {
    fn processed(event_id: &str, outcome: EventOutcome) -> Self {
        Self {
            accepted: true,
            event_id: event_id.to_string(),
            outcome: Some(outcome),
            duplicate: false,
        }
    }

    fn duplicate(event_id: &str, outcome: Option<EventOutcome>) -> Self {
        Self {
            accepted: true,
            event_id: event_id.to_string(),
            outcome,
            duplicate: true,
        }
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("webhook_events_total", "outcome" => outcome).increment(1);
}

pub struct WebhookProcessor<S: LifecycleStore + ?Sized> {
    store: Arc<S>,
    transitions: OrderTransitions<S>,
    notifier: Arc<dyn NotificationDispatcher>,
    verifier: SignatureVerifier,
    config: WebhookConfig,
}

impl<S: LifecycleStore + ?Sized> WebhookProcessor<S> {
    pub fn new(
        store: Arc<S>,
        notifier: Arc<dyn NotificationDispatcher>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            transitions: OrderTransitions::new(Arc::clone(&store)),
            verifier: SignatureVerifier::new(&config.secret),
            store,
            notifier,
            config,
        }
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    /// Handles one delivery of a gateway event.
    #[tracing::instrument(
        skip_all,
        fields(event_id = tracing::field::Empty, event_type = tracing::field::Empty)
    )]
    pub async fn handle(&self, body: &[u8], signature: &str) -> Result<WebhookReceipt> {
        if let Err(err) = self.verifier.verify(body, signature) {
            warn!("webhook signature rejected");
            record_outcome("rejected");
            return Err(err);
        }

        let event = GatewayEvent::parse(body).inspect_err(|err| {
            warn!(error = %err, "malformed webhook payload");
            record_outcome("malformed");
        })?;
        let span = tracing::Span::current();
        span.record("event_id", event.id.as_str());
        span.record("event_type", event.event_type.as_str());

        if let Some(existing) = self.store.find_event(&event.id).await? {
            debug!(outcome = existing.outcome.as_str(), "duplicate delivery");
            record_outcome("duplicate");
            return Ok(WebhookReceipt::duplicate(&event.id, Some(existing.outcome)));
        }

        let Some(action) = &event.action else {
            info!("event type not handled, acknowledging");
            return self.record_unchanged(&event, EventOutcome::Ignored).await;
        };
        let order_id = event
            .order_id
            .ok_or_else(|| WebhookError::Malformed("order_id is required".to_string()))?;

        let mut retries = 0;
        loop {
            let order = self.store.require_order(order_id).await?;
            if order.status.is_terminal() || order.status == action.target() {
                if let EventAction::QuoteSubmitted { amount, .. } = action
                    && order.quoted_total != Some(*amount)
                {
                    warn!(
                        %order_id,
                        status = %order.status,
                        discarded_amount = %amount,
                        quoted_total = ?order.quoted_total,
                        "revised quote arrived after quoting closed, amount discarded"
                    );
                }
                info!(%order_id, status = %order.status, "order already settled, event is a no-op");
                return self.record_unchanged(&event, EventOutcome::NoOp).await;
            }

            match self.apply(&order, &event, action).await {
                Ok(applied) => {
                    record_outcome(EventOutcome::Applied.as_str());
                    info!(%order_id, status = %applied.order.status, version = %applied.order.version, "webhook applied");
                    if let Err(err) = self
                        .notifier
                        .dispatch(order_id, &applied.side_effects)
                        .await
                    {
                        warn!(%order_id, error = %err, "side effect dispatch failed");
                    }
                    return Ok(WebhookReceipt::processed(&event.id, EventOutcome::Applied));
                }
                Err(WebhookError::Store(StoreError::DuplicateEvent(_))) => {
                    debug!(%order_id, "another delivery recorded this event first");
                    record_outcome("duplicate");
                    return Ok(WebhookReceipt::duplicate(&event.id, None));
                }
                Err(err) if err.is_conflict() && retries < self.config.max_conflict_retries => {
                    retries += 1;
                    warn!(%order_id, retries, "version conflict applying webhook, re-reading");
                }
                Err(err) if err.is_conflict() => {
                    warn!(%order_id, retries, "webhook lost every version race, asking for redelivery");
                    record_outcome("contended");
                    return Err(err);
                }
                Err(err) => {
                    warn!(%order_id, error = %err, "webhook not applied");
                    return Err(err);
                }
            }
        }
    }

    /// Validates the event's transitions and commits them with the ledger row.
    async fn apply(
        &self,
        order: &Order,
        event: &GatewayEvent,
        action: &EventAction,
    ) -> Result<Applied> {
        let now = Utc::now();
        let ctx = TransitionContext::at(now)
            .with_auto_charge_threshold(self.config.auto_charge_threshold);

        let (steps, changes): (Vec<PendingTransition>, Changes) = match action {
            EventAction::QuoteSubmitted { amount, metadata } => {
                let steps = self
                    .transitions
                    .quote_transitions(order, *amount, Actor::System, &ctx)?;
                let (amount, metadata) = (*amount, metadata.clone());
                (
                    steps,
                    Box::new(move |o: &mut Order| {
                        o.quoted_total = Some(amount);
                        o.quote_metadata = metadata;
                    }),
                )
            }
            EventAction::ChargeSucceeded | EventAction::AuthorizationSucceeded => {
                let ctx = ctx.with_payment_confirmed();
                let step =
                    self.transitions
                        .validate(order, OrderStatus::Processing, Actor::System, &ctx)?;
                (
                    vec![step],
                    Box::new(|o: &mut Order| o.payment.last_payment_error = None),
                )
            }
            EventAction::ChargeFailed { code, message } => {
                let step = self.transitions.validate(
                    order,
                    OrderStatus::PaymentFailed,
                    Actor::System,
                    &ctx,
                )?;
                let error = format!("{code}: {message}");
                (
                    vec![step],
                    Box::new(move |o: &mut Order| o.payment.last_payment_error = Some(error)),
                )
            }
            EventAction::DisputeCreated => {
                let step =
                    self.transitions
                        .validate(order, OrderStatus::Refunded, Actor::System, &ctx)?;
                (vec![step], Box::new(|_: &mut Order| {}))
            }
            EventAction::QuantityRecorded { quantity } => {
                let step =
                    self.transitions
                        .validate(order, OrderStatus::AtFacility, Actor::System, &ctx)?;
                let quantity = *quantity;
                (
                    vec![step],
                    Box::new(move |o: &mut Order| o.recorded_quantity = Some(quantity)),
                )
            }
        };

        let reason = format!("gateway event {} ({})", event.id, event.event_type);
        let steps = steps
            .into_iter()
            .map(|s| match s.reason {
                Some(_) => s,
                None => s.with_reason(Some(reason.clone())),
            })
            .collect();
        let record: WebhookRecord = event.record(EventOutcome::Applied, now);

        Ok(self
            .transitions
            .commit(order, steps, changes, move |u| u.recording_event(record))
            .await?)
    }

    /// Records an event that changes no order.
    async fn record_unchanged(
        &self,
        event: &GatewayEvent,
        outcome: EventOutcome,
    ) -> Result<WebhookReceipt> {
        match self.store.record_event(&event.record(outcome, Utc::now())).await? {
            SaveResult::Inserted => {
                record_outcome(outcome.as_str());
                Ok(WebhookReceipt::processed(&event.id, outcome))
            }
            SaveResult::AlreadyExists => {
                record_outcome("duplicate");
                Ok(WebhookReceipt::duplicate(&event.id, None))
            }
        }
    }
}

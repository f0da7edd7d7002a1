//! Saga coordinator for booking an order with payment secured.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, SagaId};
use domain::{
    Actor, BookingDetails, NotificationDispatcher, Order, OrderStatus, PaymentSaga, PolicyStore,
    SagaStep, ServiceType, SlotId, StepRecord, TransitionContext,
};
use gateway::{GuardedGateway, PaymentError};
use orders::{OrderServiceError, OrderTransitions};
use serde::Deserialize;
use store::{LifecycleStore, OrderStore, SagaStore};
use tracing::{error, info, warn};

use crate::error::{Result, SagaError, SagaFailure};
use crate::strategy::PaymentStrategy;

pub const STEP_CREATE_DRAFT: &str = "create_draft";
pub const STEP_SECURE_PAYMENT: &str = "secure_payment";
pub const STEP_FINALIZE: &str = "finalize_order";

/// A booking request as accepted from the application layer.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub customer_id: CustomerId,
    pub service_type: ServiceType,
    pub slot_ids: Vec<SlotId>,
    pub scheduled_time: DateTime<Utc>,
    pub estimated_total: Money,
    /// Single-use card token from the gateway's client-side library.
    pub payment_token: String,
}

impl BookingRequest {
    fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if !self.estimated_total.is_positive() {
            return Err(SagaError::Validation(
                "estimated total must be positive".to_string(),
            ));
        }
        if self.slot_ids.is_empty() {
            return Err(SagaError::Validation("at least one slot is required".to_string()));
        }
        if self.scheduled_time <= now {
            return Err(SagaError::Validation(
                "scheduled time must be in the future".to_string(),
            ));
        }
        if self.payment_token.trim().is_empty() {
            return Err(SagaError::Validation("payment token is required".to_string()));
        }
        Ok(())
    }
}

/// Refs gathered by the secure-payment step and copied onto the order.
#[derive(Debug, Default)]
struct SecuredPayment {
    customer_ref: Option<String>,
    payment_method_ref: Option<String>,
    authorization_ref: Option<String>,
}

/// Orchestrates a booking: create the draft, secure payment, finalize.
///
/// Every step result is appended to the saga log before the next step
/// starts. Any failure compensates the executed steps in reverse order.
pub struct PaymentAuthorizationSaga<S: LifecycleStore + ?Sized> {
    store: Arc<S>,
    transitions: OrderTransitions<S>,
    gateway: GuardedGateway,
    notifier: Arc<dyn NotificationDispatcher>,
    strategy: PaymentStrategy,
}

impl<S: LifecycleStore + ?Sized> PaymentAuthorizationSaga<S> {
    pub fn new(
        store: Arc<S>,
        gateway: GuardedGateway,
        notifier: Arc<dyn NotificationDispatcher>,
        strategy: PaymentStrategy,
    ) -> Self {
        Self {
            transitions: OrderTransitions::new(Arc::clone(&store)),
            store,
            gateway,
            notifier,
            strategy,
        }
    }

    pub fn strategy(&self) -> &PaymentStrategy {
        &self.strategy
    }

    /// Runs the booking saga and returns the scheduled order.
    #[tracing::instrument(
        skip_all,
        fields(saga_type = PaymentSaga::SAGA_TYPE, customer_id = %request.customer_id, strategy = %self.strategy.kind())
    )]
    pub async fn execute(&self, request: BookingRequest) -> Result<Order> {
        let now = Utc::now();
        request.validate(now)?;

        let policy = self
            .store
            .active_policy(request.service_type)
            .await?
            .ok_or(SagaError::NoActivePolicy(request.service_type))?;

        let saga_id = SagaId::new();
        let order_id = OrderId::new();
        self.store
            .create_saga(&PaymentSaga::new(saga_id, order_id, self.strategy.kind(), now))
            .await?;
        metrics::counter!("saga_executions_total").increment(1);
        let started = std::time::Instant::now();
        info!(%saga_id, %order_id, "saga started");

        let mut run = SagaRun {
            saga_id,
            order_id,
            executed: Vec::new(),
            outcome_unknown: None,
        };

        // Step 1: draft order
        let mut draft = Order::draft(
            order_id,
            BookingDetails {
                customer_id: request.customer_id,
                service_type: request.service_type,
                slot_ids: request.slot_ids.clone(),
                scheduled_time: request.scheduled_time,
                estimated_total: request.estimated_total,
            },
            policy.snapshot(),
            now,
        );
        draft.payment.saga_id = Some(saga_id);
        if let Err(err) = self.create_draft(&mut run, &draft).await {
            return Err(self.fail(run, STEP_CREATE_DRAFT, err, started).await);
        }

        // Step 2: secure payment
        let secured = match self.secure_payment(&mut run, &request).await {
            Ok(secured) => secured,
            Err(err) => return Err(self.fail(run, STEP_SECURE_PAYMENT, err, started).await),
        };

        // Step 3: finalize
        let applied = match self.finalize(&run, &draft, secured).await {
            Ok(applied) => applied,
            Err(err) => return Err(self.fail(run, STEP_FINALIZE, err, started).await),
        };

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed").increment(1);
        info!(%saga_id, %order_id, duration, "saga completed successfully");

        if let Err(err) = self
            .notifier
            .dispatch(order_id, &applied.side_effects)
            .await
        {
            warn!(%order_id, error = %err, "side effect dispatch failed");
        }
        Ok(applied.order)
    }

    pub async fn get_saga(&self, saga_id: SagaId) -> Result<Option<PaymentSaga>> {
        Ok(self.store.get_saga(saga_id).await?)
    }

    async fn record(&self, run: &mut SagaRun, step: SagaStep) -> orders::Result<()> {
        info!(saga_id = %run.saga_id, step = step.name(), "saga step recorded");
        run.executed.push(step.clone());
        self.store
            .append_step(
                run.saga_id,
                StepRecord {
                    step,
                    recorded_at: Utc::now(),
                },
            )
            .await?;
        Ok(())
    }

    async fn create_draft(&self, run: &mut SagaRun, draft: &Order) -> orders::Result<()> {
        self.store.insert_order(draft).await?;
        self.record(run, SagaStep::DraftCreated { order_id: draft.id }).await
    }

    async fn secure_payment(
        &self,
        run: &mut SagaRun,
        request: &BookingRequest,
    ) -> orders::Result<SecuredPayment> {
        let customer_ref = self.gateway.create_customer(request.customer_id).await?;
        self.record(
            run,
            SagaStep::CustomerCreated {
                customer_ref: customer_ref.clone(),
            },
        )
        .await?;

        let mut secured = SecuredPayment {
            customer_ref: Some(customer_ref.clone()),
            ..SecuredPayment::default()
        };
        match self.strategy {
            PaymentStrategy::AuthorizationHold { .. } => {
                let amount = self
                    .strategy
                    .hold_amount(request.service_type, request.estimated_total)
                    .unwrap_or(request.estimated_total);
                let hold = self
                    .gateway
                    .authorize_hold(&customer_ref, &request.payment_token, amount)
                    .await
                    .inspect_err(|err| run.note_outcome("authorize_hold", err))?;
                self.record(
                    run,
                    SagaStep::AuthorizationHeld {
                        authorization_ref: hold.authorization_ref.clone(),
                        payment_method_ref: hold.payment_method_ref.clone(),
                        amount: hold.amount,
                    },
                )
                .await?;
                secured.authorization_ref = Some(hold.authorization_ref);
                secured.payment_method_ref = Some(hold.payment_method_ref);
            }
            PaymentStrategy::SaveAndValidate {
                verification_amount,
            } => {
                let payment_method_ref = self
                    .gateway
                    .save_payment_method(&customer_ref, &request.payment_token)
                    .await?;
                self.record(
                    run,
                    SagaStep::PaymentMethodSaved {
                        payment_method_ref: payment_method_ref.clone(),
                    },
                )
                .await?;

                let charge_ref = self
                    .gateway
                    .verify_payment_method(&payment_method_ref, verification_amount)
                    .await
                    .inspect_err(|err| run.note_outcome("verify_payment_method", err))?;
                self.record(
                    run,
                    SagaStep::VerificationCharged {
                        charge_ref: charge_ref.clone(),
                        amount: verification_amount,
                    },
                )
                .await?;

                self.gateway.reverse_charge(&charge_ref).await?;
                self.record(run, SagaStep::VerificationReversed { charge_ref }).await?;
                secured.payment_method_ref = Some(payment_method_ref);
            }
        }
        Ok(secured)
    }

    /// Moves the draft to `scheduled`, copies the payment refs and closes the
    /// saga in one version-guarded write.
    async fn finalize(
        &self,
        run: &SagaRun,
        draft: &Order,
        secured: SecuredPayment,
    ) -> orders::Result<orders::Applied> {
        let ctx = TransitionContext::at(Utc::now());
        let step = self
            .transitions
            .validate(draft, OrderStatus::Scheduled, Actor::System, &ctx)?;
        let final_step = SagaStep::OrderFinalized {
            order_id: draft.id,
            version: draft.version.next(),
        };
        let saga_id = run.saga_id;
        self.transitions
            .commit(
                draft,
                vec![step],
                move |o| {
                    o.payment.gateway_customer_ref = secured.customer_ref;
                    o.payment.payment_method_ref = secured.payment_method_ref;
                    o.payment.authorization_ref = secured.authorization_ref;
                },
                move |u| u.completing_saga(saga_id, final_step),
            )
            .await
    }

    /// Compensates and closes the saga as failed.
    async fn fail(
        &self,
        run: SagaRun,
        step: &'static str,
        cause: OrderServiceError,
        started: std::time::Instant,
    ) -> SagaError {
        warn!(saga_id = %run.saga_id, order_id = %run.order_id, step, error = %cause, "saga step failed, compensating");
        let compensated = self.compensate(&run).await;
        if let Some(call) = run.outcome_unknown {
            error!(
                saga_id = %run.saga_id,
                order_id = %run.order_id,
                call,
                reconciliation_required = true,
                "payment call outcome unknown at the gateway"
            );
        }
        let reconciliation_required = !compensated || run.outcome_unknown.is_some();

        if let Err(err) = self
            .store
            .fail_saga(run.saga_id, &cause.to_string(), reconciliation_required)
            .await
        {
            error!(saga_id = %run.saga_id, error = %err, "failed to mark saga failed");
        }

        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!("saga_failed").increment(1);
        warn!(
            saga_id = %run.saga_id,
            order_id = %run.order_id,
            step,
            reconciliation_required,
            "saga failed"
        );

        SagaError::Failed(SagaFailure {
            saga_id: run.saga_id,
            order_id: run.order_id,
            step,
            cause,
            reconciliation_required,
        })
    }

    /// Undoes executed steps newest first, one attempt each.
    ///
    /// Returns false if any compensating action failed.
    async fn compensate(&self, run: &SagaRun) -> bool {
        let mut clean = true;
        for step in run.executed.iter().rev() {
            let outcome: orders::Result<()> = match step {
                SagaStep::DraftCreated { order_id } => match self.store.delete_draft(*order_id).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(OrderServiceError::Validation(format!(
                        "order {order_id} is no longer a draft"
                    ))),
                    Err(err) => Err(err.into()),
                },
                SagaStep::AuthorizationHeld {
                    authorization_ref, ..
                } => self
                    .gateway
                    .void_authorization(authorization_ref)
                    .await
                    .map_err(Into::into),
                SagaStep::PaymentMethodSaved { payment_method_ref } => self
                    .gateway
                    .detach_payment_method(payment_method_ref)
                    .await
                    .map_err(Into::into),
                SagaStep::VerificationCharged { charge_ref, .. } if !run.reversed(charge_ref) => self
                    .gateway
                    .reverse_charge(charge_ref)
                    .await
                    .map_err(Into::into),
                SagaStep::CustomerCreated { .. }
                | SagaStep::VerificationCharged { .. }
                | SagaStep::VerificationReversed { .. }
                | SagaStep::OrderFinalized { .. } => Ok(()),
            };

            match outcome {
                Ok(()) => info!(saga_id = %run.saga_id, step = step.name(), "compensation step completed"),
                Err(err) => {
                    clean = false;
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    error!(
                        saga_id = %run.saga_id,
                        order_id = %run.order_id,
                        step = step.name(),
                        error = %err,
                        reconciliation_required = true,
                        "compensation step failed"
                    );
                }
            }
        }
        clean
    }
}

/// Steps executed by one saga run, oldest first.
struct SagaRun {
    saga_id: SagaId,
    order_id: OrderId,
    executed: Vec<SagaStep>,
    /// A money-moving call that failed without a definite answer.
    outcome_unknown: Option<&'static str>,
}

impl SagaRun {
    fn note_outcome(&mut self, call: &'static str, err: &PaymentError) {
        if err.outcome_unknown() {
            self.outcome_unknown = Some(call);
        }
    }

    fn reversed(&self, charge_ref: &str) -> bool {
        self.executed.iter().any(|s| {
            matches!(s, SagaStep::VerificationReversed { charge_ref: r } if r == charge_ref)
        })
    }
}

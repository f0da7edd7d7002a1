//! Integration tests for the payment authorization saga.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{CustomerId, Money};
use domain::{
    CancellationPolicy, FeeRate, OrderStatus, PolicyStore, RecordingDispatcher, SagaStatus,
    ServiceType, SideEffect,
};
use gateway::{
    CallKind, GatewayError, GatewayGuard, GatewayOp, GuardConfig, GuardedGateway,
    InMemoryGateway, PaymentErrorKind,
};
use orders::OrderServiceError;
use saga::{
    BookingRequest, PaymentAuthorizationSaga, PaymentStrategy, STEP_CREATE_DRAFT, STEP_FINALIZE,
    STEP_SECURE_PAYMENT, SagaError, SagaFailure,
};
use store::{InMemoryStore, OrderStore, SagaStore};

struct TestHarness {
    saga: PaymentAuthorizationSaga<InMemoryStore>,
    store: Arc<InMemoryStore>,
    gateway: InMemoryGateway,
    guarded: GuardedGateway,
    notifier: Arc<RecordingDispatcher>,
}

async fn harness(strategy: PaymentStrategy) -> TestHarness {
    let store = Arc::new(InMemoryStore::new());
    for (id, service_type) in [
        ("std-pickup", ServiceType::PickupDelivery),
        ("std-on-site", ServiceType::OnSite),
    ] {
        store
            .put_policy(CancellationPolicy {
                id: id.to_string(),
                version: 1,
                service_type,
                notice_hours: 24,
                fee_percent: FeeRate::from_bps(1_500),
                active: true,
            })
            .await
            .unwrap();
    }
    let gateway = InMemoryGateway::new();
    let guarded = GuardedGateway::new(
        Arc::new(gateway.clone()),
        Arc::new(GatewayGuard::new(GuardConfig::default())),
    );
    let notifier = Arc::new(RecordingDispatcher::new());
    let saga = PaymentAuthorizationSaga::new(
        store.clone(),
        guarded.clone(),
        notifier.clone(),
        strategy,
    );
    TestHarness {
        saga,
        store,
        gateway,
        guarded,
        notifier,
    }
}

fn booking(service_type: ServiceType, estimate: i64, token: &str) -> BookingRequest {
    BookingRequest {
        customer_id: CustomerId::new(),
        service_type,
        slot_ids: vec!["slot-a".into(), "slot-b".into()],
        scheduled_time: Utc::now() + Duration::days(3),
        estimated_total: Money::from_cents(estimate),
        payment_token: token.to_string(),
    }
}

fn failure(err: SagaError) -> SagaFailure {
    match err {
        SagaError::Failed(failure) => failure,
        other => panic!("expected a compensated saga failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_hold_strategy_schedules_order() {
    let h = harness(PaymentStrategy::default()).await;
    let order = h
        .saga
        .execute(booking(ServiceType::PickupDelivery, 7_000, "tok_visa"))
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Scheduled);
    assert_eq!(order.version.as_i64(), 1);
    assert!(order.payment.gateway_customer_ref.is_some());
    assert!(order.payment.authorization_ref.is_some());
    assert!(order.payment.payment_method_ref.is_some());
    assert_eq!(h.gateway.active_authorizations().await, 1);

    let saga = h
        .store
        .get_saga(order.payment.saga_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saga.status, SagaStatus::Completed);
    assert_eq!(
        saga.step_names(),
        vec![
            "draft_created",
            "customer_created",
            "authorization_held",
            "order_finalized"
        ]
    );

    let stored = h.store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored, order);
    assert!(
        h.notifier
            .effects_for(order.id)
            .contains(&SideEffect::NotifyCustomer)
    );
}

#[tokio::test]
async fn test_hold_amount_is_capped() {
    let h = harness(PaymentStrategy::default()).await;
    let order = h
        .saga
        .execute(booking(ServiceType::PickupDelivery, 24_000, "tok_visa"))
        .await
        .unwrap();
    let saga = h
        .store
        .get_saga(order.payment.saga_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    let held = saga.steps.iter().find_map(|r| match &r.step {
        domain::SagaStep::AuthorizationHeld { amount, .. } => Some(*amount),
        _ => None,
    });
    assert_eq!(held, Some(Money::from_cents(25_000)));
}

#[tokio::test]
async fn test_save_and_validate_reverses_verification() {
    let h = harness(PaymentStrategy::save_and_validate()).await;
    let order = h
        .saga
        .execute(booking(ServiceType::OnSite, 12_000, "tok_visa"))
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Scheduled);
    assert!(order.payment.authorization_ref.is_none());
    assert!(order.payment.payment_method_ref.is_some());
    assert_eq!(h.gateway.attached_payment_methods().await, 1);
    assert_eq!(h.gateway.outstanding_charges().await, 0);
    assert_eq!(h.gateway.calls(GatewayOp::AuthorizeHold).await, 0);
}

#[tokio::test]
async fn test_booking_captures_policy_in_force() {
    let h = harness(PaymentStrategy::default()).await;
    h.store
        .put_policy(CancellationPolicy {
            id: "std-pickup".to_string(),
            version: 2,
            service_type: ServiceType::PickupDelivery,
            notice_hours: 48,
            fee_percent: FeeRate::from_bps(2_000),
            active: true,
        })
        .await
        .unwrap();

    let order = h
        .saga
        .execute(booking(ServiceType::PickupDelivery, 5_000, "tok_visa"))
        .await
        .unwrap();
    assert_eq!(order.policy.policy_version, 2);
    assert_eq!(order.policy.notice_hours, 48);
    assert_eq!(order.policy.fee_percent, FeeRate::from_bps(2_000));
}

#[tokio::test]
async fn test_draft_insert_failure_calls_no_gateway() {
    let h = harness(PaymentStrategy::default()).await;
    h.store.set_fail_on_insert(true).await;

    let failure = failure(
        h.saga
            .execute(booking(ServiceType::PickupDelivery, 5_000, "tok_visa"))
            .await
            .unwrap_err(),
    );
    assert_eq!(failure.step, STEP_CREATE_DRAFT);
    assert!(!failure.reconciliation_required);
    assert_eq!(h.gateway.calls(GatewayOp::CreateCustomer).await, 0);
    assert_eq!(h.store.order_count().await, 0);

    let saga = h.store.get_saga(failure.saga_id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);
    assert!(saga.steps.is_empty());
}

#[tokio::test]
async fn test_declined_card_deletes_draft() {
    let h = harness(PaymentStrategy::default()).await;
    let failure = failure(
        h.saga
            .execute(booking(ServiceType::PickupDelivery, 5_000, "tok_decline"))
            .await
            .unwrap_err(),
    );

    assert_eq!(failure.step, STEP_SECURE_PAYMENT);
    assert!(matches!(
        &failure.cause,
        OrderServiceError::Payment(e) if e.kind == PaymentErrorKind::CardDeclined
    ));
    assert!(!failure.cause.is_retryable());
    assert_eq!(h.store.order_count().await, 0);
    assert_eq!(h.gateway.active_authorizations().await, 0);

    let saga = h.store.get_saga(failure.saga_id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);
    assert!(!saga.needs_reconciliation);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_hold_flags_reconciliation() {
    let h = harness(PaymentStrategy::default()).await;
    h.gateway
        .set_op_latency(GatewayOp::AuthorizeHold, Some(std::time::Duration::from_secs(20)))
        .await;

    let failure = failure(
        h.saga
            .execute(booking(ServiceType::PickupDelivery, 5_000, "tok_visa"))
            .await
            .unwrap_err(),
    );
    assert_eq!(failure.step, STEP_SECURE_PAYMENT);
    assert!(matches!(
        &failure.cause,
        OrderServiceError::Payment(e) if e.kind == PaymentErrorKind::NetworkError
    ));
    assert!(failure.reconciliation_required);
    assert_eq!(h.store.order_count().await, 0);

    let saga = h.store.get_saga(failure.saga_id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);
    assert!(saga.needs_reconciliation);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_verification_flags_reconciliation() {
    let h = harness(PaymentStrategy::save_and_validate()).await;
    h.gateway
        .set_op_latency(
            GatewayOp::VerifyPaymentMethod,
            Some(std::time::Duration::from_secs(20)),
        )
        .await;

    let failure = failure(
        h.saga
            .execute(booking(ServiceType::OnSite, 8_000, "tok_visa"))
            .await
            .unwrap_err(),
    );
    assert!(failure.reconciliation_required);
    assert_eq!(h.gateway.calls(GatewayOp::DetachPaymentMethod).await, 1);
    let saga = h.store.get_saga(failure.saga_id).await.unwrap().unwrap();
    assert!(saga.needs_reconciliation);
}

#[tokio::test]
async fn test_failed_verification_detaches_payment_method() {
    let h = harness(PaymentStrategy::save_and_validate()).await;
    h.gateway
        .set_failure(
            GatewayOp::VerifyPaymentMethod,
            GatewayError::Declined {
                code: "card_declined".to_string(),
                message: "declined".to_string(),
            },
        )
        .await;

    let failure = failure(
        h.saga
            .execute(booking(ServiceType::OnSite, 8_000, "tok_visa"))
            .await
            .unwrap_err(),
    );
    assert_eq!(failure.step, STEP_SECURE_PAYMENT);
    assert!(!failure.reconciliation_required);
    assert_eq!(h.gateway.calls(GatewayOp::DetachPaymentMethod).await, 1);
    assert_eq!(h.gateway.attached_payment_methods().await, 0);
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_finalize_failure_voids_hold_and_deletes_draft() {
    let h = harness(PaymentStrategy::default()).await;
    h.store.set_fail_on_update(true).await;

    let failure = failure(
        h.saga
            .execute(booking(ServiceType::PickupDelivery, 5_000, "tok_visa"))
            .await
            .unwrap_err(),
    );
    assert_eq!(failure.step, STEP_FINALIZE);
    assert!(!failure.reconciliation_required);
    assert_eq!(h.gateway.calls(GatewayOp::VoidAuthorization).await, 1);
    assert_eq!(h.gateway.active_authorizations().await, 0);
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_failed_compensation_flags_reconciliation() {
    let h = harness(PaymentStrategy::default()).await;
    h.store.set_fail_on_update(true).await;
    h.gateway
        .set_failure(
            GatewayOp::VoidAuthorization,
            GatewayError::Connection("reset by peer".to_string()),
        )
        .await;

    let failure = failure(
        h.saga
            .execute(booking(ServiceType::PickupDelivery, 5_000, "tok_visa"))
            .await
            .unwrap_err(),
    );
    assert!(failure.reconciliation_required);
    assert_eq!(h.gateway.active_authorizations().await, 1);
    // The remaining compensations still ran.
    assert_eq!(h.store.order_count().await, 0);

    let saga = h.store.get_saga(failure.saga_id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);
    assert!(saga.needs_reconciliation);
}

#[tokio::test]
async fn test_open_payment_breaker_fails_fast() {
    let h = harness(PaymentStrategy::default()).await;
    for _ in 0..5 {
        let _ = h
            .guarded
            .guard()
            .execute(CallKind::Payment, async {
                Err::<(), _>(GatewayError::Connection("down".to_string()))
            })
            .await;
    }

    let failure = failure(
        h.saga
            .execute(booking(ServiceType::PickupDelivery, 5_000, "tok_visa"))
            .await
            .unwrap_err(),
    );
    assert!(matches!(
        &failure.cause,
        OrderServiceError::Payment(e) if e.kind == PaymentErrorKind::CircuitOpen
    ));
    assert!(failure.cause.is_retryable());
    assert_eq!(h.gateway.calls(GatewayOp::AuthorizeHold).await, 0);
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_missing_policy_runs_no_steps() {
    let h = harness(PaymentStrategy::default()).await;
    h.store.clear().await;

    let err = h
        .saga
        .execute(booking(ServiceType::OnSite, 5_000, "tok_visa"))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::NoActivePolicy(ServiceType::OnSite)));
    assert!(!err.is_retryable());
    assert_eq!(h.gateway.calls(GatewayOp::CreateCustomer).await, 0);
}

#[tokio::test]
async fn test_past_schedule_is_rejected() {
    let h = harness(PaymentStrategy::default()).await;
    let mut request = booking(ServiceType::OnSite, 5_000, "tok_visa");
    request.scheduled_time = Utc::now() - Duration::hours(1);
    assert!(matches!(
        h.saga.execute(request).await.unwrap_err(),
        SagaError::Validation(_)
    ));
}

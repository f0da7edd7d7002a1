//! Lifecycle operations against the in-memory store, gateway and allocator.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{CustomerId, Money, OrderId, Version};
use domain::{
    Actor, BookingDetails, CancellationPolicy, CapacityAllocator, FeeRate, InMemoryCapacity,
    Order, OrderStatus, PolicyStore, RecordingDispatcher, RefundStatus, ServiceType, SideEffect,
    SlotId, TransitionError,
};
use gateway::{GatewayError, GatewayGuard, GatewayOp, GuardConfig, GuardedGateway, InMemoryGateway};
use orders::{LifecycleConfig, OrderService, OrderServiceError, StatusUpdate};
use store::{InMemoryStore, OrderStore, UpdateFault};

struct Harness {
    store: Arc<InMemoryStore>,
    gateway: InMemoryGateway,
    capacity: Arc<InMemoryCapacity>,
    notifier: Arc<RecordingDispatcher>,
    service: OrderService<InMemoryStore>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let gateway = InMemoryGateway::new();
    let capacity = Arc::new(InMemoryCapacity::new());
    let notifier = Arc::new(RecordingDispatcher::new());
    let guarded = GuardedGateway::new(
        Arc::new(gateway.clone()),
        Arc::new(GatewayGuard::new(GuardConfig::default())),
    );
    let service = OrderService::new(
        store.clone(),
        guarded,
        capacity.clone(),
        notifier.clone(),
        LifecycleConfig::default(),
    );
    Harness {
        store,
        gateway,
        capacity,
        notifier,
        service,
    }
}

fn policy(fee_bps: u32, version: u32) -> CancellationPolicy {
    CancellationPolicy {
        id: "std-pickup".to_string(),
        version,
        service_type: ServiceType::PickupDelivery,
        notice_hours: 24,
        fee_percent: FeeRate::from_bps(fee_bps),
        active: true,
    }
}

/// Inserts a paid order and moves it to `scheduled`, `hours_ahead` hours out.
async fn scheduled_order(h: &Harness, total: i64, hours_ahead: i64) -> Order {
    let now = Utc::now();
    let slot = SlotId::new(format!("slot-{}", OrderId::new()));
    let mut draft = Order::draft(
        OrderId::new(),
        BookingDetails {
            customer_id: CustomerId::new(),
            service_type: ServiceType::PickupDelivery,
            slot_ids: vec![slot.clone()],
            scheduled_time: now + Duration::hours(hours_ahead),
            estimated_total: Money::from_cents(total),
        },
        policy(1_500, 1).snapshot(),
        now,
    );
    draft.payment.gateway_customer_ref = Some("cus_test".to_string());
    draft.payment.authorization_ref = Some("auth_test".to_string());
    draft.payment.payment_method_ref = Some("pm_test".to_string());
    h.store.insert_order(&draft).await.unwrap();
    h.capacity.reserve_slot(&slot, draft.id).await.unwrap();

    let ctx = h.service.config().context(now);
    h.service
        .transitions()
        .apply(&draft, OrderStatus::Scheduled, Actor::System, &ctx)
        .await
        .unwrap()
        .order
}

#[tokio::test]
async fn test_cancel_with_notice_refunds_everything() {
    let h = harness();
    let order = scheduled_order(&h, 10_000, 48).await;

    let outcome = h
        .service
        .cancel(order.id, Actor::Customer, Some("plans changed".to_string()))
        .await
        .unwrap();
    assert_eq!(outcome.fee, Money::zero());
    assert_eq!(outcome.refund, Money::from_cents(10_000));
    assert_eq!(outcome.refund_status, RefundStatus::Requested);
    assert!(!outcome.already_final);

    let refunds = h.gateway.refunds().await;
    assert_eq!(refunds, vec![("auth_test".to_string(), Money::from_cents(10_000))]);

    let stored = h.service.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Canceled);
    let record = stored.cancellation.unwrap();
    assert!(record.refund_ref.is_some());
    assert_eq!(record.reason.as_deref(), Some("plans changed"));
    let effects = h.notifier.effects_for(order.id);
    assert!(effects.contains(&SideEffect::NotifyPartner));
    assert!(!effects.contains(&SideEffect::RefundPayment));
}

#[tokio::test]
async fn test_cancel_inside_notice_charges_fee() {
    let h = harness();
    let order = scheduled_order(&h, 10_000, 12).await;

    let outcome = h.service.cancel(order.id, Actor::Customer, None).await.unwrap();
    assert_eq!(outcome.fee, Money::from_cents(1_500));
    assert_eq!(outcome.refund, Money::from_cents(8_500));
}

#[tokio::test]
async fn test_cancel_uses_locked_policy_snapshot() {
    let h = harness();
    h.store.put_policy(policy(1_500, 1)).await.unwrap();
    let order = scheduled_order(&h, 10_000, 12).await;

    // The live policy changes after booking.
    h.store.put_policy(policy(5_000, 2)).await.unwrap();
    let live = h
        .store
        .active_policy(ServiceType::PickupDelivery)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.version, 2);

    let outcome = h.service.cancel(order.id, Actor::Customer, None).await.unwrap();
    assert_eq!(outcome.fee, Money::from_cents(1_500));
}

#[tokio::test]
async fn test_cancel_of_final_order_is_a_no_op() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 48).await;
    let first = h.service.cancel(order.id, Actor::Customer, None).await.unwrap();

    let second = h.service.cancel(order.id, Actor::Admin, None).await.unwrap();
    assert!(second.already_final);
    assert_eq!(second.version, first.version);
    assert_eq!(second.refund, first.refund);
    assert_eq!(h.gateway.refunds().await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_cancels_refund_once() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 48).await;

    let (a, b) = tokio::join!(
        h.service.cancel(order.id, Actor::Customer, None),
        h.service.cancel(order.id, Actor::Admin, None),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.already_final, b.already_final);
    assert_eq!(h.gateway.refunds().await.len(), 1);
}

#[tokio::test]
async fn test_refund_failure_flags_reconciliation() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 48).await;
    h.gateway
        .set_failure(GatewayOp::Refund, GatewayError::Connection("reset".to_string()))
        .await;

    let outcome = h.service.cancel(order.id, Actor::Customer, None).await.unwrap();
    assert_eq!(outcome.refund_status, RefundStatus::PendingReconciliation);

    let stored = h.service.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Canceled);
    assert_eq!(
        stored.cancellation.unwrap().refund_status,
        RefundStatus::PendingReconciliation
    );
    assert!(stored.payment.last_payment_error.is_some());
}

#[tokio::test]
async fn test_cancel_not_allowed_for_partner() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 48).await;
    let err = h
        .service
        .cancel(order.id, Actor::Partner, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderServiceError::Transition(TransitionError::Unauthorized { .. })
    ));
}

#[tokio::test]
async fn test_reschedule_links_rows_and_moves_capacity() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 72).await;
    let old_slot = order.slot_ids[0].clone();
    let new_slot = SlotId::new("slot-new");
    let new_time = Utc::now() + Duration::hours(96);

    let outcome = h
        .service
        .reschedule(order.id, vec![new_slot.clone()], new_time, Actor::Customer)
        .await
        .unwrap();

    let old = h.service.get_order(order.id).await.unwrap();
    assert_eq!(old.status, OrderStatus::Rescheduled);
    assert_eq!(old.rescheduled_to, Some(outcome.new_order_id));

    let new = outcome.new_order;
    assert_eq!(new.status, OrderStatus::Scheduled);
    assert_eq!(new.version, Version::new(1));
    assert_eq!(new.rescheduled_from, Some(order.id));
    assert_eq!(new.scheduled_time, new_time);
    assert_eq!(new.policy, order.policy);
    assert_eq!(new.payment.authorization_ref, order.payment.authorization_ref);

    assert_eq!(h.capacity.holder(&new_slot), Some(outcome.new_order_id));
    assert_eq!(h.capacity.holder(&old_slot), None);
    assert!(!outcome.reconciliation_required);
    assert_eq!(h.gateway.calls(GatewayOp::AuthorizeHold).await, 0);
}

#[tokio::test]
async fn test_reschedule_retries_a_failed_promote() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 72).await;
    let new_slot = SlotId::new("slot-retry");
    h.store.fail_updates(1, 1, UpdateFault::Unavailable).await;

    let outcome = h
        .service
        .reschedule(
            order.id,
            vec![new_slot.clone()],
            Utc::now() + Duration::hours(96),
            Actor::Customer,
        )
        .await
        .unwrap();
    assert!(!outcome.reconciliation_required);
    assert_eq!(outcome.new_order.status, OrderStatus::Scheduled);
    assert_eq!(h.capacity.holder(&new_slot), Some(outcome.new_order_id));
}

#[tokio::test]
async fn test_reschedule_with_stuck_promote_keeps_the_link() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 72).await;
    let old_slot = order.slot_ids[0].clone();
    let new_slot = SlotId::new("slot-stuck");
    h.store.fail_updates(1, 10, UpdateFault::Unavailable).await;

    let outcome = h
        .service
        .reschedule(
            order.id,
            vec![new_slot.clone()],
            Utc::now() + Duration::hours(96),
            Actor::Customer,
        )
        .await
        .unwrap();
    assert!(outcome.reconciliation_required);
    assert_eq!(outcome.new_order.status, OrderStatus::Draft);

    let old = h.service.get_order(order.id).await.unwrap();
    assert_eq!(old.status, OrderStatus::Rescheduled);
    assert_eq!(old.rescheduled_to, Some(outcome.new_order_id));
    let new = h.service.get_order(outcome.new_order_id).await.unwrap();
    assert_eq!(new.rescheduled_from, Some(order.id));

    assert_eq!(h.capacity.holder(&old_slot), None);
    assert_eq!(h.capacity.holder(&new_slot), Some(outcome.new_order_id));
}

#[tokio::test]
async fn test_reschedule_inside_notice_is_refused() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 10).await;
    let err = h
        .service
        .reschedule(
            order.id,
            vec![SlotId::new("slot-x")],
            Utc::now() + Duration::hours(30),
            Actor::Customer,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrderServiceError::RescheduleNotAllowed { .. }));
}

#[tokio::test]
async fn test_reschedule_to_taken_slot_changes_nothing() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 72).await;
    let taken = SlotId::new("slot-taken");
    h.capacity.reserve_slot(&taken, OrderId::new()).await.unwrap();
    let rows_before = h.store.order_count().await;

    let err = h
        .service
        .reschedule(
            order.id,
            vec![taken],
            Utc::now() + Duration::hours(96),
            Actor::Customer,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrderServiceError::Collaborator(_)));
    assert_eq!(h.store.order_count().await, rows_before);
    let current = h.service.get_order(order.id).await.unwrap();
    assert_eq!(current.status, OrderStatus::Scheduled);
}

#[tokio::test]
async fn test_force_status_is_audited_as_override() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 48).await;

    let applied = h
        .service
        .force_status(order.id, OrderStatus::PickedUp, "partner app offline".to_string())
        .await
        .unwrap();
    assert_eq!(applied.order.status, OrderStatus::PickedUp);

    let trail = h.service.audit_trail(order.id).await.unwrap();
    let last = trail.last().unwrap();
    assert!(last.is_override);
    assert_eq!(last.actor, Actor::Admin);
    assert_eq!(last.reason.as_deref(), Some("partner app offline"));
}

#[tokio::test]
async fn test_force_status_stays_inside_the_table() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 48).await;

    let err = h
        .service
        .force_status(order.id, OrderStatus::Delivered, "skip ahead".to_string())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderServiceError::Transition(TransitionError::InvalidTransition { .. })
    ));

    let err = h
        .service
        .force_status(order.id, OrderStatus::PickedUp, "  ".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, OrderServiceError::Validation(_)));
}

#[tokio::test]
async fn test_quote_needing_approval_then_approved() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 48).await;

    let quoted = h
        .service
        .submit_quote(
            order.id,
            Money::from_cents(7_200),
            Some(serde_json::json!({"weight_grams": 5400})),
            Actor::Partner,
        )
        .await
        .unwrap();
    assert_eq!(quoted.order.status, OrderStatus::AwaitingPayment);
    assert!(quoted.emits(SideEffect::RequestQuoteApproval));

    let approved = h.service.approve_quote(order.id).await.unwrap();
    assert_eq!(approved.order.status, OrderStatus::Processing);
    assert_eq!(approved.order.final_total, Some(Money::from_cents(7_200)));
    assert_eq!(approved.order.payment.charge_attempts, 1);
}

#[tokio::test]
async fn test_quote_within_threshold_auto_charges() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 48).await;

    let applied = h
        .service
        .submit_quote(order.id, Money::from_cents(5_800), None, Actor::Partner)
        .await
        .unwrap();
    assert_eq!(applied.order.status, OrderStatus::Processing);
    assert_eq!(applied.order.version, order.version.next());
    assert!(applied.emits(SideEffect::ChargePaymentMethod));
}

#[tokio::test]
async fn test_quote_rejects_non_positive_amount() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 48).await;
    let err = h
        .service
        .submit_quote(order.id, Money::zero(), None, Actor::Partner)
        .await
        .unwrap_err();
    assert!(matches!(err, OrderServiceError::Validation(_)));
}

#[tokio::test]
async fn test_partner_walks_the_pickup_leg() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 48).await;

    let err = h
        .service
        .update_status(order.id, StatusUpdate::new(OrderStatus::PickedUp, Actor::Customer))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderServiceError::Transition(TransitionError::Unauthorized { .. })
    ));

    for to in [OrderStatus::PickedUp, OrderStatus::AtFacility] {
        let applied = h
            .service
            .update_status(order.id, StatusUpdate::new(to, Actor::Partner))
            .await
            .unwrap();
        assert_eq!(applied.order.status, to);
    }
}

#[tokio::test]
async fn test_failed_payment_retry_needs_new_method() {
    let h = harness();
    let order = scheduled_order(&h, 6_000, 48).await;
    h.service
        .submit_quote(order.id, Money::from_cents(9_000), None, Actor::Partner)
        .await
        .unwrap();
    h.service.approve_quote(order.id).await.unwrap();
    h.service
        .update_status(order.id, StatusUpdate::new(OrderStatus::PaymentFailed, Actor::System))
        .await
        .unwrap();

    let err = h
        .service
        .update_status(order.id, StatusUpdate::new(OrderStatus::Processing, Actor::Customer))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderServiceError::Transition(TransitionError::ConditionNotMet(_))
    ));

    let applied = h
        .service
        .update_status(
            order.id,
            StatusUpdate::new(OrderStatus::Processing, Actor::Customer)
                .with_new_payment_method("pm_replacement"),
        )
        .await
        .unwrap();
    assert_eq!(applied.order.payment.payment_method_ref.as_deref(), Some("pm_replacement"));
    assert_eq!(applied.order.payment.charge_attempts, 2);
}

#[tokio::test]
async fn test_missing_order_is_not_found() {
    let h = harness();
    let err = h.service.get_order(OrderId::new()).await.unwrap_err();
    assert!(err.is_not_found());
}

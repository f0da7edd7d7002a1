//! Version-guarded writes under concurrent writers, against the in-memory
//! backend.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{CustomerId, Money, OrderId, Version};
use domain::{BookingDetails, FeeRate, Order, OrderStatus, PolicySnapshot, ServiceType};
use store::{InMemoryStore, OrderStore, OrderStoreExt, OrderUpdate, StoreError};

fn draft() -> Order {
    let now = Utc::now();
    Order::draft(
        OrderId::new(),
        BookingDetails {
            customer_id: CustomerId::new(),
            service_type: ServiceType::OnSite,
            slot_ids: vec!["slot-9".into()],
            scheduled_time: now + Duration::hours(4),
            estimated_total: Money::from_cents(9_000),
        },
        PolicySnapshot {
            policy_id: "std".to_string(),
            policy_version: 3,
            notice_hours: 24,
            fee_percent: FeeRate::from_bps(1_000),
        },
        now,
    )
}

#[tokio::test]
async fn two_writers_with_same_base_version() {
    let store = Arc::new(InMemoryStore::new());
    let order = draft();
    store.insert_order(&order).await.unwrap();

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let store = store.clone();
            let id = order.id;
            tokio::spawn(async move {
                store
                    .update_with_version(
                        id,
                        OrderUpdate::new(Version::initial(), move |o| {
                            o.recorded_quantity = Some(i);
                        }),
                    )
                    .await
            })
        })
        .collect();

    let mut ok = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(written) => {
                assert_eq!(written.version, Version::new(1));
                ok += 1;
            }
            Err(StoreError::Conflict { expected, .. }) => {
                assert_eq!(expected, Version::initial());
                conflicts += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((ok, conflicts), (1, 1));
}

#[tokio::test]
async fn many_writers_each_version_written_once() {
    let store = Arc::new(InMemoryStore::new());
    let order = draft();
    store.insert_order(&order).await.unwrap();

    // Each task retries on conflict until its write lands.
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            let id = order.id;
            tokio::spawn(async move {
                loop {
                    let current = store.require_order(id).await.unwrap();
                    let update = OrderUpdate::new(current.version, |o| {
                        o.payment.charge_attempts += 1;
                    });
                    match store.update_with_version(id, update).await {
                        Ok(written) => return written.version,
                        Err(e) if e.is_conflict() => continue,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap().as_i64());
    }
    versions.sort_unstable();
    assert_eq!(versions, (1..=16).collect::<Vec<i64>>());

    let final_row = store.require_order(order.id).await.unwrap();
    assert_eq!(final_row.version, Version::new(16));
    assert_eq!(final_row.payment.charge_attempts, 16);
    assert_eq!(final_row.status, OrderStatus::Draft);
}

#[tokio::test]
async fn require_order_reports_missing_rows() {
    let store = InMemoryStore::new();
    let err = store.require_order(OrderId::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::OrderNotFound(_)));
}

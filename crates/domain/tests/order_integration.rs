//! Integration tests for the order lifecycle table.
//!
//! These tests check properties of the whole table rather than single rules:
//! closure over undeclared pairs, terminal states and the two service legs.

use chrono::{Duration, Utc};
use common::{CustomerId, Money, OrderId};
use domain::{
    Actor, BookingDetails, FeeRate, Order, OrderStatus, PolicyEngine, PolicySnapshot, ServiceType,
    StateMachine, TransitionContext, TransitionError,
};
use domain::order::TRANSITIONS;

const ACTORS: [Actor; 4] = [Actor::Customer, Actor::Partner, Actor::Admin, Actor::System];

fn order(service_type: ServiceType, status: OrderStatus) -> Order {
    let now = Utc::now();
    let mut order = Order::draft(
        OrderId::new(),
        BookingDetails {
            customer_id: CustomerId::new(),
            service_type,
            slot_ids: vec!["slot-1".into()],
            scheduled_time: now + Duration::hours(10),
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
    order
}

fn declared(service_type: ServiceType, from: OrderStatus, to: OrderStatus) -> bool {
    TRANSITIONS
        .iter()
        .any(|t| t.from == from && t.to == to && t.applies_to(service_type))
}

mod closure {
    use super::*;

    #[test]
    fn undeclared_pairs_are_invalid_for_every_actor() {
        let sm = StateMachine::new();
        // A context where every condition holds, so only the table decides.
        let ctx = TransitionContext::at(Utc::now() + Duration::days(2))
            .with_payment_confirmed()
            .with_new_payment_method("pm_any")
            .with_auto_charge_threshold(FeeRate::from_bps(10_000));

        for service_type in ServiceType::ALL {
            for from in OrderStatus::ALL {
                let mut o = order(service_type, from);
                o.quoted_total = Some(Money::from_cents(6_000));
                for to in OrderStatus::ALL {
                    if declared(service_type, from, to) {
                        continue;
                    }
                    for actor in ACTORS {
                        let result = sm.validate(&o, to, actor, &ctx);
                        assert_eq!(
                            result,
                            Err(TransitionError::InvalidTransition { from, to }),
                            "{service_type}: {from} -> {to} as {actor}"
                        );
                    }
                    assert!(sm.validate_override(&o, to).is_err());
                }
            }
        }
    }

    #[test]
    fn declared_pairs_admit_some_actor() {
        let sm = StateMachine::new();
        let ctx = TransitionContext::at(Utc::now() + Duration::days(2))
            .with_payment_confirmed()
            .with_new_payment_method("pm_any")
            .with_auto_charge_threshold(FeeRate::from_bps(10_000));

        for service_type in ServiceType::ALL {
            for from in OrderStatus::ALL {
                let mut o = order(service_type, from);
                o.quoted_total = Some(Money::from_cents(6_000));
                for to in OrderStatus::ALL {
                    if !declared(service_type, from, to) {
                        continue;
                    }
                    assert!(
                        ACTORS.iter().any(|a| sm.validate(&o, to, *a, &ctx).is_ok()),
                        "{service_type}: {from} -> {to} admits nobody"
                    );
                }
            }
        }
    }

    #[test]
    fn terminal_statuses_reject_everything() {
        let sm = StateMachine::new();
        let ctx = TransitionContext::default();
        for from in OrderStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            let o = order(ServiceType::PickupDelivery, from);
            for to in OrderStatus::ALL {
                for actor in ACTORS {
                    assert!(matches!(
                        sm.validate(&o, to, actor, &ctx),
                        Err(TransitionError::InvalidTransition { .. })
                    ));
                }
            }
        }
    }
}

mod legs {
    use super::*;

    fn walk(service_type: ServiceType, path: &[(OrderStatus, Actor)]) {
        let sm = StateMachine::new();
        let mut o = order(service_type, OrderStatus::Draft);
        let ctx = TransitionContext::default();
        for (to, actor) in path {
            sm.validate(&o, *to, *actor, &ctx)
                .unwrap_or_else(|e| panic!("{} -> {to}: {e}", o.status));
            o.status = *to;
        }
        assert!(o.status.is_terminal());
    }

    #[test]
    fn pickup_delivery_happy_path() {
        walk(
            ServiceType::PickupDelivery,
            &[
                (OrderStatus::Scheduled, Actor::System),
                (OrderStatus::PickedUp, Actor::Partner),
                (OrderStatus::AtFacility, Actor::Partner),
                (OrderStatus::AwaitingPayment, Actor::Partner),
                (OrderStatus::Processing, Actor::Customer),
                (OrderStatus::OutForDelivery, Actor::Partner),
                (OrderStatus::Delivered, Actor::Partner),
            ],
        );
    }

    #[test]
    fn on_site_happy_path() {
        walk(
            ServiceType::OnSite,
            &[
                (OrderStatus::Scheduled, Actor::System),
                (OrderStatus::Arrived, Actor::Partner),
                (OrderStatus::InService, Actor::Partner),
                (OrderStatus::AwaitingPayment, Actor::Partner),
                (OrderStatus::Processing, Actor::Customer),
                (OrderStatus::Completed, Actor::Partner),
            ],
        );
    }
}

mod fees {
    use super::*;

    #[test]
    fn awaiting_payment_is_not_service_started() {
        let now = Utc::now();
        let mut o = order(ServiceType::PickupDelivery, OrderStatus::AwaitingPayment);
        o.scheduled_time = now + Duration::hours(10);
        o.quoted_total = Some(Money::from_cents(5_500));

        let quote = PolicyEngine::calculate_fee(&o, now);
        assert_eq!(quote.fee, Money::from_cents(825));
        assert_eq!(quote.refund, Money::from_cents(4_675));
    }
}

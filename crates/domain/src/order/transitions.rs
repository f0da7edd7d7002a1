//! Declarative transition table.
//!
//! Each [`Transition`] is `(from, to, actors, conditions, side_effects)`,
//! optionally scoped to one service type. Several rules may share a
//! `(from, to)` pair when different actors need different conditions.

use serde::{Deserialize, Serialize};

use super::{Actor, OrderStatus, ServiceType};

/// Named predicates a transition can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// The no-show grace period after the scheduled start has elapsed.
    NoShowTimeoutReached,
    /// The quoted amount differs from the estimate by no more than the
    /// configured auto-charge threshold.
    AutoChargeWithinThreshold,
    /// The caller supplied a replacement payment method.
    NewPaymentMethodProvided,
    /// The gateway confirmed the charge or a delayed authorization.
    PaymentConfirmed,
    /// Fewer than [`MAX_CHARGE_ATTEMPTS`] charge attempts have been made.
    ChargeAttemptsRemaining,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::NoShowTimeoutReached => "no_show_timeout_reached",
            Condition::AutoChargeWithinThreshold => "auto_charge_within_threshold",
            Condition::NewPaymentMethodProvided => "new_payment_method_provided",
            Condition::PaymentConfirmed => "payment_confirmed",
            Condition::ChargeAttemptsRemaining => "charge_attempts_remaining",
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Side effects a transition emits. Executing them belongs to the
/// notification dispatcher and other collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    NotifyCustomer,
    NotifyPartner,
    ReleaseCapacity,
    ChargeNoShowFee,
    ChargePaymentMethod,
    RefundPayment,
    RequestQuoteApproval,
}

impl SideEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffect::NotifyCustomer => "notify_customer",
            SideEffect::NotifyPartner => "notify_partner",
            SideEffect::ReleaseCapacity => "release_capacity",
            SideEffect::ChargeNoShowFee => "charge_no_show_fee",
            SideEffect::ChargePaymentMethod => "charge_payment_method",
            SideEffect::RefundPayment => "refund_payment",
            SideEffect::RequestQuoteApproval => "request_quote_approval",
        }
    }
}

impl std::fmt::Display for SideEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ceiling on charge attempts per order (the first charge plus one retry).
pub const MAX_CHARGE_ATTEMPTS: u32 = 2;

/// One declared edge of the order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// `None` applies the rule to every service type.
    pub service_type: Option<ServiceType>,
    pub actors: &'static [Actor],
    pub conditions: &'static [Condition],
    pub side_effects: &'static [SideEffect],
}

impl Transition {
    pub fn applies_to(&self, service_type: ServiceType) -> bool {
        self.service_type.is_none_or(|scoped| scoped == service_type)
    }

    pub fn allows(&self, actor: Actor) -> bool {
        self.actors.contains(&actor)
    }
}

use Actor::{Admin, Customer, Partner, System};
use OrderStatus::*;
use SideEffect::*;

const fn rule(
    from: OrderStatus,
    to: OrderStatus,
    actors: &'static [Actor],
    conditions: &'static [Condition],
    side_effects: &'static [SideEffect],
) -> Transition {
    Transition {
        from,
        to,
        service_type: None,
        actors,
        conditions,
        side_effects,
    }
}

const fn scoped(service_type: ServiceType, transition: Transition) -> Transition {
    Transition {
        service_type: Some(service_type),
        ..transition
    }
}

const PICKUP: ServiceType = ServiceType::PickupDelivery;
const ON_SITE: ServiceType = ServiceType::OnSite;

/// The complete lifecycle table.
pub static TRANSITIONS: &[Transition] = &[
    // Booking
    rule(Draft, Scheduled, &[System], &[], &[NotifyCustomer, NotifyPartner]),
    // Pickup/delivery leg
    scoped(PICKUP, rule(Scheduled, PickedUp, &[Partner], &[], &[NotifyCustomer])),
    scoped(PICKUP, rule(PickedUp, AtFacility, &[Partner, System], &[], &[])),
    scoped(
        PICKUP,
        rule(AtFacility, AwaitingPayment, &[Partner, System], &[], &[RequestQuoteApproval, NotifyCustomer]),
    ),
    scoped(
        PICKUP,
        rule(Scheduled, AwaitingPayment, &[Partner, System], &[], &[RequestQuoteApproval, NotifyCustomer]),
    ),
    scoped(PICKUP, rule(Processing, OutForDelivery, &[Partner], &[], &[NotifyCustomer])),
    scoped(PICKUP, rule(OutForDelivery, Delivered, &[Partner], &[], &[NotifyCustomer])),
    // On-site leg
    scoped(ON_SITE, rule(Scheduled, Arrived, &[Partner], &[], &[NotifyCustomer])),
    scoped(ON_SITE, rule(Arrived, InService, &[Partner], &[], &[])),
    scoped(
        ON_SITE,
        rule(InService, AwaitingPayment, &[Partner, System], &[], &[RequestQuoteApproval, NotifyCustomer]),
    ),
    scoped(
        ON_SITE,
        rule(
            Arrived,
            Canceled,
            &[Partner, System],
            &[Condition::NoShowTimeoutReached],
            &[ChargeNoShowFee, ReleaseCapacity, NotifyCustomer],
        ),
    ),
    scoped(ON_SITE, rule(Processing, Completed, &[Partner, System], &[], &[NotifyCustomer])),
    // Payment
    rule(AwaitingPayment, Processing, &[Customer], &[], &[ChargePaymentMethod]),
    rule(
        AwaitingPayment,
        Processing,
        &[System],
        &[Condition::AutoChargeWithinThreshold],
        &[ChargePaymentMethod],
    ),
    rule(
        AwaitingPayment,
        Processing,
        &[System],
        &[Condition::PaymentConfirmed],
        &[NotifyCustomer],
    ),
    rule(AwaitingPayment, PaymentFailed, &[System], &[], &[NotifyCustomer]),
    rule(Processing, PaymentFailed, &[System], &[], &[NotifyCustomer]),
    rule(
        PaymentFailed,
        Processing,
        &[Customer],
        &[Condition::NewPaymentMethodProvided, Condition::ChargeAttemptsRemaining],
        &[ChargePaymentMethod],
    ),
    rule(PaymentFailed, Processing, &[System], &[Condition::PaymentConfirmed], &[NotifyCustomer]),
    // Cancellation and rescheduling
    rule(
        Scheduled,
        Canceled,
        &[Customer, Admin, System],
        &[],
        &[ReleaseCapacity, RefundPayment, NotifyPartner],
    ),
    rule(
        AwaitingPayment,
        Canceled,
        &[Customer, Admin],
        &[],
        &[ReleaseCapacity, RefundPayment, NotifyPartner],
    ),
    rule(PaymentFailed, Canceled, &[Customer, Admin, System], &[], &[ReleaseCapacity, NotifyPartner]),
    rule(Scheduled, Rescheduled, &[Customer, Admin], &[], &[ReleaseCapacity, NotifyPartner]),
    // Disputes
    rule(Processing, Refunded, &[System, Admin], &[], &[RefundPayment, NotifyCustomer]),
    scoped(PICKUP, rule(OutForDelivery, Refunded, &[System, Admin], &[], &[RefundPayment, NotifyCustomer])),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_have_no_outgoing_edges() {
        for t in TRANSITIONS {
            assert!(!t.from.is_terminal(), "terminal {} has an edge to {}", t.from, t.to);
        }
    }

    #[test]
    fn test_every_non_terminal_status_has_an_exit() {
        for status in OrderStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(
                TRANSITIONS.iter().any(|t| t.from == status),
                "{status} is a dead end"
            );
        }
    }

    #[test]
    fn test_every_rule_names_an_actor() {
        assert!(TRANSITIONS.iter().all(|t| !t.actors.is_empty()));
    }

    #[test]
    fn test_service_legs_are_scoped() {
        let picked_up = TRANSITIONS
            .iter()
            .find(|t| t.from == Scheduled && t.to == PickedUp)
            .unwrap();
        assert!(picked_up.applies_to(ServiceType::PickupDelivery));
        assert!(!picked_up.applies_to(ServiceType::OnSite));

        let booking = TRANSITIONS.iter().find(|t| t.from == Draft).unwrap();
        assert!(booking.applies_to(ServiceType::OnSite));
        assert!(booking.applies_to(ServiceType::PickupDelivery));
    }

    #[test]
    fn test_draft_only_leaves_to_scheduled() {
        let exits: Vec<_> = TRANSITIONS.iter().filter(|t| t.from == Draft).collect();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].to, Scheduled);
        assert_eq!(exits[0].actors, &[System]);
    }
}

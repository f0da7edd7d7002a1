//! Order lifecycle status.

use serde::{Deserialize, Serialize};

/// The lifecycle status of an order.
///
/// Pickup/delivery orders and on-site orders share the payment states but walk
/// different service legs:
/// ```text
/// pickup_delivery: draft ─► scheduled ─► picked_up ─► at_facility ─► awaiting_payment
///                  ─► processing ─► out_for_delivery ─► delivered
/// on_site:         draft ─► scheduled ─► arrived ─► in_service ─► awaiting_payment
///                  ─► processing ─► completed
/// ```
/// `canceled`, `refunded` and `rescheduled` end a row from several points;
/// `payment_failed` loops back to `processing` once a new method is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Booking accepted, payment not yet secured.
    #[default]
    Draft,
    /// Payment secured, waiting for the service window.
    Scheduled,
    /// Partner collected the items (pickup/delivery).
    PickedUp,
    /// Partner is performing the service (on-site).
    InService,
    /// Items are at the partner facility (pickup/delivery).
    AtFacility,
    /// Partner arrived at the customer location (on-site).
    Arrived,
    /// A quote is waiting for charge or customer approval.
    AwaitingPayment,
    /// The last charge attempt failed.
    PaymentFailed,
    /// Payment confirmed, service being fulfilled.
    Processing,
    /// Items are on their way back (pickup/delivery).
    OutForDelivery,
    /// Terminal: pickup/delivery order handed back.
    Delivered,
    /// Terminal: on-site service finished.
    Completed,
    /// Terminal.
    Canceled,
    /// Terminal.
    Refunded,
    /// Terminal for this row; the booking continues on a linked row.
    Rescheduled,
}

impl OrderStatus {
    /// Every status, in declaration order.
    pub const ALL: [OrderStatus; 15] = [
        OrderStatus::Draft,
        OrderStatus::Scheduled,
        OrderStatus::PickedUp,
        OrderStatus::InService,
        OrderStatus::AtFacility,
        OrderStatus::Arrived,
        OrderStatus::AwaitingPayment,
        OrderStatus::PaymentFailed,
        OrderStatus::Processing,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Canceled,
        OrderStatus::Refunded,
        OrderStatus::Rescheduled,
    ];

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered
                | OrderStatus::Completed
                | OrderStatus::Canceled
                | OrderStatus::Refunded
                | OrderStatus::Rescheduled
        )
    }

    /// Returns true once the partner has started working the order.
    ///
    /// Cancelling from one of these statuses forfeits the whole total.
    pub fn is_service_started(&self) -> bool {
        matches!(
            self,
            OrderStatus::PickedUp
                | OrderStatus::InService
                | OrderStatus::AtFacility
                | OrderStatus::Arrived
                | OrderStatus::Processing
                | OrderStatus::OutForDelivery
        )
    }

    /// Returns true while the order can still be moved to another slot.
    pub fn is_pre_service(&self) -> bool {
        matches!(self, OrderStatus::Scheduled)
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Scheduled => "scheduled",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::InService => "in_service",
            OrderStatus::AtFacility => "at_facility",
            OrderStatus::Arrived => "arrived",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::PaymentFailed => "payment_failed",
            OrderStatus::Processing => "processing",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Rescheduled => "rescheduled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown order status: {s}"))
    }
}

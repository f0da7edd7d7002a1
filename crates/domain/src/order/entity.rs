//! The order record.

use chrono::{DateTime, Duration, Utc};
use common::{CustomerId, Money, OrderId, Version};
use serde::{Deserialize, Serialize};

use crate::policy::PolicySnapshot;

use super::{OrderStatus, PaymentRefs, RefundStatus, ServiceType, SlotId};

/// Booking parameters supplied when an order is first created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub customer_id: CustomerId,
    pub service_type: ServiceType,
    pub slot_ids: Vec<SlotId>,
    pub scheduled_time: DateTime<Utc>,
    pub estimated_total: Money,
}

/// Outcome recorded on an order when it is canceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub fee: Money,
    pub refund: Money,
    pub refund_status: RefundStatus,
    pub refund_ref: Option<String>,
    pub reason: Option<String>,
}

/// An order in the marketplace.
///
/// Rows are mutated only through version-guarded writes and are never
/// physically deleted once they leave `draft`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub version: Version,
    pub status: OrderStatus,
    pub service_type: ServiceType,
    pub customer_id: CustomerId,
    pub payment: PaymentRefs,
    /// Cancellation terms locked at booking time.
    pub policy: PolicySnapshot,
    pub slot_ids: Vec<SlotId>,
    pub scheduled_time: DateTime<Utc>,
    pub estimated_total: Money,
    pub quoted_total: Option<Money>,
    pub final_total: Option<Money>,
    #[serde(default)]
    pub quote_metadata: Option<serde_json::Value>,
    /// Quantity recorded by the partner, e.g. weighed grams.
    #[serde(default)]
    pub recorded_quantity: Option<u32>,
    #[serde(default)]
    pub cancellation: Option<CancellationRecord>,
    pub rescheduled_from: Option<OrderId>,
    pub rescheduled_to: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new draft order at version 0.
    pub fn draft(
        id: OrderId,
        details: BookingDetails,
        policy: PolicySnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            version: Version::initial(),
            status: OrderStatus::Draft,
            service_type: details.service_type,
            customer_id: details.customer_id,
            payment: PaymentRefs::default(),
            policy,
            slot_ids: details.slot_ids,
            scheduled_time: details.scheduled_time,
            estimated_total: details.estimated_total,
            quoted_total: None,
            final_total: None,
            quote_metadata: None,
            recorded_quantity: None,
            cancellation: None,
            rescheduled_from: None,
            rescheduled_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The amount the customer currently owes: final, else quoted, else
    /// estimated.
    pub fn total(&self) -> Money {
        self.final_total
            .or(self.quoted_total)
            .unwrap_or(self.estimated_total)
    }

    /// Time remaining until the scheduled service start. Negative once the
    /// window has passed.
    pub fn time_until_service(&self, now: DateTime<Utc>) -> Duration {
        self.scheduled_time - now
    }

    /// Hours until the scheduled start, for logs and responses.
    pub fn hours_until_service(&self, now: DateTime<Utc>) -> f64 {
        self.time_until_service(now).num_seconds() as f64 / 3_600.0
    }
}

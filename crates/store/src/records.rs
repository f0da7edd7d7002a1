//! Rows written alongside order updates.

use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Actor, OrderStatus};
use serde::{Deserialize, Serialize};

/// One audit log row: every applied transition or override appends one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: Actor,
    pub reason: Option<String>,
    /// True when an administrator bypassed actor and condition checks.
    pub is_override: bool,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn transition(
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            from,
            to,
            actor,
            reason: None,
            is_override: false,
            recorded_at: now,
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn as_override(mut self) -> Self {
        self.is_override = true;
        self
    }
}

/// What processing a webhook event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// The event advanced the order.
    Applied,
    /// The event type is not handled.
    Ignored,
    /// The order was already terminal or at the target status; nothing changed.
    NoOp,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Applied => "applied",
            EventOutcome::Ignored => "ignored",
            EventOutcome::NoOp => "no_op",
        }
    }
}

impl std::str::FromStr for EventOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(EventOutcome::Applied),
            "ignored" => Ok(EventOutcome::Ignored),
            "no_op" => Ok(EventOutcome::NoOp),
            other => Err(format!("unknown event outcome: {other}")),
        }
    }
}

/// Idempotency ledger row for one gateway event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub event_id: String,
    pub event_type: String,
    pub order_id: Option<OrderId>,
    pub outcome: EventOutcome,
    pub payload: serde_json::Value,
    pub processed_at: DateTime<Utc>,
}

/// Result of an insert-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    Inserted,
    AlreadyExists,
}

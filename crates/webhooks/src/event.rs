//! Gateway event envelope.

use chrono::{DateTime, Utc};
use common::{Money, OrderId};
use domain::OrderStatus;
use serde::Deserialize;
use store::{EventOutcome, WebhookRecord};

use crate::error::{Result, WebhookError};

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OrderRef {
    order_id: OrderId,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    amount: Money,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChargeFailedData {
    #[serde(default = "unknown_code")]
    code: String,
    #[serde(default)]
    message: String,
}

fn unknown_code() -> String {
    "unknown".to_string()
}

#[derive(Debug, Deserialize)]
struct QuantityData {
    quantity: u32,
}

/// What a supported event asks the order to do.
#[derive(Debug, Clone, PartialEq)]
pub enum EventAction {
    QuoteSubmitted {
        amount: Money,
        metadata: Option<serde_json::Value>,
    },
    ChargeSucceeded,
    AuthorizationSucceeded,
    ChargeFailed {
        code: String,
        message: String,
    },
    DisputeCreated,
    QuantityRecorded {
        quantity: u32,
    },
}

impl EventAction {
    /// The status the order moves to first.
    pub fn target(&self) -> OrderStatus {
        match self {
            EventAction::QuoteSubmitted { .. } => OrderStatus::AwaitingPayment,
            EventAction::ChargeSucceeded | EventAction::AuthorizationSucceeded => {
                OrderStatus::Processing
            }
            EventAction::ChargeFailed { .. } => OrderStatus::PaymentFailed,
            EventAction::DisputeCreated => OrderStatus::Refunded,
            EventAction::QuantityRecorded { .. } => OrderStatus::AtFacility,
        }
    }
}

/// A parsed delivery. `action` is `None` for event types the engine does
/// not handle.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub id: String,
    pub event_type: String,
    pub order_id: Option<OrderId>,
    pub action: Option<EventAction>,
    pub payload: serde_json::Value,
}

impl GatewayEvent {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let payload: serde_json::Value = serde_json::from_slice(body)?;
        let envelope: Envelope = serde_json::from_value(payload.clone())?;
        if envelope.id.trim().is_empty() {
            return Err(WebhookError::Malformed("event id is empty".to_string()));
        }

        let data = envelope.data;
        let action = match envelope.event_type.as_str() {
            "quote_submitted" => {
                let quote: QuoteData = serde_json::from_value(data.clone())?;
                if !quote.amount.is_positive() {
                    return Err(WebhookError::Malformed(
                        "quote amount must be positive".to_string(),
                    ));
                }
                Some(EventAction::QuoteSubmitted {
                    amount: quote.amount,
                    metadata: quote.metadata,
                })
            }
            "charge_succeeded" => Some(EventAction::ChargeSucceeded),
            "authorization_succeeded" => Some(EventAction::AuthorizationSucceeded),
            "charge_failed" => {
                let failed: ChargeFailedData = serde_json::from_value(data.clone())?;
                Some(EventAction::ChargeFailed {
                    code: failed.code,
                    message: failed.message,
                })
            }
            "dispute_created" => Some(EventAction::DisputeCreated),
            "quantity_recorded" => {
                let recorded: QuantityData = serde_json::from_value(data.clone())?;
                Some(EventAction::QuantityRecorded {
                    quantity: recorded.quantity,
                })
            }
            _ => None,
        };

        let order_id = match action {
            Some(_) => Some(serde_json::from_value::<OrderRef>(data)?.order_id),
            None => serde_json::from_value::<OrderRef>(data).ok().map(|r| r.order_id),
        };

        Ok(Self {
            id: envelope.id,
            event_type: envelope.event_type,
            order_id,
            action,
            payload,
        })
    }

    pub fn record(&self, outcome: EventOutcome, now: DateTime<Utc>) -> WebhookRecord {
        WebhookRecord {
            event_id: self.id.clone(),
            event_type: self.event_type.clone(),
            order_id: self.order_id,
            outcome,
            payload: self.payload.clone(),
            processed_at: now,
        }
    }
}

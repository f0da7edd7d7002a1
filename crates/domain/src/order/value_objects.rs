//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

/// The kind of service an order books.
///
/// Selects which legs of the transition table apply and which
/// authorization cap the saga uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Items are collected, serviced at a facility and brought back.
    PickupDelivery,
    /// The partner performs the service at the customer location.
    OnSite,
}

impl ServiceType {
    pub const ALL: [ServiceType; 2] = [ServiceType::PickupDelivery, ServiceType::OnSite];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::PickupDelivery => "pickup_delivery",
            ServiceType::OnSite => "on_site",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown service type: {s}"))
    }
}

/// Who is asking for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Customer,
    Partner,
    Admin,
    /// Automated jobs and gateway callbacks.
    System,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::Customer => "customer",
            Actor::Partner => "partner",
            Actor::Admin => "admin",
            Actor::System => "system",
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Actor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Actor::Customer, Actor::Partner, Actor::Admin, Actor::System]
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown actor: {s}"))
    }
}

/// Opaque reference to a capacity slot owned by the external allocator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(String);

impl SlotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SlotId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SlotId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Payment references copied onto the order by the saga and webhooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRefs {
    /// Gateway-side customer record.
    pub gateway_customer_ref: Option<String>,
    /// Saved payment method used for later charges.
    pub payment_method_ref: Option<String>,
    /// Active authorization hold, when the hold strategy is in use.
    pub authorization_ref: Option<String>,
    /// Saga currently or last securing payment for this order.
    pub saga_id: Option<common::SagaId>,
    /// Last gateway error reported for this order.
    pub last_payment_error: Option<String>,
    /// Number of capture/charge attempts so far.
    pub charge_attempts: u32,
}

/// Refund bookkeeping for a canceled order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    /// Nothing to refund.
    NotRequired,
    /// The gateway accepted the refund request.
    Requested,
    /// The refund call failed and an operator must reconcile it.
    PendingReconciliation,
}

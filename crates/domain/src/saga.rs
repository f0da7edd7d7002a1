//! Payment saga records.
//!
//! A saga record is an append-only log of the steps one booking attempt
//! executed. Compensation walks it in reverse.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, SagaId, Version};
use serde::{Deserialize, Serialize};

/// The lifecycle of a saga record.
///
/// ```text
/// Pending ──┬──► Completed
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl SagaStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "pending",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SagaStatus::Pending),
            "completed" => Ok(SagaStatus::Completed),
            "failed" => Ok(SagaStatus::Failed),
            other => Err(format!("unknown saga status: {other}")),
        }
    }
}

/// How the saga secures payment before a booking is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Place an authorization hold for the estimate plus a buffer.
    #[default]
    AuthorizationHold,
    /// Save the payment method and prove it with a reversed verification charge.
    SaveAndValidate,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::AuthorizationHold => "authorization_hold",
            StrategyKind::SaveAndValidate => "save_and_validate",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_hold" => Ok(StrategyKind::AuthorizationHold),
            "save_and_validate" => Ok(StrategyKind::SaveAndValidate),
            other => Err(format!("unknown payment strategy: {other}")),
        }
    }
}

/// The result of one executed saga step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SagaStep {
    /// The draft order row was inserted.
    DraftCreated { order_id: OrderId },
    /// A gateway customer record exists for this booking.
    CustomerCreated { customer_ref: String },
    /// An authorization hold was placed.
    AuthorizationHeld {
        authorization_ref: String,
        /// The card the hold was placed on.
        payment_method_ref: String,
        amount: Money,
    },
    /// A payment method was saved against the gateway customer.
    PaymentMethodSaved { payment_method_ref: String },
    /// A verification charge succeeded and must be reversed.
    VerificationCharged { charge_ref: String, amount: Money },
    /// The verification charge was reversed.
    VerificationReversed { charge_ref: String },
    /// The order left draft.
    OrderFinalized { order_id: OrderId, version: Version },
}

impl SagaStep {
    pub fn name(&self) -> &'static str {
        match self {
            SagaStep::DraftCreated { .. } => "draft_created",
            SagaStep::CustomerCreated { .. } => "customer_created",
            SagaStep::AuthorizationHeld { .. } => "authorization_held",
            SagaStep::PaymentMethodSaved { .. } => "payment_method_saved",
            SagaStep::VerificationCharged { .. } => "verification_charged",
            SagaStep::VerificationReversed { .. } => "verification_reversed",
            SagaStep::OrderFinalized { .. } => "order_finalized",
        }
    }
}

/// A step result with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(flatten)]
    pub step: SagaStep,
    pub recorded_at: DateTime<Utc>,
}

/// One booking attempt's payment authorization log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSaga {
    pub id: SagaId,
    pub saga_type: String,
    pub order_id: OrderId,
    pub strategy: StrategyKind,
    pub status: SagaStatus,
    pub steps: Vec<StepRecord>,
    pub error: Option<String>,
    /// Set when a compensation call failed and an operator must reconcile.
    pub needs_reconciliation: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentSaga {
    pub const SAGA_TYPE: &'static str = "payment_authorization";

    pub fn new(id: SagaId, order_id: OrderId, strategy: StrategyKind, now: DateTime<Utc>) -> Self {
        Self {
            id,
            saga_type: Self::SAGA_TYPE.to_string(),
            order_id,
            strategy,
            status: SagaStatus::Pending,
            steps: Vec::new(),
            error: None,
            needs_reconciliation: false,
            created_at: now,
            completed_at: None,
        }
    }

    /// Appends a step result. Ignored once the saga is terminal.
    pub fn record(&mut self, step: SagaStep, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.steps.push(StepRecord {
            step,
            recorded_at: now,
        });
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = SagaStatus::Completed;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, error: impl Into<String>, needs_reconciliation: bool, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = SagaStatus::Failed;
        self.error = Some(error.into());
        self.needs_reconciliation = needs_reconciliation;
        self.completed_at = Some(now);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|r| r.step.name()).collect()
    }

    /// Returns true if a verification charge was reversed during the happy path.
    pub fn verification_reversed(&self, charge_ref: &str) -> bool {
        self.steps.iter().any(|r| {
            matches!(&r.step, SagaStep::VerificationReversed { charge_ref: c } if c == charge_ref)
        })
    }
}

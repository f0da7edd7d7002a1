//! Transition validation.

use chrono::{DateTime, Duration, Utc};

use crate::error::TransitionError;
use crate::policy::FeeRate;

use super::transitions::{Condition, MAX_CHARGE_ATTEMPTS, TRANSITIONS, Transition};
use super::{Actor, Order, OrderStatus};

/// Call context that conditions are evaluated against.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionContext {
    pub now: DateTime<Utc>,
    /// Grace period after the scheduled start before a no-show can be declared.
    pub no_show_grace: Duration,
    /// Maximum relative quote variance that may be charged without approval.
    pub auto_charge_threshold: FeeRate,
    /// Replacement payment method supplied with the request, if any.
    pub new_payment_method: Option<String>,
    /// Set when the gateway confirmed the payment this transition reflects.
    pub payment_confirmed: bool,
    /// Free-form data from the caller, kept for audit.
    pub metadata: serde_json::Value,
}

impl TransitionContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    pub fn with_no_show_grace(mut self, grace: Duration) -> Self {
        self.no_show_grace = grace;
        self
    }

    pub fn with_auto_charge_threshold(mut self, threshold: FeeRate) -> Self {
        self.auto_charge_threshold = threshold;
        self
    }

    pub fn with_new_payment_method(mut self, payment_method: impl Into<String>) -> Self {
        self.new_payment_method = Some(payment_method.into());
        self
    }

    pub fn with_payment_confirmed(mut self) -> Self {
        self.payment_confirmed = true;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl Default for TransitionContext {
    fn default() -> Self {
        Self {
            now: Utc::now(),
            no_show_grace: Duration::minutes(15),
            auto_charge_threshold: FeeRate::from_bps(500),
            new_payment_method: None,
            payment_confirmed: false,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Returns true if a quote may be charged without customer approval.
///
/// Orders without a quote, or with a zero estimate, never auto-charge.
pub fn quote_within_threshold(order: &Order, threshold: FeeRate) -> bool {
    let Some(quoted) = order.quoted_total else {
        return false;
    };
    let estimate = order.estimated_total.cents();
    if estimate <= 0 {
        return false;
    }
    // |quoted - estimate| / estimate <= bps / 10_000, in integers.
    let variance = quoted.abs_diff(order.estimated_total).cents() as i128;
    variance * 10_000 <= estimate as i128 * threshold.bps() as i128
}

fn condition_holds(condition: Condition, order: &Order, ctx: &TransitionContext) -> bool {
    match condition {
        Condition::NoShowTimeoutReached => ctx.now >= order.scheduled_time + ctx.no_show_grace,
        Condition::AutoChargeWithinThreshold => {
            quote_within_threshold(order, ctx.auto_charge_threshold)
        }
        Condition::NewPaymentMethodProvided => ctx.new_payment_method.is_some(),
        Condition::PaymentConfirmed => ctx.payment_confirmed,
        Condition::ChargeAttemptsRemaining => order.payment.charge_attempts < MAX_CHARGE_ATTEMPTS,
    }
}

/// Validates order transitions against a transition table.
#[derive(Debug, Clone, Copy)]
pub struct StateMachine {
    table: &'static [Transition],
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Creates a state machine over the standard lifecycle table.
    pub fn new() -> Self {
        Self { table: TRANSITIONS }
    }

    /// Returns every rule declared for `from → to` on the order's service type.
    pub fn rules_for<'a>(
        &'a self,
        order: &'a Order,
        to: OrderStatus,
    ) -> impl Iterator<Item = &'static Transition> + 'a {
        self.table
            .iter()
            .filter(move |t| t.from == order.status && t.to == to)
            .filter(move |t| t.applies_to(order.service_type))
    }

    /// Returns true if `to` is reachable from the order's current status.
    pub fn is_declared(&self, order: &Order, to: OrderStatus) -> bool {
        self.rules_for(order, to).next().is_some()
    }

    /// Checks whether `actor` may move `order` to `to` in context `ctx`.
    ///
    /// Returns the matching rule on success. Never mutates.
    pub fn validate(
        &self,
        order: &Order,
        to: OrderStatus,
        actor: Actor,
        ctx: &TransitionContext,
    ) -> Result<&'static Transition, TransitionError> {
        let mut declared = false;
        let mut first_unmet: Option<Condition> = None;

        for rule in self.rules_for(order, to) {
            declared = true;
            if !rule.allows(actor) {
                continue;
            }
            match rule
                .conditions
                .iter()
                .copied()
                .find(|c| !condition_holds(*c, order, ctx))
            {
                None => return Ok(rule),
                Some(unmet) => {
                    first_unmet.get_or_insert(unmet);
                }
            }
        }

        if !declared {
            return Err(TransitionError::InvalidTransition {
                from: order.status,
                to,
            });
        }
        match first_unmet {
            Some(condition) => Err(TransitionError::ConditionNotMet(condition)),
            None => Err(TransitionError::Unauthorized {
                actor,
                from: order.status,
                to,
            }),
        }
    }

    /// Administrative override: skips actor and condition checks but still
    /// requires a declared edge.
    pub fn validate_override(
        &self,
        order: &Order,
        to: OrderStatus,
    ) -> Result<&'static Transition, TransitionError> {
        self.rules_for(order, to)
            .next()
            .ok_or(TransitionError::InvalidTransition {
                from: order.status,
                to,
            })
    }
}

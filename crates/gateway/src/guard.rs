//! Failure-isolation boundary around the payment gateway.
//!
//! Every outbound call is gated by the shared quota first, then by the
//! breaker for its call kind, and finally bounded by a timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{CustomerId, Money};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::classify::PaymentError;
use crate::client::{Authorization, PaymentGateway};
use crate::error::{GatewayError, GuardError};
use crate::quota::{QuotaConfig, QuotaLimiter};

/// Selects which breaker a call is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Reads and bookkeeping calls.
    General,
    /// Calls that move or hold money.
    Payment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub general: BreakerConfig,
    pub payment: BreakerConfig,
    pub quota: QuotaConfig,
    pub timeout_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            general: BreakerConfig::default(),
            payment: BreakerConfig::default(),
            quota: QuotaConfig::default(),
            timeout_ms: 10_000,
        }
    }
}

/// Point-in-time view of the guard, for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct GuardStatus {
    pub general: BreakerState,
    pub payment: BreakerState,
    pub requests_in_window: usize,
}

#[derive(Debug)]
pub struct GatewayGuard {
    general: CircuitBreaker,
    payment: CircuitBreaker,
    quota: QuotaLimiter,
    timeout: Duration,
}

impl GatewayGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            general: CircuitBreaker::new("general", config.general),
            payment: CircuitBreaker::new("payment", config.payment),
            quota: QuotaLimiter::new(config.quota),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub fn breaker(&self, kind: CallKind) -> &CircuitBreaker {
        match kind {
            CallKind::General => &self.general,
            CallKind::Payment => &self.payment,
        }
    }

    /// Runs `call` behind the quota, the breaker for `kind`, and the timeout.
    ///
    /// `call` is not polled when the quota or breaker rejects it. A gateway
    /// error or a timeout is recorded as a breaker failure before it is
    /// returned. Dropping the future mid-trial reopens the breaker.
    pub async fn execute<T, F>(&self, kind: CallKind, call: F) -> Result<T, GuardError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        let breaker = self.breaker(kind);
        if let Err(err) = self.quota.acquire().await {
            record_call(breaker.name(), "quota_exceeded");
            return Err(err);
        }
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(err) => {
                debug!(breaker = breaker.name(), "gateway call rejected by open breaker");
                record_call(breaker.name(), "circuit_open");
                return Err(err);
            }
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => {
                permit.record_success();
                record_call(breaker.name(), "success");
                Ok(value)
            }
            Ok(Err(err)) => {
                permit.record_failure();
                record_call(breaker.name(), "failure");
                debug!(breaker = breaker.name(), error = %err, "gateway call failed");
                Err(GuardError::Gateway(err))
            }
            Err(_) => {
                permit.record_failure();
                record_call(breaker.name(), "timeout");
                warn!(
                    breaker = breaker.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "gateway call timed out"
                );
                Err(GuardError::Timeout(self.timeout))
            }
        }
    }

    pub fn status(&self) -> GuardStatus {
        GuardStatus {
            general: self.general.state(),
            payment: self.payment.state(),
            requests_in_window: self.quota.in_window(),
        }
    }

    /// Closes both breakers and clears the quota window.
    pub fn reset(&self) {
        self.general.reset();
        self.payment.reset();
        self.quota.reset();
    }
}

fn record_call(breaker: &'static str, outcome: &'static str) {
    metrics::counter!("gateway_calls_total", "breaker" => breaker, "outcome" => outcome)
        .increment(1);
}

/// A payment gateway whose every call runs through a [`GatewayGuard`] and
/// fails with a classified [`PaymentError`].
#[derive(Clone)]
pub struct GuardedGateway {
    gateway: Arc<dyn PaymentGateway>,
    guard: Arc<GatewayGuard>,
}

impl std::fmt::Debug for GuardedGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedGateway")
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

impl GuardedGateway {
    pub fn new(gateway: Arc<dyn PaymentGateway>, guard: Arc<GatewayGuard>) -> Self {
        Self { gateway, guard }
    }

    pub fn guard(&self) -> &GatewayGuard {
        &self.guard
    }

    pub async fn create_customer(&self, customer_id: CustomerId) -> Result<String, PaymentError> {
        Ok(self
            .guard
            .execute(CallKind::General, self.gateway.create_customer(customer_id))
            .await?)
    }

    pub async fn authorize_hold(
        &self,
        customer_ref: &str,
        payment_token: &str,
        amount: Money,
    ) -> Result<Authorization, PaymentError> {
        Ok(self
            .guard
            .execute(
                CallKind::Payment,
                self.gateway.authorize_hold(customer_ref, payment_token, amount),
            )
            .await?)
    }

    pub async fn void_authorization(&self, authorization_ref: &str) -> Result<(), PaymentError> {
        Ok(self
            .guard
            .execute(
                CallKind::Payment,
                self.gateway.void_authorization(authorization_ref),
            )
            .await?)
    }

    pub async fn save_payment_method(
        &self,
        customer_ref: &str,
        payment_token: &str,
    ) -> Result<String, PaymentError> {
        Ok(self
            .guard
            .execute(
                CallKind::General,
                self.gateway.save_payment_method(customer_ref, payment_token),
            )
            .await?)
    }

    pub async fn verify_payment_method(
        &self,
        payment_method_ref: &str,
        amount: Money,
    ) -> Result<String, PaymentError> {
        Ok(self
            .guard
            .execute(
                CallKind::Payment,
                self.gateway.verify_payment_method(payment_method_ref, amount),
            )
            .await?)
    }

    pub async fn reverse_charge(&self, charge_ref: &str) -> Result<(), PaymentError> {
        Ok(self
            .guard
            .execute(CallKind::Payment, self.gateway.reverse_charge(charge_ref))
            .await?)
    }

    pub async fn detach_payment_method(&self, payment_method_ref: &str) -> Result<(), PaymentError> {
        Ok(self
            .guard
            .execute(
                CallKind::General,
                self.gateway.detach_payment_method(payment_method_ref),
            )
            .await?)
    }

    pub async fn refund(&self, payment_ref: &str, amount: Money) -> Result<String, PaymentError> {
        Ok(self
            .guard
            .execute(CallKind::Payment, self.gateway.refund(payment_ref, amount))
            .await?)
    }
}

//! Simulated payment gateway.
//!
//! Card tokens drive outcomes: `tok_decline`, `tok_insufficient_funds` and
//! `tok_expired` are declined with the matching code; any other token
//! succeeds. Failures and latency can also be injected per operation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{CustomerId, Money};
use tokio::sync::RwLock;

use crate::client::{Authorization, PaymentGateway};
use crate::error::GatewayError;

/// Gateway operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    CreateCustomer,
    AuthorizeHold,
    VoidAuthorization,
    SavePaymentMethod,
    VerifyPaymentMethod,
    ReverseCharge,
    DetachPaymentMethod,
    Refund,
}

#[derive(Debug, Default)]
struct GatewayState {
    customers: HashMap<CustomerId, String>,
    authorizations: HashMap<String, Authorization>,
    payment_methods: HashSet<String>,
    charges: HashMap<String, Money>,
    refunds: Vec<(String, Money)>,
    failures: HashMap<GatewayOp, GatewayError>,
    calls: HashMap<GatewayOp, usize>,
    latency: Option<Duration>,
    op_latency: HashMap<GatewayOp, Duration>,
    next_id: u32,
}

impl GatewayState {
    fn next_ref(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:06}", self.next_id)
    }

    fn enter(&mut self, op: GatewayOp) -> Result<(), GatewayError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn decline_for(token: &str) -> Option<GatewayError> {
    let (code, message) = match token {
        "tok_decline" => ("card_declined", "Your card was declined."),
        "tok_insufficient_funds" => ("insufficient_funds", "Your card has insufficient funds."),
        "tok_expired" => ("expired_card", "Your card has expired."),
        _ => return None,
    };
    Some(GatewayError::Declined {
        code: code.to_string(),
        message: message.to_string(),
    })
}

/// In-memory payment gateway for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<RwLock<GatewayState>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `op` fail with `err` until cleared.
    pub async fn set_failure(&self, op: GatewayOp, err: GatewayError) {
        self.state.write().await.failures.insert(op, err);
    }

    pub async fn clear_failure(&self, op: GatewayOp) {
        self.state.write().await.failures.remove(&op);
    }

    /// Delays every call by `latency`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.write().await.latency = latency;
    }

    /// Delays calls to `op` by `latency`, ahead of any global latency.
    pub async fn set_op_latency(&self, op: GatewayOp, latency: Option<Duration>) {
        let mut state = self.state.write().await;
        match latency {
            Some(latency) => state.op_latency.insert(op, latency),
            None => state.op_latency.remove(&op),
        };
    }

    pub async fn calls(&self, op: GatewayOp) -> usize {
        self.state.read().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Holds that have not been voided.
    pub async fn active_authorizations(&self) -> usize {
        self.state.read().await.authorizations.len()
    }

    pub async fn attached_payment_methods(&self) -> usize {
        self.state.read().await.payment_methods.len()
    }

    /// Verification charges that have not been reversed.
    pub async fn outstanding_charges(&self) -> usize {
        self.state.read().await.charges.len()
    }

    pub async fn refunds(&self) -> Vec<(String, Money)> {
        self.state.read().await.refunds.clone()
    }

    async fn simulate_latency(&self, op: GatewayOp) {
        let latency = {
            let state = self.state.read().await;
            state.op_latency.get(&op).copied().or(state.latency)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn create_customer(&self, customer_id: CustomerId) -> Result<String, GatewayError> {
        self.simulate_latency(GatewayOp::CreateCustomer).await;
        let mut state = self.state.write().await;
        state.enter(GatewayOp::CreateCustomer)?;
        if let Some(existing) = state.customers.get(&customer_id) {
            return Ok(existing.clone());
        }
        let customer_ref = state.next_ref("cus");
        state.customers.insert(customer_id, customer_ref.clone());
        Ok(customer_ref)
    }

    async fn authorize_hold(
        &self,
        customer_ref: &str,
        payment_token: &str,
        amount: Money,
    ) -> Result<Authorization, GatewayError> {
        self.simulate_latency(GatewayOp::AuthorizeHold).await;
        let mut state = self.state.write().await;
        state.enter(GatewayOp::AuthorizeHold)?;
        if let Some(decline) = decline_for(payment_token) {
            return Err(decline);
        }
        if !amount.is_positive() {
            return Err(GatewayError::InvalidRequest(format!(
                "hold amount must be positive for {customer_ref}"
            )));
        }
        let authorization = Authorization {
            authorization_ref: state.next_ref("auth"),
            payment_method_ref: state.next_ref("pm"),
            amount,
        };
        state
            .authorizations
            .insert(authorization.authorization_ref.clone(), authorization.clone());
        Ok(authorization)
    }

    async fn void_authorization(&self, authorization_ref: &str) -> Result<(), GatewayError> {
        self.simulate_latency(GatewayOp::VoidAuthorization).await;
        let mut state = self.state.write().await;
        state.enter(GatewayOp::VoidAuthorization)?;
        state.authorizations.remove(authorization_ref);
        Ok(())
    }

    async fn save_payment_method(
        &self,
        _customer_ref: &str,
        payment_token: &str,
    ) -> Result<String, GatewayError> {
        self.simulate_latency(GatewayOp::SavePaymentMethod).await;
        let mut state = self.state.write().await;
        state.enter(GatewayOp::SavePaymentMethod)?;
        if let Some(decline) = decline_for(payment_token) {
            return Err(decline);
        }
        let payment_method_ref = state.next_ref("pm");
        state.payment_methods.insert(payment_method_ref.clone());
        Ok(payment_method_ref)
    }

    async fn verify_payment_method(
        &self,
        payment_method_ref: &str,
        amount: Money,
    ) -> Result<String, GatewayError> {
        self.simulate_latency(GatewayOp::VerifyPaymentMethod).await;
        let mut state = self.state.write().await;
        state.enter(GatewayOp::VerifyPaymentMethod)?;
        if !state.payment_methods.contains(payment_method_ref) {
            return Err(GatewayError::InvalidRequest(format!(
                "unknown payment method {payment_method_ref}"
            )));
        }
        let charge_ref = state.next_ref("ch");
        state.charges.insert(charge_ref.clone(), amount);
        Ok(charge_ref)
    }

    async fn reverse_charge(&self, charge_ref: &str) -> Result<(), GatewayError> {
        self.simulate_latency(GatewayOp::ReverseCharge).await;
        let mut state = self.state.write().await;
        state.enter(GatewayOp::ReverseCharge)?;
        state.charges.remove(charge_ref);
        Ok(())
    }

    async fn detach_payment_method(&self, payment_method_ref: &str) -> Result<(), GatewayError> {
        self.simulate_latency(GatewayOp::DetachPaymentMethod).await;
        let mut state = self.state.write().await;
        state.enter(GatewayOp::DetachPaymentMethod)?;
        state.payment_methods.remove(payment_method_ref);
        Ok(())
    }

    async fn refund(&self, payment_ref: &str, amount: Money) -> Result<String, GatewayError> {
        self.simulate_latency(GatewayOp::Refund).await;
        let mut state = self.state.write().await;
        state.enter(GatewayOp::Refund)?;
        let refund_ref = state.next_ref("re");
        state.refunds.push((payment_ref.to_string(), amount));
        Ok(refund_ref)
    }
}

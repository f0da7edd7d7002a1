use async_trait::async_trait;
use common::{CustomerId, Money};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// An authorization hold placed on a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub authorization_ref: String,
    /// The card the hold was placed on.
    pub payment_method_ref: String,
    pub amount: Money,
}

/// The one operation set the lifecycle engine needs from a payment gateway.
///
/// Every call is expected to be idempotent on the gateway side when retried
/// with the same arguments.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates (or returns) the gateway customer record.
    async fn create_customer(&self, customer_id: CustomerId) -> Result<String, GatewayError>;

    /// Places a hold for `amount` using a card token.
    async fn authorize_hold(
        &self,
        customer_ref: &str,
        payment_token: &str,
        amount: Money,
    ) -> Result<Authorization, GatewayError>;

    /// Releases a hold.
    async fn void_authorization(&self, authorization_ref: &str) -> Result<(), GatewayError>;

    /// Attaches a card token to the customer for later charges.
    async fn save_payment_method(
        &self,
        customer_ref: &str,
        payment_token: &str,
    ) -> Result<String, GatewayError>;

    /// Runs a small verification charge and returns its reference.
    async fn verify_payment_method(
        &self,
        payment_method_ref: &str,
        amount: Money,
    ) -> Result<String, GatewayError>;

    /// Reverses a charge in full.
    async fn reverse_charge(&self, charge_ref: &str) -> Result<(), GatewayError>;

    async fn detach_payment_method(&self, payment_method_ref: &str) -> Result<(), GatewayError>;

    /// Refunds `amount` against a hold or payment method. Returns the refund reference.
    async fn refund(&self, payment_ref: &str, amount: Money) -> Result<String, GatewayError>;
}

//! How the saga secures payment for a booking.

use common::Money;
use domain::{ServiceType, StrategyKind};
use serde::{Deserialize, Serialize};

/// The payment strategy a coordinator runs. Exactly one is active per
/// coordinator; the saga never mixes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentStrategy {
    /// Hold the estimate plus a safety buffer, capped per service type.
    AuthorizationHold {
        buffer: Money,
        pickup_delivery_cap: Money,
        on_site_cap: Money,
    },
    /// Save the card and prove it with a small charge that is reversed
    /// straight away.
    SaveAndValidate { verification_amount: Money },
}

impl Default for PaymentStrategy {
    fn default() -> Self {
        Self::authorization_hold(Money::from_cents(2_000))
    }
}

impl PaymentStrategy {
    /// Hold strategy with the standard caps.
    pub fn authorization_hold(buffer: Money) -> Self {
        PaymentStrategy::AuthorizationHold {
            buffer,
            pickup_delivery_cap: Money::from_cents(25_000),
            on_site_cap: Money::from_cents(50_000),
        }
    }

    pub fn save_and_validate() -> Self {
        PaymentStrategy::SaveAndValidate {
            verification_amount: Money::from_cents(100),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            PaymentStrategy::AuthorizationHold { .. } => StrategyKind::AuthorizationHold,
            PaymentStrategy::SaveAndValidate { .. } => StrategyKind::SaveAndValidate,
        }
    }

    /// Amount to hold for a booking: `min(estimate + buffer, cap)`.
    ///
    /// `None` for strategies that do not hold.
    pub fn hold_amount(&self, service_type: ServiceType, estimate: Money) -> Option<Money> {
        match *self {
            PaymentStrategy::AuthorizationHold {
                buffer,
                pickup_delivery_cap,
                on_site_cap,
            } => {
                let cap = match service_type {
                    ServiceType::PickupDelivery => pickup_delivery_cap,
                    ServiceType::OnSite => on_site_cap,
                };
                Some((estimate + buffer).min(cap))
            }
            PaymentStrategy::SaveAndValidate { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_adds_buffer_under_cap() {
        let strategy = PaymentStrategy::default();
        assert_eq!(
            strategy.hold_amount(ServiceType::PickupDelivery, Money::from_cents(6_000)),
            Some(Money::from_cents(8_000))
        );
    }

    #[test]
    fn test_hold_is_capped_per_service_type() {
        let strategy = PaymentStrategy::default();
        assert_eq!(
            strategy.hold_amount(ServiceType::PickupDelivery, Money::from_cents(30_000)),
            Some(Money::from_cents(25_000))
        );
        assert_eq!(
            strategy.hold_amount(ServiceType::OnSite, Money::from_cents(30_000)),
            Some(Money::from_cents(32_000))
        );
    }

    #[test]
    fn test_save_and_validate_never_holds() {
        let strategy = PaymentStrategy::save_and_validate();
        assert_eq!(strategy.kind(), StrategyKind::SaveAndValidate);
        assert_eq!(strategy.hold_amount(ServiceType::OnSite, Money::from_cents(100)), None);
    }

    #[test]
    fn test_strategy_config_is_tagged() {
        let json = serde_json::json!({"kind": "save_and_validate", "verification_amount": 50});
        let strategy: PaymentStrategy = serde_json::from_value(json).unwrap();
        assert_eq!(
            strategy,
            PaymentStrategy::SaveAndValidate {
                verification_amount: Money::from_cents(50)
            }
        );
    }
}

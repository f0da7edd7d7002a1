//! Cancellation/reschedule policy engine.
//!
//! Fees are always computed from the [`PolicySnapshot`] locked onto the order
//! at booking time. The live [`CancellationPolicy`] row is only consulted when
//! a new booking takes its snapshot.

use chrono::{DateTime, Duration, Utc};
use common::Money;
use serde::{Deserialize, Serialize};

use crate::order::{Order, ServiceType};

/// A fee rate in basis points (1500 = 15%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct FeeRate(u32);

impl FeeRate {
    pub fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    /// Builds a rate from a fraction such as `0.15`.
    pub fn from_fraction(fraction: f64) -> Self {
        Self((fraction * 10_000.0).round().max(0.0) as u32)
    }

    pub fn bps(&self) -> u32 {
        self.0
    }

    pub fn as_fraction(&self) -> f64 {
        self.0 as f64 / 10_000.0
    }

    /// Applies the rate to an amount, rounding to the nearest cent.
    pub fn apply(&self, amount: Money) -> Money {
        amount.scaled_by_bps(self.0)
    }
}

/// A versioned cancellation policy row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationPolicy {
    pub id: String,
    pub version: u32,
    pub service_type: ServiceType,
    /// Minimum notice for a free cancellation or a reschedule.
    pub notice_hours: u32,
    /// Share of the total kept when cancelling inside the notice window.
    pub fee_percent: FeeRate,
    pub active: bool,
}

impl CancellationPolicy {
    /// Captures the terms an order is booked under.
    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            policy_id: self.id.clone(),
            policy_version: self.version,
            notice_hours: self.notice_hours,
            fee_percent: self.fee_percent,
        }
    }
}

/// The policy terms locked onto an order. Never re-resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub policy_id: String,
    pub policy_version: u32,
    pub notice_hours: u32,
    pub fee_percent: FeeRate,
}

impl PolicySnapshot {
    pub fn notice(&self) -> Duration {
        Duration::hours(self.notice_hours as i64)
    }
}

/// Result of a fee calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub fee: Money,
    pub refund: Money,
}

/// Computes cancellation fees and reschedule eligibility.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEngine;

impl PolicyEngine {
    /// Computes the fee and refund for cancelling `order` at `now`.
    pub fn calculate_fee(order: &Order, now: DateTime<Utc>) -> FeeQuote {
        let total = order.total();

        if order.status.is_service_started() {
            return FeeQuote {
                fee: total,
                refund: Money::zero(),
            };
        }

        if order.time_until_service(now) >= order.policy.notice() {
            return FeeQuote {
                fee: Money::zero(),
                refund: total,
            };
        }

        let fee = order.policy.fee_percent.apply(total);
        FeeQuote {
            fee,
            refund: total - fee,
        }
    }

    /// Returns true if the order may move to another slot instead of being
    /// cancelled and rebooked.
    pub fn can_reschedule(order: &Order, now: DateTime<Utc>) -> bool {
        order.status.is_pre_service() && order.time_until_service(now) >= order.policy.notice()
    }
}

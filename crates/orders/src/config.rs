use chrono::{DateTime, Duration, Utc};
use domain::{FeeRate, TransitionContext};
use serde::{Deserialize, Serialize};

/// Tunables for lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Re-reads allowed after a version conflict before giving up.
    pub max_conflict_retries: u32,
    pub no_show_grace_minutes: i64,
    /// Largest quote variance from the estimate that is charged without
    /// customer approval.
    pub auto_charge_threshold: FeeRate,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            no_show_grace_minutes: 15,
            auto_charge_threshold: FeeRate::from_bps(500),
        }
    }
}

impl LifecycleConfig {
    pub fn no_show_grace(&self) -> Duration {
        Duration::minutes(self.no_show_grace_minutes)
    }

    /// Base transition context for a call made at `now`.
    pub fn context(&self, now: DateTime<Utc>) -> TransitionContext {
        TransitionContext::at(now)
            .with_no_show_grace(self.no_show_grace())
            .with_auto_charge_threshold(self.auto_charge_threshold)
    }
}

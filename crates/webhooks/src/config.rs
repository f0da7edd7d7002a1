use domain::FeeRate;
use serde::Deserialize;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared secret the gateway signs deliveries with.
    pub secret: String,
    pub auto_charge_threshold: FeeRate,
    /// Re-reads allowed after losing a version race.
    pub max_conflict_retries: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: "whsec_local_development".to_string(),
            auto_charge_threshold: FeeRate::from_bps(500),
            max_conflict_retries: 3,
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &"<redacted>")
            .field("auto_charge_threshold", &self.auto_charge_threshold)
            .field("max_conflict_retries", &self.max_conflict_retries)
            .finish()
    }
}

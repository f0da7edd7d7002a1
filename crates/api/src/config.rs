//! Application configuration loaded from environment variables.

use std::str::FromStr;

use common::Money;
use domain::{FeeRate, StrategyKind};
use gateway::{BreakerConfig, GuardConfig, QuotaConfig};
use orders::LifecycleConfig;
use saga::PaymentStrategy;
use webhooks::WebhookConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON log lines, anything else for text
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory store when unset
/// - `WEBHOOK_SECRET`: shared secret for gateway webhook signatures
/// - `GATEWAY_TIMEOUT_MS`, `GATEWAY_MAX_RPS` (must be positive)
/// - `BREAKER_FAILURE_THRESHOLD`, `BREAKER_WINDOW_SECS`, `BREAKER_COOLDOWN_SECS`
/// - `PAYMENT_STRATEGY`: `authorization_hold` (default) or `save_and_validate`
/// - `AUTH_HOLD_BUFFER_CENTS` (default: `2000`)
/// - `AUTO_CHARGE_THRESHOLD_PERCENT` (default: `5`)
/// - `NO_SHOW_GRACE_MINUTES` (default: `15`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub guard: GuardConfig,
    pub strategy: PaymentStrategy,
    pub lifecycle: LifecycleConfig,
    pub webhooks: WebhookConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();

        let breaker = BreakerConfig {
            failure_threshold: parsed(&lookup, "BREAKER_FAILURE_THRESHOLD")
                .unwrap_or(defaults.guard.payment.failure_threshold),
            window_secs: parsed(&lookup, "BREAKER_WINDOW_SECS")
                .unwrap_or(defaults.guard.payment.window_secs),
            cooldown_secs: parsed(&lookup, "BREAKER_COOLDOWN_SECS")
                .unwrap_or(defaults.guard.payment.cooldown_secs),
        };
        let guard = GuardConfig {
            general: breaker,
            payment: breaker,
            quota: QuotaConfig {
                max_requests: parsed(&lookup, "GATEWAY_MAX_RPS")
                    .filter(|max: &u32| *max > 0)
                    .unwrap_or(defaults.guard.quota.max_requests),
                ..defaults.guard.quota
            },
            timeout_ms: parsed(&lookup, "GATEWAY_TIMEOUT_MS").unwrap_or(defaults.guard.timeout_ms),
        };

        let buffer = parsed::<i64>(&lookup, "AUTH_HOLD_BUFFER_CENTS").map(Money::from_cents);
        let strategy = match parsed::<StrategyKind>(&lookup, "PAYMENT_STRATEGY") {
            Some(StrategyKind::SaveAndValidate) => PaymentStrategy::save_and_validate(),
            Some(StrategyKind::AuthorizationHold) | None => match buffer {
                Some(buffer) => PaymentStrategy::authorization_hold(buffer),
                None => defaults.strategy,
            },
        };

        let auto_charge_threshold = parsed::<f64>(&lookup, "AUTO_CHARGE_THRESHOLD_PERCENT")
            .map(|percent| FeeRate::from_fraction(percent / 100.0))
            .unwrap_or(defaults.lifecycle.auto_charge_threshold);
        let lifecycle = LifecycleConfig {
            no_show_grace_minutes: parsed(&lookup, "NO_SHOW_GRACE_MINUTES")
                .unwrap_or(defaults.lifecycle.no_show_grace_minutes),
            auto_charge_threshold,
            ..defaults.lifecycle
        };
        let webhooks = WebhookConfig {
            secret: lookup("WEBHOOK_SECRET").unwrap_or(defaults.webhooks.secret.clone()),
            auto_charge_threshold,
            max_conflict_retries: lifecycle.max_conflict_retries,
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            guard,
            strategy,
            lifecycle,
            webhooks,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            guard: GuardConfig::default(),
            strategy: PaymentStrategy::default(),
            lifecycle: LifecycleConfig::default(),
            webhooks: WebhookConfig::default(),
        }
    }
}

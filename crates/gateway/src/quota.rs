//! Sliding-window quota for outbound gateway requests.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::GuardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Requests allowed per window. Kept below the gateway's published limit.
    /// Zero is treated as one.
    pub max_requests: u32,
    pub window_ms: u64,
    /// Longest a caller waits for a slot before `QuotaExceeded`.
    pub max_wait_ms: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_requests: 80,
            window_ms: 1_000,
            max_wait_ms: 5_000,
        }
    }
}

impl QuotaConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[derive(Debug)]
pub struct QuotaLimiter {
    config: QuotaConfig,
    sent: Mutex<VecDeque<Instant>>,
}

impl QuotaLimiter {
    pub fn new(config: QuotaConfig) -> Self {
        let config = QuotaConfig {
            max_requests: config.max_requests.max(1),
            ..config
        };
        Self {
            config,
            sent: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a slot, or returns how long until the oldest one expires.
    fn take_slot(&self, now: Instant) -> Option<Duration> {
        let mut sent = self.lock();
        let window = self.config.window();
        while sent
            .front()
            .is_some_and(|first| now.duration_since(*first) >= window)
        {
            sent.pop_front();
        }
        if (sent.len() as u32) < self.config.max_requests {
            sent.push_back(now);
            return None;
        }
        let oldest = sent.front().copied().unwrap_or(now);
        Some((oldest + window).saturating_duration_since(now))
    }

    /// Waits until a request may be sent.
    ///
    /// Fails with `QuotaExceeded` instead of waiting past `max_wait`.
    pub async fn acquire(&self) -> Result<(), GuardError> {
        let started = Instant::now();
        loop {
            let now = Instant::now();
            let Some(wait) = self.take_slot(now) else {
                let waited = now.duration_since(started);
                if !waited.is_zero() {
                    metrics::histogram!("quota_wait_seconds").record(waited.as_secs_f64());
                }
                return Ok(());
            };
            if now.duration_since(started) + wait > self.config.max_wait() {
                tracing::warn!(retry_after_ms = wait.as_millis() as u64, "gateway quota exceeded");
                return Err(GuardError::QuotaExceeded { retry_after: wait });
            }
            tracing::debug!(wait_ms = wait.as_millis() as u64, "waiting for gateway quota");
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests counted in the current window.
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        let window = self.config.window();
        self.lock()
            .iter()
            .filter(|sent| now.duration_since(**sent) < window)
            .count()
    }

    pub fn reset(&self) {
        self.lock().clear();
    }
}

//! Circuit breaker with a rolling failure window.
//!
//! ```text
//! Closed ──(threshold failures in window)──► Open
//!   ▲                                         │ cooldown
//!   └──(trial succeeds)── HalfOpen ◄──────────┘
//!                            └──(trial fails)──► Open
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::GuardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures within the window that open the breaker.
    pub failure_threshold: u32,
    pub window_secs: u64,
    /// Time spent open before a trial call is let through.
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 60,
            cooldown_secs: 30,
        }
    }
}

impl BreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Admission ticket returned by [`CircuitBreaker::try_acquire`].
///
/// Settle it with [`Permit::record_success`] or [`Permit::record_failure`].
/// A trial permit dropped unsettled counts as a failed trial.
#[derive(Debug)]
#[must_use]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.on_abandoned_trial();
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl Inner {
    fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

/// A named circuit breaker. Safe to share across tasks.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner::closed()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits a call or fails fast with `CircuitOpen`.
    ///
    /// After the cooldown exactly one trial is admitted until its outcome is
    /// recorded.
    pub fn try_acquire(&self) -> Result<Permit<'_>, GuardError> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(self.permit(false)),
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .is_none_or(|opened| opened.elapsed() >= self.config.cooldown());
                if !cooled {
                    return Err(GuardError::CircuitOpen { breaker: self.name });
                }
                info!(breaker = self.name, "circuit breaker half-open, admitting trial call");
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = true;
                Ok(self.permit(true))
            }
            BreakerState::HalfOpen if inner.trial_in_flight => {
                Err(GuardError::CircuitOpen { breaker: self.name })
            }
            BreakerState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(self.permit(true))
            }
        }
    }

    fn permit(&self, trial: bool) -> Permit<'_> {
        Permit {
            breaker: self,
            trial,
            settled: false,
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        if trial && inner.state == BreakerState::HalfOpen {
            info!(breaker = self.name, "circuit breaker closed after successful trial");
            *inner = Inner::closed();
        }
    }

    fn on_abandoned_trial(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen && inner.trial_in_flight {
            warn!(breaker = self.name, "circuit breaker trial abandoned, reopening");
            self.open(&mut inner, Instant::now());
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            BreakerState::HalfOpen if trial => {
                warn!(breaker = self.name, "circuit breaker trial failed, reopening");
                self.open(&mut inner, now);
            }
            BreakerState::Closed => {
                inner.failures.push_back(now);
                let window = self.config.window();
                while inner
                    .failures
                    .front()
                    .is_some_and(|first| now.duration_since(*first) > window)
                {
                    inner.failures.pop_front();
                }
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    warn!(
                        breaker = self.name,
                        failures = inner.failures.len(),
                        window_secs = self.config.window_secs,
                        "circuit breaker opened"
                    );
                    self.open(&mut inner, now);
                }
            }
            // Late results from calls admitted before the breaker opened.
            _ => {}
        }
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(now);
        inner.trial_in_flight = false;
        inner.failures.clear();
        metrics::counter!("circuit_breaker_opened_total", "breaker" => self.name).increment(1);
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Failures currently counted in the rolling window.
    pub fn failure_count(&self) -> usize {
        self.lock().failures.len()
    }

    /// Forces the breaker closed and forgets recorded failures.
    pub fn reset(&self) {
        *self.lock() = Inner::closed();
        info!(breaker = self.name, "circuit breaker reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", BreakerConfig::default())
    }

    fn fail(b: &CircuitBreaker, n: usize) {
        for _ in 0..n {
            b.try_acquire().unwrap().record_failure();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_within_window() {
        let b = breaker();
        fail(&b, 4);
        assert_eq!(b.state(), BreakerState::Closed);
        fail(&b, 1);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(
            b.try_acquire(),
            Err(GuardError::CircuitOpen { breaker: "test" })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_do_not_count() {
        let b = breaker();
        fail(&b, 4);
        tokio::time::advance(Duration::from_secs(61)).await;
        fail(&b, 1);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_exactly_one_trial() {
        let b = breaker();
        fail(&b, 5);
        tokio::time::advance(Duration::from_secs(30)).await;

        let trial = b.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(b.try_acquire().is_err());

        trial.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(!b.try_acquire().unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let b = breaker();
        fail(&b, 5);
        tokio::time::advance(Duration::from_secs(31)).await;

        b.try_acquire().unwrap().record_failure();
        assert_eq!(b.state(), BreakerState::Open);

        // A fresh cooldown starts from the failed trial.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(b.try_acquire().is_err());
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(b.try_acquire().unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_reopens() {
        let b = breaker();
        fail(&b, 5);
        tokio::time::advance(Duration::from_secs(31)).await;

        let trial = b.try_acquire().unwrap();
        drop(trial);
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        let trial = b.try_acquire().unwrap();
        assert!(trial.is_trial());
        trial.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_regular_permit_changes_nothing() {
        let b = breaker();
        fail(&b, 2);
        drop(b.try_acquire().unwrap());
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes() {
        let b = breaker();
        fail(&b, 5);
        b.reset();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(), 0);
        assert!(b.try_acquire().is_ok());
    }
}

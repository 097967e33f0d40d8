//! Three-state circuit breaker around the remote generator.
//!
//! ```text
//!   Closed ──(threshold consecutive failures)──▶ Open
//!     ▲                                          │
//!     │ success                         cooldown │
//!     │                                          ▼
//!     └──────────────── HalfOpen ◀───────────────┘
//!                          │ failure
//!                          └──────────▶ Open
//! ```
//!
//! While half-open exactly one trial call is admitted; every other caller
//! is short-circuited until the trial reports back. Admission hands out a
//! [`CallPermit`]; a permit dropped without an outcome (the call panicked
//! or was cancelled) counts as a failure.

use crate::config::BreakerConfig;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Closed,
    Open { since: Instant },
    HalfOpen { trial_in_flight: bool },
}

#[derive(Debug)]
struct Inner {
    state: State,
    consecutive_failures: u32,
}

/// Circuit breaker shared by all generation attempts of a session.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    /// Ask to make a call now.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        self.try_acquire_at(Instant::now())
    }

    /// Ask to make a call at `now`.
    ///
    /// Returns `None` when the call must be short-circuited.
    pub fn try_acquire_at(&self, now: Instant) -> Option<CallPermit<'_>> {
        let mut inner = self.inner.lock();
        let admitted = match inner.state {
            State::Closed => true,
            State::Open { since } => {
                if now.saturating_duration_since(since) >= self.config.cooldown() {
                    info!("circuit half-open, admitting trial call");
                    inner.state = State::HalfOpen { trial_in_flight: true };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { trial_in_flight } => {
                if trial_in_flight {
                    false
                } else {
                    inner.state = State::HalfOpen { trial_in_flight: true };
                    true
                }
            }
        };
        drop(inner);
        admitted.then(|| CallPermit {
            breaker: self,
            settled: false,
        })
    }

    /// Report a successful call. Closes the circuit.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, State::Closed) {
            info!("circuit closed");
        }
        inner.state = State::Closed;
        inner.consecutive_failures = 0;
    }

    /// Report a failed call.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            State::HalfOpen { .. } => {
                warn!("trial call failed, circuit re-opened");
                inner.state = State::Open { since: now };
            }
            State::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                warn!(failures = inner.consecutive_failures, "circuit opened");
                inner.state = State::Open { since: now };
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.inner.lock().state {
            State::Closed => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }
}

/// Admission to make one call through the breaker.
///
/// Report the outcome with [`succeed`](Self::succeed) or
/// [`fail`](Self::fail).
#[must_use = "an unsettled permit records a failure when dropped"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn fail(self) {
        self.fail_at(Instant::now());
    }

    pub fn fail_at(mut self, now: Instant) {
        self.settled = true;
        self.breaker.record_failure_at(now);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("call abandoned without an outcome, counting it as a failure");
            self.breaker.record_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: 5,
            cooldown_ms: 10_000,
        })
    }

    #[test]
    fn test_opens_after_threshold() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..4 {
            b.try_acquire_at(t0).unwrap().fail_at(t0);
        }
        assert_eq!(b.state(), CircuitState::Closed);

        b.try_acquire_at(t0).unwrap().fail_at(t0);
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.try_acquire_at(t0 + Duration::from_secs(9)).is_none());
    }

    #[test]
    fn test_single_trial_after_cooldown() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..5 {
            b.record_failure_at(t0);
        }

        let later = t0 + Duration::from_secs(10);
        let trial = b.try_acquire_at(later).unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        // Only one trial at a time.
        assert!(b.try_acquire_at(later).is_none());

        trial.succeed();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
        b.try_acquire_at(later).unwrap().succeed();
    }

    #[test]
    fn test_failed_trial_reopens() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..5 {
            b.record_failure_at(t0);
        }
        let later = t0 + Duration::from_secs(11);
        b.try_acquire_at(later).unwrap().fail_at(later);
        assert_eq!(b.state(), CircuitState::Open);
        // Cooldown restarts from the failed trial.
        assert!(b.try_acquire_at(later + Duration::from_secs(5)).is_none());
        assert!(b.try_acquire_at(later + Duration::from_secs(10)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_reopens() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(11)).await;

        let trial = b.try_acquire().unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        drop(trial);
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(11)).await;
        b.try_acquire().unwrap().succeed();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..4 {
            b.record_failure_at(t0);
        }
        b.record_success();
        for _ in 0..4 {
            b.record_failure_at(t0);
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }
}

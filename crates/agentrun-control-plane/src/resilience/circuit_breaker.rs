//! Process-wide circuit breaker guarding external agent calls.
//!
//! `threshold` consecutive failures open the breaker. While open every call
//! is rejected until `cooldown` has elapsed since the most recent failure;
//! then a single trial call is admitted (half-open). The trial's success
//! closes the breaker, its failure opens it again.
//!
//! Callers that admit work through [`CircuitBreaker::try_acquire`] hold a
//! [`CallPermit`]; a permit dropped without reporting (the call was
//! cancelled, timed out or panicked) counts as a failure, so an abandoned
//! trial can never leave the breaker half-open forever.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,

    /// Calls are rejected.
    Open,

    /// One trial call is in flight.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Snapshot of the breaker for metrics and logs.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub threshold: u32,
    pub cooldown_secs: u64,
}

pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// A threshold of 0 is treated as 1.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Current state, promoting `Open` to `HalfOpen` once the cooldown is over.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.check_cooldown(&mut inner);
        inner.state
    }

    /// Whether a call may proceed. In half-open only the first caller wins.
    pub fn allow_call(&self) -> bool {
        let mut inner = self.inner.lock();
        self.check_cooldown(&mut inner);

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    debug!("Circuit breaker admitting trial call");
                    true
                }
            }
        }
    }

    /// Admit one call, returning a permit that must report its outcome.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        self.allow_call().then(|| CallPermit {
            breaker: self,
            settled: false,
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                info!("Circuit breaker closing after successful trial call");
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.trial_in_flight = false;
            }
            CircuitState::Open => {
                // A call admitted before the breaker opened finished late.
                debug!("Success recorded while circuit open");
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.threshold {
                    warn!(
                        failures = inner.failure_count,
                        threshold = self.threshold,
                        cooldown_secs = self.cooldown.as_secs(),
                        "Circuit breaker opening due to failures"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                warn!("Circuit breaker re-opening after trial call failure");
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
            }
            CircuitState::Open => {
                inner.failure_count += 1;
            }
        }
    }

    /// Whether the breaker is currently rejecting (or trialling) calls.
    pub fn is_open(&self) -> bool {
        self.state() != CircuitState::Closed
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state(),
            failure_count: self.inner.lock().failure_count,
            threshold: self.threshold,
            cooldown_secs: self.cooldown.as_secs(),
        }
    }

    fn check_cooldown(&self, inner: &mut Inner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let cooled = inner
            .last_failure
            .map_or(true, |at| at.elapsed() >= self.cooldown);
        if cooled {
            info!("Circuit breaker cooldown elapsed, entering half-open");
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
        }
    }
}

/// An admitted call. Reports a failure on drop unless settled.
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Admitted call abandoned without an outcome, counting it as a failure");
            self.breaker.record_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_secs(300))
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_consecutive_failures() {
        let cb = breaker();

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_call());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_call());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let cb = breaker();

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_until_cooldown_then_admits_one_trial() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!cb.allow_call());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.allow_call());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Only one trial at a time.
        assert!(!cb.allow_call());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_success_closes() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(300)).await;

        assert!(cb.allow_call());
        cb.record_success();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
        assert!(cb.allow_call());
        assert!(cb.allow_call());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_reopens_with_fresh_cooldown() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(300)).await;

        assert!(cb.allow_call());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(150)).await;
        assert!(!cb.allow_call());

        tokio::time::advance(Duration::from_secs(150)).await;
        assert!(cb.allow_call());
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_open_flag() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(10));
        assert!(!cb.is_open());
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_reopens_instead_of_sticking() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(10));
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(10)).await;

        let permit = cb.try_acquire().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        drop(permit);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cb.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_permit_does_not_count_twice() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(10));
        cb.try_acquire().unwrap().success();
        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.stats().failure_count, 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}

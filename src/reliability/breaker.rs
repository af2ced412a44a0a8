//! Process-local circuit breaker state machine
//!
//! Adapted from the transition logic of `distributed_circuit_breaker.rs`
//! (the teacher's store-backed, never-integrated future feature) but dropped
//! entirely in-memory: no store round-trips, `parking_lot::Mutex`-guarded
//! state plus `std::time::Instant` for the recovery timeout. Per spec.md
//! §4.2, circuit breaker state is explicitly process-local — not shared
//! across workers.

use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;

use super::{CircuitBreakerConfig, CircuitState};

/// Error from attempting a breaker-guarded call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CircuitOpenError {
    #[error("circuit breaker is open")]
    Open,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// A single named circuit breaker guarding calls to one external collaborator.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Permit returned by [`CircuitBreaker::try_call`], reporting the outcome
/// back into the state machine.
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
}

impl CircuitPermit<'_> {
    pub fn success(self) {
        self.breaker.record_success();
    }

    pub fn failure(self) {
        self.breaker.record_failure();
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open();
        self.inner.lock().state
    }

    /// Request permission to make a call. Returns a permit that must report
    /// success/failure, or `CircuitOpenError::Open` if calls are currently
    /// rejected.
    pub fn try_call(&self) -> Result<CircuitPermit<'_>, CircuitOpenError> {
        self.maybe_transition_to_half_open();

        let state = self.inner.lock().state;
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(CircuitPermit { breaker: self }),
            CircuitState::Open => Err(CircuitOpenError::Open),
        }
    }

    /// Run `op` through the breaker, recording its outcome automatically.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let permit = self.try_call().map_err(CallError::Open)?;
        match op().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) => {
                permit.failure();
                Err(CallError::Inner(err))
            }
        }
    }

    fn maybe_transition_to_half_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.failure_count = 0;
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }
}

/// Error wrapper distinguishing a rejected (open-circuit) call from one that
/// ran and failed.
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error("circuit breaker is open")]
    Open(CircuitOpenError),
    #[error(transparent)]
    Inner(E),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(3)
                .with_success_threshold(2)
                .with_recovery_timeout(Duration::from_millis(50)),
        )
    }

    #[test]
    fn starts_closed() {
        let b = breaker();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_after_failure_threshold() {
        let b = breaker();
        for _ in 0..3 {
            b.try_call().unwrap().failure();
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert!(matches!(b.try_call(), Err(CircuitOpenError::Open)));
    }

    #[test]
    fn transitions_to_half_open_after_timeout() {
        let b = breaker();
        for _ in 0..3 {
            b.try_call().unwrap().failure();
        }
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.try_call().is_ok());
    }

    #[test]
    fn closes_after_success_threshold_in_half_open() {
        let b = breaker();
        for _ in 0..3 {
            b.try_call().unwrap().failure();
        }
        std::thread::sleep(Duration::from_millis(80));
        for _ in 0..2 {
            b.try_call().unwrap().success();
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn reopens_on_failure_in_half_open() {
        let b = breaker();
        for _ in 0..3 {
            b.try_call().unwrap().failure();
        }
        std::thread::sleep(Duration::from_millis(80));
        b.try_call().unwrap().failure();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn call_wraps_future_outcome() {
        let b = breaker();
        let result: Result<i32, CallError<&str>> = b.call(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}

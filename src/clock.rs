//! Clock & ID service
//!
//! Wraps time and ID generation behind a trait so tests can inject a fake
//! clock instead of sleeping in real time (needed for retry-delay bound
//! assertions per spec scenario 3).

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Source of time and identifiers for the engine.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
    fn new_id(&self) -> Uuid;
}

/// Real clock backed by the system time and UUIDv7.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn new_id(&self) -> Uuid {
        Uuid::now_v7()
    }
}

/// Fake clock with a settable, monotonically-advanceable time, for tests.
#[cfg(any(test, feature = "test-util"))]
pub struct FakeClock {
    now: parking_lot::Mutex<DateTime<Utc>>,
    next_id: std::sync::atomic::AtomicU64,
}

#[cfg(any(test, feature = "test-util"))]
impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn new_id(&self) -> Uuid {
        let n = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Uuid::from_u128(n as u128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_produces_distinct_ids() {
        let clock = SystemClock;
        assert_ne!(clock.new_id(), clock.new_id());
    }

    #[test]
    fn fake_clock_advances() {
        let start = Utc::now();
        let clock = FakeClock::new(start);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }
}

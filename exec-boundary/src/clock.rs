//! Injected wall-clock. Every timestamp a gate observes comes from here —
//! never `Utc::now()` called directly inside gate or pause-loop code.

use chrono::{DateTime, Utc};

/// A source of wall-clock time. Implementations must be side-effect-free.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall-clock, backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for deterministic tests. `advance` lets a test move time
/// forward without sleeping.
#[derive(Debug, Clone)]
pub struct FixedClock {
    inner: std::sync::Arc<std::sync::Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            inner: std::sync::Arc::new(std::sync::Mutex::new(at)),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut guard = self.inner.lock().expect("fixed clock poisoned");
        *guard += duration;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut guard = self.inner.lock().expect("fixed clock poisoned");
        *guard = at;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().expect("fixed clock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_deterministically() {
        let clock = FixedClock::new(Utc::now());
        let t0 = clock.now();
        clock.advance(chrono::Duration::milliseconds(50));
        let t1 = clock.now();
        assert_eq!((t1 - t0).num_milliseconds(), 50);
    }
}

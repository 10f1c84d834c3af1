//! Clock capability — threaded through components instead of sprinkling
//! `Utc::now()` calls, so tests can evaluate time-sensitive decisions
//! (session expiry, approval windows, break-glass TTLs) deterministically.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Frozen clock for tests — never advances unless explicitly moved.
#[derive(Clone)]
pub struct FrozenClock(std::sync::Arc<parking_lot::RwLock<DateTime<Utc>>>);

impl FrozenClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(std::sync::Arc::new(parking_lot::RwLock::new(at)))
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.0.write();
        *guard += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.write() = at;
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.read()
    }
}

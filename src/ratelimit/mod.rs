//! Rate Limiter — pluggable per-key admission control keyed on principal
//! ARN, not source IP.
//!
//! When disabled, `NoopRateLimiter` always admits. When enabled without a
//! shared backend, `TokenBucketRateLimiter` enforces a budget in-process
//! only — it is not horizontally consistent across service instances, and
//! callers configuring it that way should know that.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub retry_after_secs: u64,
}

impl Decision {
    fn allow() -> Self {
        Self { allowed: true, retry_after_secs: 0 }
    }

    fn deny(retry_after_secs: u64) -> Self {
        Self { allowed: false, retry_after_secs }
    }
}

pub trait RateLimiter: Send + Sync {
    fn try_acquire(&self, key: &str) -> Decision;
}

/// Always admits. Used when no `RATE_LIMIT_REQUESTS` is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn try_acquire(&self, _key: &str) -> Decision {
        Decision::allow()
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// In-process token bucket, one bucket per key, each behind its own
/// fine-grained lock so one hot key never blocks another.
pub struct TokenBucketRateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    window: Duration,
    buckets: Mutex<HashMap<String, Mutex<Bucket>>>,
}

impl TokenBucketRateLimiter {
    /// `requests` tokens refill over `window`.
    pub fn new(requests: u32, window: Duration) -> Self {
        let capacity = requests.max(1) as f64;
        let refill_per_sec = capacity / window.as_secs_f64().max(1.0);
        Self {
            capacity,
            refill_per_sec,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn with_bucket<R>(&self, key: &str, f: impl FnOnce(&mut Bucket) -> R) -> R {
        // Fast path: bucket already exists, only the per-bucket lock is
        // taken. Slow path (first sighting of `key`) briefly locks the
        // outer map to insert.
        {
            let buckets = self.buckets.lock();
            if let Some(bucket) = buckets.get(key) {
                return f(&mut bucket.lock());
            }
        }
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(Bucket { tokens: self.capacity, last_refill: Instant::now() })
        });
        let result = f(&mut bucket.lock());
        result
    }
}

impl RateLimiter for TokenBucketRateLimiter {
    fn try_acquire(&self, key: &str) -> Decision {
        self.with_bucket(key, |bucket| {
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            bucket.last_refill = now;

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                Decision::allow()
            } else {
                let deficit = 1.0 - bucket.tokens;
                let wait_secs = (deficit / self.refill_per_sec).ceil().max(1.0) as u64;
                Decision::deny(wait_secs.min(self.window.as_secs().max(1)))
            }
        })
    }
}

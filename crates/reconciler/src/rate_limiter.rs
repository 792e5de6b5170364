//! Requeue rate limiters.
//!
//! A rate limiter decides how long a key waits before it is handed out again
//! after a retriable failure. Per-key limiters keep a failure counter that is
//! reset by [`RateLimiter::forget`]; overall limiters throttle all keys
//! together.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use steward_core::ControllerConfig;
use tokio::time::Instant;

/// Decides requeue delays.
pub trait RateLimiter<K>: Send + Sync {
    /// Delay before `key` may be processed again. Records one more failure.
    fn when(&self, key: &K) -> Duration;

    /// Stop tracking `key`, resetting its backoff.
    fn forget(&self, key: &K);

    /// Consecutive failures recorded for `key`.
    fn num_requeues(&self, key: &K) -> u32;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `min(base * 2^exponent, max)`, saturating at `max` instead of overflowing.
#[must_use]
pub fn exponential_backoff(base: Duration, max: Duration, exponent: u32) -> Duration {
    2u32.checked_pow(exponent)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

/// Per-key exponential backoff.
///
/// The n-th consecutive failure of a key (counting from zero) waits
/// `min(base * 2^n, max)`.
#[derive(Debug)]
pub struct ItemExponentialFailureRateLimiter<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K> ItemExponentialFailureRateLimiter<K> {
    /// Create a limiter with the given bounds.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> RateLimiter<K> for ItemExponentialFailureRateLimiter<K>
where
    K: Eq + Hash + Clone + Send,
{
    fn when(&self, key: &K) -> Duration {
        let mut failures = lock(&self.failures);
        let count = failures.entry(key.clone()).or_insert(0);
        let exponent = *count;
        *count = count.saturating_add(1);
        exponential_backoff(self.base, self.max, exponent)
    }

    fn forget(&self, key: &K) {
        lock(&self.failures).remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Overall token bucket: `qps` requeues per second with bursts of `burst`.
///
/// Every call to `when` reserves one token; the returned delay is the time
/// until that token is available.
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    /// Create a full bucket.
    pub fn new(qps: u32, burst: u32) -> Self {
        let qps = f64::from(qps.max(1));
        let burst = f64::from(burst.max(1));
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }
}

impl<K> RateLimiter<K> for BucketRateLimiter {
    fn when(&self, _key: &K) -> Duration {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = elapsed.mul_add(self.qps, bucket.tokens).min(self.burst) - 1.0;
        bucket.last = now;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.qps)
        }
    }

    fn forget(&self, _key: &K) {}

    fn num_requeues(&self, _key: &K) -> u32 {
        0
    }
}

/// Combination whose delay is the largest delay of its members.
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    /// Combine limiters.
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOfRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &K) {
        self.limiters.iter().for_each(|l| l.forget(key));
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Per-key exponential backoff combined with an overall token bucket, both
/// taken from the controller configuration.
pub fn default_controller_rate_limiter<K>(config: &ControllerConfig) -> MaxOfRateLimiter<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(
            config.base_delay(),
            config.max_delay(),
        )),
        Box::new(BucketRateLimiter::new(config.bucket_qps, config.bucket_burst)),
    ])
}

//! Rate limiters deciding how long a failed key waits before redelivery
//!
//! The controller default combines a per-key exponential backoff with an
//! overall token bucket and takes the larger of the two delays.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Base delay of the per-key exponential backoff
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
/// Ceiling of the per-key exponential backoff
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);
/// Sustained rate of the overall token bucket
pub const DEFAULT_QPS: f64 = 10.0;
/// Burst size of the overall token bucket
pub const DEFAULT_BURST: u32 = 100;

/// Decides the delay before a key may be redelivered
pub trait RateLimiter: Send + Sync {
    /// Delay for the next retry of `key`. Each call counts as one failure.
    fn when(&self, key: &str) -> Duration;

    /// Clear the failure history of `key`
    fn forget(&self, key: &str);

    /// Number of consecutive failures recorded for `key`
    fn num_requeues(&self, key: &str) -> u32;
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max_delay`
pub struct ExponentialFailureRateLimiter {
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ExponentialFailureRateLimiter {
    /// Create a limiter with the given base and ceiling
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for ExponentialFailureRateLimiter {
    fn when(&self, key: &str) -> Duration {
        let exp = {
            let mut failures = self.failures.lock();
            let count = failures.entry(key.to_string()).or_insert(0);
            let exp = *count;
            *count = count.saturating_add(1);
            exp
        };

        2u32.checked_pow(exp)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    fn forget(&self, key: &str) {
        self.failures.lock().remove(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

/// Overall token bucket shared by every key
///
/// Each call reserves one token; when the bucket is empty the returned delay
/// is the time until the reserved token is refilled.
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last: Instant,
}

impl BucketRateLimiter {
    /// Create a bucket refilling at `qps` tokens per second holding at most `burst`
    pub fn new(qps: f64, burst: u32) -> Self {
        Self {
            qps,
            burst: f64::from(burst),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for BucketRateLimiter {
    fn when(&self, _key: &str) -> Duration {
        let mut state = self.state.lock();
        let now = Instant::now();
        let refill = now.duration_since(state.last).as_secs_f64() * self.qps;
        state.tokens = (state.tokens + refill).min(self.burst);
        state.last = now;
        state.tokens -= 1.0;

        if state.tokens >= 0.0 || self.qps <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.qps)
        }
    }

    fn forget(&self, _key: &str) {}

    fn num_requeues(&self, _key: &str) -> u32 {
        0
    }
}

/// Takes the longest delay of its limiters
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    /// Combine `limiters`
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self, key: &str) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &str) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// The limiter used by every controller queue: per-key exponential backoff
/// (5ms doubling up to 1000s) combined with a 10 qps / 100 burst bucket.
pub fn default_controller_rate_limiter() -> MaxOfRateLimiter {
    MaxOfRateLimiter::new(vec![
        Box::new(ExponentialFailureRateLimiter::new(
            DEFAULT_BASE_DELAY,
            DEFAULT_MAX_DELAY,
        )),
        Box::new(BucketRateLimiter::new(DEFAULT_QPS, DEFAULT_BURST)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_failure() {
        let limiter =
            ExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1000));
        assert_eq!(limiter.when("ns/web"), Duration::from_millis(5));
        assert_eq!(limiter.when("ns/web"), Duration::from_millis(10));
        assert_eq!(limiter.when("ns/web"), Duration::from_millis(20));
        assert_eq!(limiter.num_requeues("ns/web"), 3);
    }

    #[test]
    fn backoff_is_non_decreasing_and_capped() {
        let max = Duration::from_secs(1000);
        let limiter = ExponentialFailureRateLimiter::new(Duration::from_millis(5), max);
        let mut previous = Duration::ZERO;
        for _ in 0..64 {
            let delay = limiter.when("ns/web");
            assert!(delay >= previous);
            assert!(delay <= max);
            previous = delay;
        }
        assert_eq!(previous, max);
    }

    #[test]
    fn forget_resets_to_minimum_backoff() {
        let limiter =
            ExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1000));
        for _ in 0..5 {
            limiter.when("ns/web");
        }
        limiter.forget("ns/web");
        assert_eq!(limiter.num_requeues("ns/web"), 0);
        assert_eq!(limiter.when("ns/web"), Duration::from_millis(5));
    }

    #[test]
    fn keys_back_off_independently() {
        let limiter =
            ExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1000));
        limiter.when("ns/a");
        limiter.when("ns/a");
        assert_eq!(limiter.when("ns/b"), Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_allows_burst_then_spaces_requests() {
        let bucket = BucketRateLimiter::new(10.0, 2);
        assert_eq!(bucket.when("a"), Duration::ZERO);
        assert_eq!(bucket.when("b"), Duration::ZERO);
        let delay = bucket.when("c");
        assert!(delay > Duration::from_millis(90) && delay <= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_refills_over_time() {
        let bucket = BucketRateLimiter::new(10.0, 1);
        assert_eq!(bucket.when("a"), Duration::ZERO);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(bucket.when("a"), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn default_limiter_uses_exponential_while_bucket_has_tokens() {
        let limiter = default_controller_rate_limiter();
        assert_eq!(limiter.when("ns/web"), Duration::from_millis(5));
        assert_eq!(limiter.when("ns/web"), Duration::from_millis(10));
        assert_eq!(limiter.num_requeues("ns/web"), 2);
        limiter.forget("ns/web");
        assert_eq!(limiter.num_requeues("ns/web"), 0);
    }
}

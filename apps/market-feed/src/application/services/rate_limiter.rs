//! Token Bucket Rate Limiter
//!
//! Guards outbound price-source calls with a burst capacity and a periodic
//! refill. Tokens are refilled lazily on each acquisition.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::infrastructure::metrics;

/// Token bucket configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Maximum tokens held at once.
    pub capacity: u32,
    /// Tokens added per elapsed interval.
    pub refill_amount: u32,
    /// Refill period.
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 300,
            refill_amount: 1,
            refill_interval: Duration::from_secs(1),
        }
    }
}

impl RateLimiterConfig {
    /// Clamp degenerate values so the bucket can always make progress.
    #[must_use]
    pub fn sanitized(self) -> Self {
        Self {
            capacity: self.capacity.max(1),
            refill_amount: self.refill_amount.max(1),
            refill_interval: self.refill_interval.max(Duration::from_millis(1)),
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

/// Async token bucket.
///
/// Waiters are served in FIFO order: the bucket lock is held while a
/// waiter sleeps, so later callers queue behind it.
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a full bucket.
    #[must_use]
    pub fn new(name: &'static str, config: RateLimiterConfig) -> Self {
        let config = config.sanitized();
        Self {
            name,
            config,
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Limiter configuration after sanitizing.
    #[must_use]
    pub const fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Take one token, suspending until one is available. Never fails.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        self.refill(&mut state, Instant::now());

        if state.tokens == 0 {
            metrics::record_rate_limiter_wait(self.name);
            tracing::debug!(limiter = self.name, "Rate limiter exhausted, waiting for refill");
        }

        while state.tokens == 0 {
            tokio::time::sleep(self.config.refill_interval).await;
            self.refill(&mut state, Instant::now());
        }

        state.tokens -= 1;
    }

    /// Take one token if available without waiting.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state, Instant::now());
        if state.tokens == 0 {
            return false;
        }
        state.tokens -= 1;
        true
    }

    /// Tokens currently available after a lazy refill.
    ///
    /// Returns `None` while another caller holds the bucket.
    #[must_use]
    pub fn available(&self) -> Option<u32> {
        let mut state = self.state.try_lock().ok()?;
        self.refill(&mut state, Instant::now());
        Some(state.tokens)
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let interval_nanos = self.config.refill_interval.as_nanos();
        let intervals = elapsed.as_nanos() / interval_nanos;
        if intervals == 0 {
            return;
        }

        let added = intervals.saturating_mul(u128::from(self.config.refill_amount));
        let capacity = u128::from(self.config.capacity);
        let tokens = (u128::from(state.tokens) + added).min(capacity);
        state.tokens = u32::try_from(tokens).unwrap_or(self.config.capacity);

        // Advance by whole intervals only, keeping the partial remainder.
        let remainder = u64::try_from(elapsed.as_nanos() % interval_nanos).unwrap_or(0);
        state.last_refill = now
            .checked_sub(Duration::from_nanos(remainder))
            .unwrap_or(now);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn limiter(capacity: u32, amount: u32, interval_ms: u64) -> RateLimiter {
        RateLimiter::new(
            "test",
            RateLimiterConfig {
                capacity,
                refill_amount: amount,
                refill_interval: Duration::from_millis(interval_ms),
            },
        )
    }

    #[test]
    fn default_config_values() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.capacity, 300);
        assert_eq!(config.refill_amount, 1);
        assert_eq!(config.refill_interval, Duration::from_secs(1));
    }

    #[test]
    fn sanitized_clamps_zero_values() {
        let config = RateLimiterConfig {
            capacity: 0,
            refill_amount: 0,
            refill_interval: Duration::ZERO,
        }
        .sanitized();

        assert_eq!(config.capacity, 1);
        assert_eq!(config.refill_amount, 1);
        assert_eq!(config.refill_interval, Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity_without_waiting() {
        let limiter = limiter(5, 1, 1_000);
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.available(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_bucket_waits_one_interval() {
        let limiter = limiter(1, 1, 1_000);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;

        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let limiter = limiter(3, 2, 100);
        for _ in 0..3 {
            limiter.acquire().await;
        }

        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(limiter.available(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_intervals_are_not_lost() {
        let limiter = limiter(10, 1, 1_000);
        for _ in 0..10 {
            limiter.acquire().await;
        }

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(limiter.available(), Some(0));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(limiter.available(), Some(1));

        tokio::time::advance(Duration::from_millis(800)).await;
        assert_eq!(limiter.available(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn try_acquire_does_not_wait() {
        let limiter = limiter(1, 1, 1_000);

        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquisitions_respect_rate() {
        let capacity = 4;
        let limiter = Arc::new(limiter(capacity, 1, 250));
        let granted = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            let granted = Arc::clone(&granted);
            tasks.push(tokio::spawn(async move {
                limiter.acquire().await;
                let elapsed = start.elapsed();
                let count = granted.fetch_add(1, Ordering::SeqCst) + 1;
                (elapsed, count)
            }));
        }

        for task in tasks {
            let (elapsed, count) = task.await.unwrap();
            #[allow(clippy::cast_possible_truncation)]
            let refilled = (elapsed.as_millis() / 250) as u32;
            assert!(
                count <= capacity + refilled,
                "{count} grants after {elapsed:?} exceeds bound"
            );
        }
        assert_eq!(granted.load(Ordering::SeqCst), 20);
    }
}

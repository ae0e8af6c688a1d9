//! Poll Backoff Policy
//!
//! Multiplicative backoff applied to the poll interval while the price
//! source is rate limiting us.

use std::time::Duration;

use rand::Rng;

/// Configuration for poll interval backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Interval between cycles when not backing off.
    pub base_interval: Duration,
    /// Factor applied to the multiplier on each rate-limited cycle.
    pub growth: f64,
    /// Upper bound for the multiplier.
    pub max_multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

/// Longest delay the policy will ever return.
pub const MAX_DELAY: Duration = Duration::from_secs(3_600);

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(1_500),
            growth: 2.0,
            max_multiplier: 8.0,
            jitter_factor: 0.0,
        }
    }
}

/// Poll interval backoff state.
///
/// # Example
///
/// ```rust
/// use market_feed::application::services::backoff::{BackoffConfig, PollBackoff};
/// use std::time::Duration;
///
/// let mut backoff = PollBackoff::new(BackoffConfig::default());
/// assert_eq!(backoff.next_delay(), Duration::from_millis(1500));
///
/// backoff.on_rate_limited();
/// assert_eq!(backoff.next_delay(), Duration::from_millis(3000));
///
/// backoff.reset();
/// assert_eq!(backoff.next_delay(), Duration::from_millis(1500));
/// ```
#[derive(Debug, Clone)]
pub struct PollBackoff {
    config: BackoffConfig,
    multiplier: f64,
}

impl PollBackoff {
    /// Create a policy at multiplier 1.0.
    ///
    /// Non-finite factors fall back to the defaults.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        let defaults = BackoffConfig::default();
        let finite_or = |value: f64, fallback: f64| if value.is_finite() { value } else { fallback };
        let config = BackoffConfig {
            growth: finite_or(config.growth, defaults.growth).max(1.0),
            max_multiplier: finite_or(config.max_multiplier, defaults.max_multiplier).max(1.0),
            jitter_factor: finite_or(config.jitter_factor, defaults.jitter_factor).clamp(0.0, 1.0),
            ..config
        };
        Self {
            config,
            multiplier: 1.0,
        }
    }

    /// Current multiplier.
    #[must_use]
    pub const fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Grow the multiplier after a rate-limited cycle.
    pub fn on_rate_limited(&mut self) {
        self.multiplier = (self.multiplier * self.config.growth).min(self.config.max_multiplier);
    }

    /// Return to the base interval after a successful cycle.
    pub const fn reset(&mut self) {
        self.multiplier = 1.0;
    }

    /// Delay before the next cycle, `base * multiplier` with optional jitter,
    /// saturating at [`MAX_DELAY`].
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        let secs = self.config.base_interval.as_secs_f64() * self.multiplier;
        let delay = Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY);
        self.apply_jitter(delay)
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

//! Engine Configuration Settings
//!
//! Configuration types for the market feed, loaded from environment variables.
//! Unset or malformed optional values fall back to defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::{
    BackfillConfig, BackoffConfig, FlushPolicy, PollerConfig, RateLimiterConfig,
};
use crate::domain::market::Symbol;
use crate::infrastructure::broadcast::BroadcastConfig;
use crate::infrastructure::price_source::{CandleGranularity, HttpSourceConfig};
use crate::infrastructure::price_source::http::DEFAULT_BASE_URL;

/// Symbols polled before any client subscribes.
pub const DEFAULT_POLL_SYMBOLS: &str = "BTC-USD,ETH-USD";

/// Price source connection settings.
#[derive(Clone)]
pub struct SourceSettings {
    /// Base URL of the market-data API.
    pub base_url: String,
    /// Optional pre-issued bearer token.
    pub api_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Candle resolution for history backfill.
    pub granularity: CandleGranularity,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            timeout: Duration::from_secs(10),
            granularity: CandleGranularity::OneMinute,
        }
    }
}

impl std::fmt::Debug for SourceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSettings")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("granularity", &self.granularity)
            .finish()
    }
}

impl From<&SourceSettings> for HttpSourceConfig {
    fn from(settings: &SourceSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            api_token: settings.api_token.clone(),
            timeout: settings.timeout,
            granularity: settings.granularity,
        }
    }
}

/// Polling loop settings.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Symbols seeded into the registry at startup.
    pub symbols: Vec<Symbol>,
    /// Interval between cycles when not backing off.
    pub base_interval: Duration,
    /// Multiplier growth per rate-limited cycle.
    pub backoff_growth: f64,
    /// Multiplier ceiling.
    pub max_backoff_multiplier: f64,
    /// Jitter fraction applied to each sleep.
    pub jitter_factor: f64,
    /// Per-request symbol cap.
    pub max_symbols_per_request: usize,
    /// Tick buffer size that triggers a flush.
    pub flush_threshold: usize,
    /// Flush remaining ticks at the end of every cycle.
    pub flush_each_cycle: bool,
}

impl Default for PollerSettings {
    fn default() -> Self {
        let poller = PollerConfig::default();
        Self {
            symbols: Symbol::parse_all(DEFAULT_POLL_SYMBOLS.split(',')),
            base_interval: poller.backoff.base_interval,
            backoff_growth: poller.backoff.growth,
            max_backoff_multiplier: poller.backoff.max_multiplier,
            jitter_factor: poller.backoff.jitter_factor,
            max_symbols_per_request: poller.max_symbols_per_request,
            flush_threshold: poller.flush.threshold,
            flush_each_cycle: poller.flush.flush_each_cycle,
        }
    }
}

impl From<&PollerSettings> for PollerConfig {
    fn from(settings: &PollerSettings) -> Self {
        Self {
            backoff: BackoffConfig {
                base_interval: settings.base_interval,
                growth: settings.backoff_growth,
                max_multiplier: settings.max_backoff_multiplier,
                jitter_factor: settings.jitter_factor,
            },
            max_symbols_per_request: settings.max_symbols_per_request,
            flush: FlushPolicy {
                threshold: settings.flush_threshold,
                flush_each_cycle: settings.flush_each_cycle,
            },
        }
    }
}

/// Token bucket settings for live polling and history backfill.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    /// Live quote polling bucket.
    pub poll: RateLimiterConfig,
    /// History backfill bucket.
    pub history: RateLimiterConfig,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            poll: RateLimiterConfig::default(),
            history: RateLimiterConfig {
                capacity: 10,
                refill_amount: 1,
                refill_interval: Duration::from_millis(100),
            },
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// SQLite database file.
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/prices.db"),
        }
    }
}

/// WebSocket fan-out settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Per-connection outbound queue capacity.
    pub connection_capacity: usize,
    /// Maximum points replayed on subscribe.
    pub history_limit: usize,
    /// Replay and `getLatest` window.
    pub history_window: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        let config = BroadcastConfig::default();
        Self {
            connection_capacity: config.connection_capacity,
            history_limit: config.history_limit,
            history_window: Duration::from_secs(config.history_window_secs.unsigned_abs()),
        }
    }
}

impl From<&BroadcastSettings> for BroadcastConfig {
    fn from(settings: &BroadcastSettings) -> Self {
        Self {
            connection_capacity: settings.connection_capacity,
            history_limit: settings.history_limit,
            history_window_secs: i64::try_from(settings.history_window.as_secs())
                .unwrap_or(i64::MAX),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// REST and WebSocket port.
    pub http_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 3001,
            health_port: 8082,
        }
    }
}

/// Ingestion sink settings.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    /// Endpoint receiving tick batches; ticks are discarded when unset.
    pub url: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// History backfill settings.
#[derive(Debug, Clone, Copy)]
pub struct BackfillSettings {
    /// Run a backfill pass at startup.
    pub enabled: bool,
    /// Lookback for symbols with no stored history.
    pub lookback_days: u32,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            lookback_days: BackfillConfig::default().lookback_days,
        }
    }
}

impl From<&BackfillSettings> for BackfillConfig {
    fn from(settings: &BackfillSettings) -> Self {
        Self {
            lookback_days: settings.lookback_days,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Price source settings.
    pub source: SourceSettings,
    /// Polling loop settings.
    pub poller: PollerSettings,
    /// Rate limit settings.
    pub rate_limit: RateLimitSettings,
    /// Storage settings.
    pub storage: StorageSettings,
    /// WebSocket fan-out settings.
    pub broadcast: BroadcastSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Ingestion sink settings.
    pub sink: SinkSettings,
    /// Backfill settings.
    pub backfill: BackfillSettings,
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable that must not be blank is set to an
    /// empty value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyValue` if `PRICE_SOURCE_URL` or
    /// `DATABASE_PATH` is set but blank.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let source = SourceSettings {
            base_url: env
                .required_non_empty("PRICE_SOURCE_URL")?
                .map_or(defaults.source.base_url, |url| {
                    url.trim_end_matches('/').to_string()
                }),
            api_token: env.non_empty("PRICE_SOURCE_TOKEN"),
            timeout: env.secs("PRICE_SOURCE_TIMEOUT_SECS", defaults.source.timeout),
            granularity: env.parse("HISTORY_GRANULARITY", defaults.source.granularity),
        };

        let poller = PollerSettings {
            symbols: env
                .get("POLL_SYMBOLS")
                .map_or(defaults.poller.symbols, |raw| Symbol::parse_all(raw.split(','))),
            base_interval: env.millis("POLL_INTERVAL_MS", defaults.poller.base_interval),
            backoff_growth: env.factor("POLL_BACKOFF_FACTOR", defaults.poller.backoff_growth),
            max_backoff_multiplier: env
                .factor("POLL_MAX_BACKOFF", defaults.poller.max_backoff_multiplier),
            jitter_factor: env.factor("POLL_JITTER", defaults.poller.jitter_factor),
            max_symbols_per_request: env.parse(
                "POLL_MAX_SYMBOLS_PER_REQUEST",
                defaults.poller.max_symbols_per_request,
            ),
            flush_threshold: env.parse("FLUSH_THRESHOLD", defaults.poller.flush_threshold),
            flush_each_cycle: env.flag("FLUSH_EACH_CYCLE", defaults.poller.flush_each_cycle),
        };

        let rate_limit = RateLimitSettings {
            poll: env.limiter("RATE_LIMIT", defaults.rate_limit.poll),
            history: env.limiter("HISTORY_RATE_LIMIT", defaults.rate_limit.history),
        };

        let storage = StorageSettings {
            database_path: env
                .required_non_empty("DATABASE_PATH")?
                .map_or(defaults.storage.database_path, PathBuf::from),
        };

        let broadcast = BroadcastSettings {
            connection_capacity: env.parse(
                "BROADCAST_QUEUE_CAPACITY",
                defaults.broadcast.connection_capacity,
            ),
            history_limit: env.parse("BROADCAST_HISTORY_LIMIT", defaults.broadcast.history_limit),
            history_window: env.secs(
                "BROADCAST_HISTORY_WINDOW_SECS",
                defaults.broadcast.history_window,
            ),
        };

        let server = ServerSettings {
            http_port: env.parse("HTTP_PORT", defaults.server.http_port),
            health_port: env.parse("HEALTH_PORT", defaults.server.health_port),
        };

        let sink = SinkSettings {
            url: env.non_empty("INGEST_SINK_URL"),
            timeout: env.secs("INGEST_SINK_TIMEOUT_SECS", defaults.sink.timeout),
        };

        let backfill = BackfillSettings {
            enabled: env.flag("BACKFILL_ENABLED", defaults.backfill.enabled),
            lookback_days: env.parse("BACKFILL_DAYS", defaults.backfill.lookback_days),
        };

        Ok(Self {
            source,
            poller,
            rate_limit,
            storage,
            broadcast,
            server,
            sink,
            backfill,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

// =============================================================================
// Parsing
// =============================================================================

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required_non_empty(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(v) => Ok(Some(v.trim().to_string())),
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Finite, non-negative float; anything else is malformed.
    fn factor(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map_or(default, |v| match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => default,
            })
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn limiter(&self, prefix: &str, default: RateLimiterConfig) -> RateLimiterConfig {
        RateLimiterConfig {
            capacity: self.parse(&format!("{prefix}_CAPACITY"), default.capacity),
            refill_amount: self.parse(&format!("{prefix}_REFILL_AMOUNT"), default.refill_amount),
            refill_interval: self.millis(
                &format!("{prefix}_REFILL_INTERVAL_MS"),
                default.refill_interval,
            ),
        }
        .sanitized()
    }
}

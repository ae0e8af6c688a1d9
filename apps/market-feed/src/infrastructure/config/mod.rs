//! Configuration Module
//!
//! Environment-driven settings for the market feed and conversions into
//! the service configuration types they drive.

mod settings;

pub use settings::{
    BackfillSettings, BroadcastSettings, ConfigError, DEFAULT_POLL_SYMBOLS, EngineConfig,
    PollerSettings, RateLimitSettings, ServerSettings, SinkSettings, SourceSettings,
    StorageSettings,
};

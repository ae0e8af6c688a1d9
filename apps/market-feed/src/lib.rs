#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )
)]

//! Market Feed - Quote Polling and Price History
//!
//! Polls a price source for the union of every symbol anyone is watching,
//! stores second-resolution history in SQLite, and fans live prices out to
//! WebSocket clients. Charting consumers read downsampled ranges over REST.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and algorithms
//!   - `market`: Symbols, quotes, price points, tick records
//!   - `subscription`: Reference-counted symbol union across handles
//!   - `downsample`: Bucket widths and chart downsampling
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Price source, history source, repository, sink, publisher
//!   - `services`: Quote poller, rate limiter, backoff, quote cache, backfill
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `price_source`: HTTP quote and candle client
//!   - `storage`: SQLite time-series store
//!   - `sink`: HTTP tick ingestion
//!   - `broadcast`: WebSocket fan-out
//!   - `http`: REST and WebSocket server
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!  WS clients ──subscribe──► Registry ──union──► QuotePoller ◄── RateLimiter
//!                                                   │
//!                               PriceSource ◄───────┤
//!                                                   ├──► QuoteCache
//!                                                   ├──► TimeSeriesStore ──► REST
//!                                                   ├──► TickSink
//!  WS clients ◄──price── StreamBroadcaster ◄────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::downsample::{BucketWidth, ChartBucket, bucketize, downsample, suggested_bucket_width};
pub use domain::market::{PricePoint, PriceSample, Quote, Symbol, SymbolError, TickRecord};
pub use domain::subscription::{
    SubscriptionChanges, SubscriptionError, SubscriptionHandle, SubscriptionRegistry,
    SubscriptionStats,
};

// Ports
pub use application::ports::{
    HistorySource, PricePublisher, PriceRepository, PriceSource, PriceSourceError, SinkError,
    StorageError, TickSink,
};

// Services
pub use application::services::{
    BackfillService, CycleOutcome, CycleReport, PollerConfig, PollerDeps, PollerState, QuoteCache,
    QuotePoller, RateLimiter, RateLimiterConfig,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, EngineConfig};

// Adapters
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcasterStats, ClientMessage, ConnectionId, ServerMessage,
    StreamBroadcaster,
};
pub use infrastructure::http::{ApiError, ApiServer, ApiServerError, ApiState, router};
pub use infrastructure::price_source::{HttpPriceSource, HttpSourceConfig};
#[cfg(any(test, feature = "test-utils"))]
pub use infrastructure::price_source::StaticPriceSource;
pub use infrastructure::sink::HttpTickSink;
pub use infrastructure::storage::{StoreStats, TimeSeriesStore};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{MessageType as MetricsMessageType, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

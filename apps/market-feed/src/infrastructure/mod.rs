//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// HTTP price and history source adapters.
pub mod price_source;

/// HTTP tick ingestion sink.
pub mod sink;

/// SQLite time-series store.
pub mod storage;

/// WebSocket fan-out to subscribed clients.
pub mod broadcast;

/// REST and WebSocket HTTP API.
pub mod http;

/// Configuration and dependency injection.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

//! Domain Layer - Core market data types and pure logic.
//!
//! This layer contains the core domain types for quote polling and price
//! history with no I/O. Everything here is plain Rust with serialization
//! support and can be exercised without a runtime.

/// Market data types (symbols, quotes, price points, ticks).
pub mod market;

/// Subscription tracking and union-of-interest computation.
pub mod subscription;

/// Time-series bucketing and downsampling for charts.
pub mod downsample;

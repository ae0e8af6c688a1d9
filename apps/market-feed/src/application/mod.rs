//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (price source, storage, sink, fan-out).
pub mod ports;

/// Application services for polling, throttling and backfill.
pub mod services;

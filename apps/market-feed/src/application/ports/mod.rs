//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceSource`: Batch quote fetch for the polled symbol union
//! - `HistorySource`: Historical price ranges for backfill
//! - `TickSink`: Ingestion sink for buffered tick records
//! - `PriceRepository`: Durable price-point storage
//! - `PricePublisher`: Fan-out of fresh prices to live listeners

mod history_source_port;
mod price_publisher_port;
mod price_repository_port;
mod price_source_port;
mod tick_sink_port;

pub use history_source_port::HistorySource;
#[cfg(test)]
pub use history_source_port::MockHistorySource;
pub use price_publisher_port::{NoOpPublisher, PricePublisher};
#[cfg(test)]
pub use price_repository_port::MockPriceRepository;
pub use price_repository_port::{PriceRepository, StorageError};
#[cfg(test)]
pub use price_source_port::MockPriceSource;
pub use price_source_port::{PriceSource, PriceSourceError};
#[cfg(test)]
pub use tick_sink_port::MockTickSink;
pub use tick_sink_port::{NoOpTickSink, SinkError, TickSink};

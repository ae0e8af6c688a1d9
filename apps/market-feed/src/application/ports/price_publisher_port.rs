//! Price Publisher Port (Driven Port)
//!
//! Bridge from the poller to whatever pushes fresh prices to live listeners.

use crate::domain::market::Symbol;

/// Port for publishing fresh prices.
///
/// Implementations must not block; the poller calls this once per quote
/// while a cycle is in progress.
pub trait PricePublisher: Send + Sync {
    /// Publish a price observed at `timestamp` (unix seconds).
    fn publish_price(&self, symbol: &Symbol, timestamp: i64, price: f64);
}

/// Publisher that drops every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpPublisher;

impl PricePublisher for NoOpPublisher {
    fn publish_price(&self, _symbol: &Symbol, _timestamp: i64, _price: f64) {}
}

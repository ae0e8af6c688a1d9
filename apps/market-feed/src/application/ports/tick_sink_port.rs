//! Tick Sink Port (Driven Port)
//!
//! Interface for forwarding buffered tick records to an ingestion backend.

use async_trait::async_trait;

use crate::domain::market::TickRecord;

/// Ingestion sink error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Sink could not be reached.
    #[error("Tick sink connection error: {message}")]
    ConnectionError {
        /// Error details.
        message: String,
    },

    /// Sink refused the batch.
    #[error("Tick sink rejected batch: {message}")]
    Rejected {
        /// Error details.
        message: String,
    },
}

/// Port for forwarding tick batches.
///
/// Failed batches are logged by the caller and dropped, not retried.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TickSink: Send + Sync {
    /// Insert a batch of tick records.
    async fn insert_ticks(&self, ticks: &[TickRecord]) -> Result<(), SinkError>;
}

/// Sink that discards every batch, used when no ingestion backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTickSink;

#[async_trait]
impl TickSink for NoOpTickSink {
    async fn insert_ticks(&self, _ticks: &[TickRecord]) -> Result<(), SinkError> {
        Ok(())
    }
}

//! Price Repository Port (Driven Port)
//!
//! Write-side interface to the durable time-series store, as used by the
//! poller and the backfill service.

use async_trait::async_trait;

use crate::domain::market::{PricePoint, Symbol};

/// Storage error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The store could not be opened or a transaction could not start or commit.
    #[error("Storage unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// A read query failed.
    #[error("Storage query failed: {message}")]
    Query {
        /// Error details.
        message: String,
    },
}

impl StorageError {
    /// Convenience constructor for unavailable-store failures.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Port for persisting price points.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceRepository: Send + Sync {
    /// Insert or overwrite points keyed by `(symbol, timestamp)`.
    ///
    /// Returns the number of rows written.
    async fn upsert_points(&self, symbol: &Symbol, points: &[PricePoint])
    -> Result<usize, StorageError>;

    /// Newest stored timestamp for a symbol.
    async fn latest_timestamp(&self, symbol: &Symbol) -> Result<Option<i64>, StorageError>;
}

//! History Source Port (Driven Port)
//!
//! Interface for fetching historical price ranges used to backfill the store.

use async_trait::async_trait;

use super::PriceSourceError;
use crate::domain::market::{PricePoint, Symbol};

/// Port for fetching historical prices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch points for `symbol` in `[start, end]` (unix seconds).
    ///
    /// Adapters may cap how wide a single window can be; see
    /// [`max_window_seconds`](Self::max_window_seconds).
    async fn fetch_history(
        &self,
        symbol: &Symbol,
        start: i64,
        end: i64,
    ) -> Result<Vec<PricePoint>, PriceSourceError>;

    /// Widest `[start, end]` span a single request may cover.
    fn max_window_seconds(&self) -> i64 {
        i64::MAX
    }
}

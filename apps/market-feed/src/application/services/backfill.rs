//! Historical Backfill
//!
//! Fills gaps in stored history from a [`HistorySource`]. Each symbol
//! resumes from its newest stored timestamp, so repeated runs only fetch
//! what is missing.

use std::sync::Arc;

use super::rate_limiter::RateLimiter;
use crate::application::ports::{HistorySource, PriceRepository, PriceSourceError, StorageError};
use crate::domain::market::{PricePoint, Symbol};
use crate::infrastructure::metrics;

const SECONDS_PER_DAY: i64 = 86_400;

/// Backfill configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillConfig {
    /// How far back to start for symbols with no stored history.
    pub lookback_days: u32,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self { lookback_days: 7 }
    }
}

/// Backfill failure for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackfillError {
    /// The history source failed.
    #[error("history fetch failed: {0}")]
    Source(#[from] PriceSourceError),

    /// The store failed.
    #[error("history write failed: {0}")]
    Storage(#[from] StorageError),
}

/// Result for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolBackfill {
    /// Symbol backfilled.
    pub symbol: Symbol,
    /// First second requested, or `None` if already up to date.
    pub from: Option<i64>,
    /// Request windows issued.
    pub windows: usize,
    /// Rows written.
    pub stored: usize,
}

/// Result of a multi-symbol run.
#[derive(Debug, Default)]
pub struct BackfillReport {
    /// Symbols that completed.
    pub completed: Vec<SymbolBackfill>,
    /// Symbols that stopped on an error; earlier windows stay written.
    pub failed: Vec<(Symbol, BackfillError)>,
}

impl BackfillReport {
    /// Total rows written across all symbols.
    #[must_use]
    pub fn total_stored(&self) -> usize {
        self.completed.iter().map(|s| s.stored).sum()
    }
}

/// Resumable history backfill.
pub struct BackfillService {
    source: Arc<dyn HistorySource>,
    repository: Arc<dyn PriceRepository>,
    limiter: Arc<RateLimiter>,
    config: BackfillConfig,
}

impl BackfillService {
    /// Create a backfill service with its own limiter.
    #[must_use]
    pub fn new(
        source: Arc<dyn HistorySource>,
        repository: Arc<dyn PriceRepository>,
        limiter: Arc<RateLimiter>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            source,
            repository,
            limiter,
            config,
        }
    }

    /// Backfill every symbol up to `now`, continuing past per-symbol failures.
    pub async fn backfill_all(&self, symbols: &[Symbol], now: i64) -> BackfillReport {
        let mut report = BackfillReport::default();

        for symbol in symbols {
            match self.backfill_symbol(symbol, now).await {
                Ok(done) => report.completed.push(done),
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Backfill stopped early");
                    report.failed.push((symbol.clone(), e));
                }
            }
        }

        tracing::info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            stored = report.total_stored(),
            "Backfill run finished"
        );
        report
    }

    /// Backfill one symbol from its newest stored point (or the lookback start) to `now`.
    ///
    /// # Errors
    ///
    /// Returns the first source or storage failure. Windows written
    /// before the failure are kept, so the next run resumes after them.
    pub async fn backfill_symbol(
        &self,
        symbol: &Symbol,
        now: i64,
    ) -> Result<SymbolBackfill, BackfillError> {
        let start = match self.repository.latest_timestamp(symbol).await? {
            Some(latest) => latest + 1,
            None => now - i64::from(self.config.lookback_days) * SECONDS_PER_DAY,
        };

        let mut result = SymbolBackfill {
            symbol: symbol.clone(),
            from: None,
            windows: 0,
            stored: 0,
        };
        if start > now {
            tracing::debug!(symbol = %symbol, "History already up to date");
            return Ok(result);
        }
        result.from = Some(start);

        let window = self.source.max_window_seconds().max(1);
        let mut window_start = start;

        while window_start <= now {
            let window_end = window_start.saturating_add(window - 1).min(now);

            if !self.limiter.try_acquire().await {
                tracing::debug!(symbol = %symbol, "History rate limit reached, waiting for a token");
                self.limiter.acquire().await;
            }
            let fetched = self
                .source
                .fetch_history(symbol, window_start, window_end)
                .await?;
            result.windows += 1;

            let mut points: Vec<PricePoint> = fetched
                .into_iter()
                .filter(|p| (window_start..=window_end).contains(&p.timestamp))
                .map(|p| PricePoint::new(symbol.clone(), p.timestamp, p.price))
                .collect();
            points.sort_by_key(|p| p.timestamp);

            if !points.is_empty() {
                let stored = self.repository.upsert_points(symbol, &points).await?;
                result.stored += stored;
                metrics::record_backfill_points(stored as u64);
            }

            window_start = window_end.saturating_add(1);
        }

        tracing::info!(
            symbol = %symbol,
            from = start,
            windows = result.windows,
            stored = result.stored,
            "Backfilled history"
        );
        Ok(result)
    }
}

//! Quote Poller
//!
//! The scheduler at the heart of the feed. Each cycle it snapshots the
//! subscription union, waits for a rate-limit token, fetches quotes for
//! (at most) one request's worth of symbols, then fans the result out to
//! the quote cache, the time-series store, the tick buffer and live
//! listeners.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start()──► Running ──stop()/shutdown()──► Stopped
//! ```
//!
//! Cycles never overlap: the cycle state is held under an async mutex for
//! the whole cycle, so a manual [`QuotePoller::poll_once`] waits for the
//! loop's cycle to finish and vice versa.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::{BackoffConfig, PollBackoff};
use super::quote_cache::QuoteCache;
use super::rate_limiter::RateLimiter;
use crate::application::ports::{
    PricePublisher, PriceRepository, PriceSource, PriceSourceError, TickSink,
};
use crate::domain::market::{PricePoint, Quote, Symbol, TickRecord, now_seconds};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// When buffered ticks are forwarded to the ingestion sink.
///
/// Both conditions are checked once, at the end of a cycle, and the whole
/// buffer goes out as a single batch. A cycle that returns more quotes than
/// `threshold` therefore produces one batch larger than `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush as soon as the buffer holds this many ticks.
    pub threshold: usize,
    /// Also flush at the end of every cycle that leaves ticks buffered.
    pub flush_each_cycle: bool,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            threshold: 100,
            flush_each_cycle: true,
        }
    }
}

/// Poller configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollerConfig {
    /// Interval and backoff settings.
    pub backoff: BackoffConfig,
    /// Maximum symbols sent in a single price-source request.
    pub max_symbols_per_request: usize,
    /// Tick flush policy.
    pub flush: FlushPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_symbols_per_request: 50,
            flush: FlushPolicy::default(),
        }
    }
}

/// Collaborators the poller drives.
#[derive(Clone)]
pub struct PollerDeps {
    /// Source of the symbol union.
    pub registry: Arc<SubscriptionRegistry>,
    /// Quote source.
    pub source: Arc<dyn PriceSource>,
    /// Outbound request throttle.
    pub limiter: Arc<RateLimiter>,
    /// Last-value cache.
    pub cache: Arc<QuoteCache>,
    /// Durable price history.
    pub repository: Arc<dyn PriceRepository>,
    /// Tick ingestion sink.
    pub sink: Arc<dyn TickSink>,
    /// Live listener fan-out.
    pub publisher: Arc<dyn PricePublisher>,
}

// =============================================================================
// Reports
// =============================================================================

/// Poller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// No loop is running.
    Stopped,
    /// The polling loop is active.
    Running,
}

impl PollerState {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was subscribed, no request was made.
    Idle,
    /// Quotes were fetched.
    Success,
    /// The source throttled us; the multiplier grew.
    RateLimited,
    /// The source failed for another reason.
    Failed(&'static str),
}

impl CycleOutcome {
    /// Label for metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Success => "success",
            Self::RateLimited => "rate_limited",
            Self::Failed(_) => "failed",
        }
    }
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Cycle timestamp stamped on every stored point, unix seconds.
    pub timestamp: i64,
    /// Symbols sent to the source.
    pub requested: Vec<Symbol>,
    /// Quotes returned.
    pub received: usize,
    /// Points written to the store.
    pub stored: usize,
    /// Ticks forwarded to the sink.
    pub flushed: usize,
    /// Cycle result.
    pub outcome: CycleOutcome,
    /// Sleep before the next cycle.
    pub next_delay: Duration,
}

// =============================================================================
// Cycle State
// =============================================================================

#[derive(Debug, Default)]
struct CycleState {
    buffer: Vec<TickRecord>,
    cursor: usize,
}

impl CycleState {
    /// Pick this cycle's batch, rotating through the union when it exceeds `cap`.
    fn select_batch(&mut self, union: &[Symbol], cap: usize) -> Vec<Symbol> {
        let cap = cap.max(1);
        if union.len() <= cap {
            self.cursor = 0;
            return union.to_vec();
        }

        let start = self.cursor % union.len();
        let batch = union.iter().cycle().skip(start).take(cap).cloned().collect();
        self.cursor = (start + cap) % union.len();
        batch
    }
}

struct PollerCore {
    deps: PollerDeps,
    config: PollerConfig,
    backoff: parking_lot::Mutex<PollBackoff>,
    cycle: AsyncMutex<CycleState>,
}

impl PollerCore {
    async fn poll_once(&self) -> CycleReport {
        let started = Instant::now();
        let mut cycle = self.cycle.lock().await;

        let timestamp = now_seconds();
        let union: Vec<Symbol> = self.deps.registry.current_union().into_iter().collect();
        metrics::set_union_symbols(union.len());

        let requested = cycle.select_batch(&union, self.config.max_symbols_per_request);
        let mut report = CycleReport {
            timestamp,
            requested,
            received: 0,
            stored: 0,
            flushed: 0,
            outcome: CycleOutcome::Idle,
            next_delay: Duration::ZERO,
        };

        if !report.requested.is_empty() {
            self.deps.limiter.acquire().await;

            match self.deps.source.fetch_quotes(&report.requested).await {
                Ok(quotes) => {
                    report.received = quotes.len();
                    metrics::record_quotes_received(quotes.len() as u64);
                    report.stored = self.ingest(&mut cycle, &quotes, timestamp).await;
                    self.backoff.lock().reset();
                    report.outcome = CycleOutcome::Success;
                }
                Err(err) => report.outcome = self.on_source_error(&err),
            }
        }

        let policy = self.config.flush;
        let due = cycle.buffer.len() >= policy.threshold
            || (policy.flush_each_cycle && !cycle.buffer.is_empty());
        if due {
            report.flushed = self.flush(&mut cycle.buffer).await;
        }
        drop(cycle);

        let backoff = self.backoff.lock().clone();
        report.next_delay = backoff.next_delay();
        metrics::set_backoff_multiplier(backoff.multiplier());
        metrics::record_poll_cycle(report.outcome.as_str(), started.elapsed());

        tracing::debug!(
            requested = report.requested.len(),
            received = report.received,
            stored = report.stored,
            flushed = report.flushed,
            outcome = report.outcome.as_str(),
            next_delay_ms = u64::try_from(report.next_delay.as_millis()).unwrap_or(u64::MAX),
            "Poll cycle complete"
        );

        report
    }

    async fn ingest(&self, cycle: &mut CycleState, quotes: &[Quote], timestamp: i64) -> usize {
        self.deps.cache.update(quotes);

        let mut points: BTreeMap<Symbol, Vec<PricePoint>> = BTreeMap::new();
        for quote in quotes {
            let Some(price) = quote.price_f64() else {
                tracing::warn!(symbol = %quote.symbol, price = %quote.price, "Skipping non-finite price");
                continue;
            };

            points
                .entry(quote.symbol.clone())
                .or_default()
                .push(PricePoint::new(quote.symbol.clone(), timestamp, price));

            if let Some(tick) = TickRecord::from_quote(quote, timestamp) {
                cycle.buffer.push(tick);
            }

            self.deps.publisher.publish_price(&quote.symbol, timestamp, price);
        }

        let mut stored = 0;
        for (symbol, batch) in &points {
            match self.deps.repository.upsert_points(symbol, batch).await {
                Ok(rows) => stored += rows,
                Err(e) => {
                    metrics::record_storage_error("upsert");
                    tracing::warn!(symbol = %symbol, error = %e, "Failed to persist price points");
                }
            }
        }
        metrics::record_points_stored(stored as u64);

        stored
    }

    fn on_source_error(&self, err: &PriceSourceError) -> CycleOutcome {
        metrics::record_source_error(err.kind());

        match err {
            PriceSourceError::RateLimited { .. } => {
                let mut backoff = self.backoff.lock();
                backoff.on_rate_limited();
                tracing::warn!(
                    multiplier = backoff.multiplier(),
                    error = %err,
                    "Price source rate limited, backing off"
                );
                CycleOutcome::RateLimited
            }
            PriceSourceError::Unauthorized { .. } => {
                tracing::error!(error = %err, "Price source rejected credentials");
                CycleOutcome::Failed(err.kind())
            }
            PriceSourceError::Network { .. } | PriceSourceError::InvalidRequest { .. } => {
                tracing::warn!(kind = err.kind(), error = %err, "Quote fetch failed");
                CycleOutcome::Failed(err.kind())
            }
        }
    }

    async fn flush(&self, buffer: &mut Vec<TickRecord>) -> usize {
        let batch = std::mem::take(buffer);
        if batch.is_empty() {
            return 0;
        }

        match self.deps.sink.insert_ticks(&batch).await {
            Ok(()) => {
                metrics::record_ticks_flushed(batch.len() as u64);
                batch.len()
            }
            Err(e) => {
                metrics::record_sink_error();
                tracing::warn!(ticks = batch.len(), error = %e, "Dropping tick batch after sink failure");
                0
            }
        }
    }

    async fn final_flush(&self) {
        let mut cycle = self.cycle.lock().await;
        let flushed = self.flush(&mut cycle.buffer).await;
        if flushed > 0 {
            tracing::info!(ticks = flushed, "Flushed remaining ticks on stop");
        }
    }
}

// =============================================================================
// Quote Poller
// =============================================================================

/// Rate-adaptive polling loop.
pub struct QuotePoller {
    core: Arc<PollerCore>,
    cancel: parking_lot::Mutex<CancellationToken>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for QuotePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotePoller")
            .field("state", &self.state())
            .field("config", &self.core.config)
            .finish_non_exhaustive()
    }
}

impl QuotePoller {
    /// Create a stopped poller.
    #[must_use]
    pub fn new(deps: PollerDeps, config: PollerConfig) -> Self {
        let stopped = CancellationToken::new();
        stopped.cancel();

        Self {
            core: Arc::new(PollerCore {
                deps,
                config,
                backoff: parking_lot::Mutex::new(PollBackoff::new(config.backoff)),
                cycle: AsyncMutex::new(CycleState::default()),
            }),
            cancel: parking_lot::Mutex::new(stopped),
            task: AsyncMutex::new(None),
        }
    }

    /// Start the polling loop, stopping and awaiting any previous loop first.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;

        if let Some(previous) = task.take() {
            self.cancel.lock().cancel();
            if let Err(e) = previous.await {
                tracing::warn!(error = %e, "Previous poll loop ended abnormally");
            }
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        *task = Some(tokio::spawn(run_loop(Arc::clone(&self.core), cancel)));
    }

    /// Signal the loop to stop after the current cycle. Safe to call repeatedly.
    pub fn stop(&self) {
        self.cancel.lock().cancel();
    }

    /// Stop the loop and wait for it to exit, including its final flush.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Poll loop ended abnormally");
            }
        }
    }

    /// Run one cycle immediately.
    pub async fn poll_once(&self) -> CycleReport {
        self.core.poll_once().await
    }

    /// Current lifecycle state. A loop that exited on its own, including by
    /// panicking, reports `Stopped`.
    #[must_use]
    pub fn state(&self) -> PollerState {
        if self.cancel.lock().is_cancelled() {
            PollerState::Stopped
        } else {
            PollerState::Running
        }
    }

    /// Current backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(&self) -> f64 {
        self.core.backoff.lock().multiplier()
    }

    /// Poller configuration.
    #[must_use]
    pub fn config(&self) -> PollerConfig {
        self.core.config
    }
}

async fn run_loop(core: Arc<PollerCore>, cancel: CancellationToken) {
    let _stopped_on_exit = cancel.clone().drop_guard();

    tracing::info!(
        base_interval_ms = u64::try_from(core.config.backoff.base_interval.as_millis()).unwrap_or(u64::MAX),
        max_symbols = core.config.max_symbols_per_request,
        "Quote poller started"
    );

    while !cancel.is_cancelled() {
        let report = core.poll_once().await;

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(report.next_delay) => {}
        }
    }

    core.final_flush().await;
    tracing::info!("Quote poller stopped");
}

// =============================================================================
// Tests
// =============================================================================

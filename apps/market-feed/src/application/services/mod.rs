//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `QuotePoller`: Rate-adaptive polling loop over the subscription union
//! - `RateLimiter`: Token bucket for outbound source calls
//! - `PollBackoff`: Interval multiplier while rate limited
//! - `QuoteCache`: Last-value quote cache
//! - `BackfillService`: Resumable history backfill

pub mod backfill;
pub mod backoff;
pub mod poller;
pub mod quote_cache;
pub mod rate_limiter;

pub use backfill::{BackfillConfig, BackfillError, BackfillReport, BackfillService, SymbolBackfill};
pub use backoff::{BackoffConfig, PollBackoff};
pub use poller::{
    CycleOutcome, CycleReport, FlushPolicy, PollerConfig, PollerDeps, PollerState, QuotePoller,
};
pub use quote_cache::QuoteCache;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};

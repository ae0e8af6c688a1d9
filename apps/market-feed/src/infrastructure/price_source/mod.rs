//! Price source adapters.
//!
//! - `http`: Coinbase-style REST adapter for quotes and candles
//! - `mock`: Scripted source for tests (`test-utils` feature)

pub mod http;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use http::{CandleGranularity, HttpPriceSource, HttpSourceConfig};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::StaticPriceSource;

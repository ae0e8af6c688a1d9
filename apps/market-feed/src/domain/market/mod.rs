//! Market Data Types
//!
//! Core domain types for polled market data: symbols, quotes, persisted
//! price points, and the tick records handed to the ingestion sink.
//! These types are transport-agnostic and represent the canonical
//! internal representation of market data.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Epoch values above this are treated as milliseconds.
pub const MILLIS_THRESHOLD: f64 = 1e10;

// =============================================================================
// Symbol
// =============================================================================

/// A market identifier such as `BTC-USD`.
///
/// Always trimmed and uppercased, so two spellings of the same market
/// compare equal everywhere (registry, cache, store, broadcaster).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize and validate a raw symbol.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError::Empty` if the input is blank after trimming.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }
        Ok(Self(normalized))
    }

    /// Normalize every entry, silently skipping blanks.
    pub fn parse_all<I, S>(raw: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter()
            .filter_map(|s| Self::parse(s.as_ref()).ok())
            .collect()
    }

    /// Get the normalized symbol string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Symbol validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Symbol is empty after trimming.
    #[error("symbol cannot be empty")]
    Empty,
}

// =============================================================================
// Quote
// =============================================================================

/// An instantaneous market snapshot from the price source.
///
/// `price` is the bid/ask midpoint when both sides exist, otherwise
/// whichever side is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Market symbol.
    pub symbol: Symbol,
    /// Derived price.
    pub price: Decimal,
    /// Best bid, if quoted.
    pub bid: Option<Decimal>,
    /// Best ask, if quoted.
    pub ask: Option<Decimal>,
    /// Source timestamp.
    pub time: DateTime<Utc>,
}

impl Quote {
    /// Build a quote from its book sides.
    ///
    /// Returns `None` when neither side is present.
    #[must_use]
    pub fn from_sides(
        symbol: Symbol,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        time: DateTime<Utc>,
    ) -> Option<Self> {
        let price = match (bid, ask) {
            (Some(b), Some(a)) => (b + a) / Decimal::TWO,
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };

        Some(Self {
            symbol,
            price,
            bid,
            ask,
            time,
        })
    }

    /// Quote with a single known price and no book sides.
    #[must_use]
    pub const fn from_price(symbol: Symbol, price: Decimal, time: DateTime<Utc>) -> Self {
        Self {
            symbol,
            price,
            bid: None,
            ask: None,
            time,
        }
    }

    /// Price as a float for time-series math.
    #[must_use]
    pub fn price_f64(&self) -> Option<f64> {
        self.price.to_f64().filter(|p| p.is_finite())
    }
}

// =============================================================================
// Price Point
// =============================================================================

/// A persisted time-series sample at second resolution.
///
/// At most one point exists per `(symbol, timestamp)`; later writes win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Market symbol.
    pub symbol: Symbol,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Sample price.
    pub price: f64,
}

impl PricePoint {
    /// Create a new price point.
    #[must_use]
    pub const fn new(symbol: Symbol, timestamp: i64, price: f64) -> Self {
        Self {
            symbol,
            timestamp,
            price,
        }
    }

    /// Strip the symbol for wire payloads.
    #[must_use]
    pub const fn sample(&self) -> PriceSample {
        PriceSample {
            timestamp: self.timestamp,
            price: self.price,
        }
    }
}

/// A `{timestamp, price}` pair as exposed over REST and WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Sample price.
    pub price: f64,
}

// =============================================================================
// Tick Record
// =============================================================================

/// One polled bid/ask/mid sample for the ingestion sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    /// Market symbol.
    pub symbol: Symbol,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Best bid, if quoted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    /// Best ask, if quoted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
    /// Mid price.
    pub mid: f64,
}

impl TickRecord {
    /// Build a tick from a quote stamped with the poll cycle timestamp.
    #[must_use]
    pub fn from_quote(quote: &Quote, timestamp: i64) -> Option<Self> {
        Some(Self {
            symbol: quote.symbol.clone(),
            timestamp,
            bid: quote.bid.and_then(|b| b.to_f64()),
            ask: quote.ask.and_then(|a| a.to_f64()),
            mid: quote.price_f64()?,
        })
    }
}

// =============================================================================
// Timestamps
// =============================================================================

/// Normalize an epoch value to whole seconds.
///
/// Values above [`MILLIS_THRESHOLD`] are treated as milliseconds.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn normalize_epoch_seconds(raw: f64) -> i64 {
    if raw > MILLIS_THRESHOLD {
        (raw / 1000.0).floor() as i64
    } else {
        raw.floor() as i64
    }
}

/// Current wall-clock time in whole seconds.
#[must_use]
pub fn now_seconds() -> i64 {
    Utc::now().timestamp()
}

// =============================================================================
// Tests
// =============================================================================

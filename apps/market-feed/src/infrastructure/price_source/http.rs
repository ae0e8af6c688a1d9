//! HTTP price and history adapters.
//!
//! Implements `PriceSource` against a Coinbase-style `best_bid_ask`
//! endpoint and `HistorySource` against the public candles endpoint.
//! Request signing is out of scope; an optional pre-issued bearer token
//! is sent when configured.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;

use crate::application::ports::{HistorySource, PriceSource, PriceSourceError};
use crate::domain::market::{PricePoint, Quote, Symbol};

/// Default public market-data host.
pub const DEFAULT_BASE_URL: &str = "https://api.coinbase.com";

/// Candles returned per request at most.
const MAX_CANDLES_PER_REQUEST: i64 = 300;

// =============================================================================
// Configuration
// =============================================================================

/// Candle resolution for history requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleGranularity {
    /// 1-minute candles.
    OneMinute,
    /// 5-minute candles.
    FiveMinute,
    /// 15-minute candles.
    FifteenMinute,
    /// 1-hour candles.
    OneHour,
    /// 1-day candles.
    OneDay,
}

impl CandleGranularity {
    /// Candle width in seconds.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinute => 300,
            Self::FifteenMinute => 900,
            Self::OneHour => 3_600,
            Self::OneDay => 86_400,
        }
    }

    /// Query-string value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "ONE_MINUTE",
            Self::FiveMinute => "FIVE_MINUTE",
            Self::FifteenMinute => "FIFTEEN_MINUTE",
            Self::OneHour => "ONE_HOUR",
            Self::OneDay => "ONE_DAY",
        }
    }
}

impl FromStr for CandleGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONE_MINUTE" | "1M" | "60" => Ok(Self::OneMinute),
            "FIVE_MINUTE" | "5M" | "300" => Ok(Self::FiveMinute),
            "FIFTEEN_MINUTE" | "15M" | "900" => Ok(Self::FifteenMinute),
            "ONE_HOUR" | "1H" | "3600" => Ok(Self::OneHour),
            "ONE_DAY" | "1D" | "86400" => Ok(Self::OneDay),
            other => Err(format!("unsupported candle granularity: {other}")),
        }
    }
}

/// HTTP adapter configuration.
#[derive(Clone)]
pub struct HttpSourceConfig {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Optional bearer token.
    pub api_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// History candle resolution.
    pub granularity: CandleGranularity,
}

impl std::fmt::Debug for HttpSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSourceConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("granularity", &self.granularity)
            .finish()
    }
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            timeout: Duration::from_secs(10),
            granularity: CandleGranularity::OneMinute,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// HTTP market-data client implementing both `PriceSource` and `HistorySource`.
#[derive(Debug, Clone)]
pub struct HttpPriceSource {
    client: reqwest::Client,
    config: HttpSourceConfig,
}

impl HttpPriceSource {
    /// Create a new adapter.
    ///
    /// # Errors
    ///
    /// Returns `PriceSourceError::InvalidRequest` if the HTTP client cannot be built.
    pub fn new(mut config: HttpSourceConfig) -> Result<Self, PriceSourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PriceSourceError::InvalidRequest {
                message: format!("cannot build HTTP client: {e}"),
            })?;

        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self { client, config })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PriceSourceError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| PriceSourceError::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| PriceSourceError::network(format!("invalid response body: {e}")))
    }
}

/// Map a non-success HTTP status to a structured error.
fn map_status(status: StatusCode, body: &str) -> PriceSourceError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => PriceSourceError::RateLimited { message },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            PriceSourceError::Unauthorized { message }
        }
        s if s.is_client_error() => PriceSourceError::InvalidRequest { message },
        _ => PriceSourceError::Network { message },
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, PriceSourceError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/v3/brokerage/best_bid_ask", self.config.base_url);
        let query: Vec<(&str, &str)> = symbols
            .iter()
            .map(|s| ("product_ids", s.as_str()))
            .collect();

        let response: BestBidAskResponse = self
            .get_json(self.client.get(&url).query(&query))
            .await?;

        let now = Utc::now();
        let quotes = response
            .pricebooks
            .into_iter()
            .filter_map(|book| {
                let symbol = Symbol::parse(&book.product_id).ok()?;
                let bid = book.bids.first().map(|level| level.price);
                let ask = book.asks.first().map(|level| level.price);
                Quote::from_sides(symbol, bid, ask, book.time.unwrap_or(now))
            })
            .collect();

        Ok(quotes)
    }
}

#[async_trait]
impl HistorySource for HttpPriceSource {
    async fn fetch_history(
        &self,
        symbol: &Symbol,
        start: i64,
        end: i64,
    ) -> Result<Vec<PricePoint>, PriceSourceError> {
        let url = format!(
            "{}/api/v3/brokerage/market/products/{}/candles",
            self.config.base_url,
            symbol.as_str()
        );
        let query = [
            ("start", start.to_string()),
            ("end", end.to_string()),
            ("granularity", self.config.granularity.as_str().to_string()),
        ];

        let response: CandlesResponse = self
            .get_json(self.client.get(&url).query(&query))
            .await?;

        let mut points: Vec<PricePoint> = response
            .candles
            .into_iter()
            .filter_map(|candle| {
                let timestamp = candle.start.parse::<i64>().ok()?;
                let price = candle.close.to_f64().filter(|p| p.is_finite())?;
                Some(PricePoint::new(symbol.clone(), timestamp, price))
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);

        Ok(points)
    }

    fn max_window_seconds(&self) -> i64 {
        self.config.granularity.seconds() * MAX_CANDLES_PER_REQUEST
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct BestBidAskResponse {
    #[serde(default)]
    pricebooks: Vec<PriceBook>,
}

#[derive(Debug, Deserialize)]
struct PriceBook {
    product_id: String,
    #[serde(default)]
    bids: Vec<BookLevel>,
    #[serde(default)]
    asks: Vec<BookLevel>,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct BookLevel {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    #[serde(default)]
    candles: Vec<Candle>,
}

#[derive(Debug, Deserialize)]
struct Candle {
    start: String,
    close: Decimal,
}

// =============================================================================
// Tests
// =============================================================================

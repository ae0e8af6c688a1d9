//! REST handlers for price ingestion and history queries.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use chrono::{DateTime, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::ApiState;
use super::error::ApiError;
use crate::domain::downsample::{
    BucketWidth, DEFAULT_TARGET_POINTS, downsample, suggested_bucket_width,
};
use crate::domain::market::{PriceSample, Quote, Symbol, normalize_epoch_seconds, now_seconds};
use crate::infrastructure::storage::{AggregateBucket, Aggregation, StoreStats};

const SECONDS_PER_DAY: i64 = 86_400;
const MAX_FILTER_DAYS: u32 = 3_650;

// =============================================================================
// Request / Response Types
// =============================================================================

/// One incoming point. Timestamps above 1e10 are read as milliseconds.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IncomingPoint {
    /// Unix seconds or milliseconds.
    pub timestamp: f64,
    /// Price.
    pub price: f64,
}

/// `POST /price` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePricesRequest {
    /// Symbol, normalized on receipt.
    #[serde(default)]
    pub symbol: String,
    /// Points to store.
    #[serde(default)]
    pub data_points: Vec<IncomingPoint>,
}

/// `POST /price` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorePricesResponse {
    /// Always true on 200.
    pub success: bool,
    /// Normalized symbol.
    pub symbol: Symbol,
    /// Rows written.
    pub stored: usize,
}

/// `GET /price/{symbol}` query.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeParams {
    /// RFC 3339, `YYYY-MM-DD`, or unix time.
    pub start_date: Option<String>,
    /// RFC 3339, `YYYY-MM-DD` (end of day), or unix time.
    pub end_date: Option<String>,
    /// Maximum points.
    pub limit: Option<usize>,
}

/// `GET /price/{symbol}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryResponse {
    /// Normalized symbol.
    pub symbol: Symbol,
    /// Number of points.
    pub count: usize,
    /// Points, ascending.
    pub data: Vec<PriceSample>,
}

/// `GET /price/{symbol}/filter` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterParams {
    /// Lookback in days, default 1.
    pub days: Option<u32>,
    /// Bucket width label (`5m`, `15m`, `1h`, `4h`, `1d`).
    pub interval: Option<String>,
}

/// Filtered series: explicit buckets, or a downsampled line.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FilteredData {
    /// Store-side aggregation for an explicit interval.
    Buckets(Vec<AggregateBucket>),
    /// Downsampled points.
    Points(Vec<PriceSample>),
}

/// `GET /price/{symbol}/filter` response.
#[derive(Debug, Clone, Serialize)]
pub struct FilteredResponse {
    /// Normalized symbol.
    pub symbol: Symbol,
    /// Lookback used.
    pub days: u32,
    /// Bucket width used.
    pub interval: BucketWidth,
    /// Number of entries in `data`.
    pub count: usize,
    /// Series.
    pub data: FilteredData,
}

/// `GET /symbols` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolsResponse {
    /// Every symbol with stored history.
    pub symbols: Vec<Symbol>,
}

/// `GET /quotes` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotesResponse {
    /// Number of quotes.
    pub count: usize,
    /// Latest quote per symbol, sorted by symbol.
    pub quotes: Vec<Quote>,
}

// =============================================================================
// Handlers
// =============================================================================

pub(super) async fn store_prices(
    State(state): State<ApiState>,
    body: Result<Json<StorePricesRequest>, JsonRejection>,
) -> Result<Json<StorePricesResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let symbol = Symbol::parse(&request.symbol)
        .map_err(|_| ApiError::bad_request("symbol and dataPoints are required"))?;
    if request.data_points.is_empty() {
        return Err(ApiError::bad_request("symbol and dataPoints are required"));
    }

    let points: Vec<PriceSample> = request
        .data_points
        .iter()
        .filter(|p| p.timestamp.is_finite())
        .map(|p| PriceSample {
            timestamp: normalize_epoch_seconds(p.timestamp),
            price: p.price,
        })
        .collect();
    let newest = points
        .iter()
        .filter(|p| p.price.is_finite())
        .max_by_key(|p| p.timestamp)
        .copied();

    let target = symbol.clone();
    let stored = state
        .store
        .run(move |store| store.upsert(&target, &points))
        .await?;

    if let Some(point) = newest {
        state
            .broadcaster
            .broadcast_price_update(&symbol, point.timestamp, point.price);
    }

    tracing::debug!(symbol = %symbol, stored, "Stored pushed prices");
    Ok(Json(StorePricesResponse {
        success: true,
        symbol,
        stored,
    }))
}

pub(super) async fn price_history(
    State(state): State<ApiState>,
    Path(raw_symbol): Path<String>,
    params: Result<Query<RangeParams>, QueryRejection>,
) -> Result<Json<PriceHistoryResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let symbol = parse_symbol(&raw_symbol)?;
    let from = params
        .start_date
        .as_deref()
        .map(|raw| parse_date_bound(raw, false))
        .transpose()?;
    let to = params
        .end_date
        .as_deref()
        .map(|raw| parse_date_bound(raw, true))
        .transpose()?;
    if let (Some(from), Some(to)) = (from, to)
        && from > to
    {
        return Err(ApiError::bad_request("startDate must not be after endDate"));
    }

    let target = symbol.clone();
    let limit = params.limit;
    let data = state
        .store
        .run(move |store| store.query(&target, from, to, limit))
        .await?;

    Ok(Json(PriceHistoryResponse {
        symbol,
        count: data.len(),
        data,
    }))
}

pub(super) async fn filtered_history(
    State(state): State<ApiState>,
    Path(raw_symbol): Path<String>,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> Result<Json<FilteredResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let symbol = parse_symbol(&raw_symbol)?;
    let days = params.days.unwrap_or(1);
    if days == 0 || days > MAX_FILTER_DAYS {
        return Err(ApiError::bad_request(format!(
            "days must be between 1 and {MAX_FILTER_DAYS}"
        )));
    }

    let to = now_seconds();
    let from = to - i64::from(days) * SECONDS_PER_DAY;
    let explicit = params
        .interval
        .as_deref()
        .map(str::parse::<BucketWidth>)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let target = symbol.clone();
    let (interval, data) = match explicit {
        Some(width) => {
            let seconds = width.seconds();
            let aggregation = state
                .store
                .run(move |store| store.aggregate(&target, from, to, Some(seconds)))
                .await?;
            let buckets = match aggregation {
                Aggregation::Buckets(buckets) => buckets,
                Aggregation::Raw(_) => Vec::new(),
            };
            (width, FilteredData::Buckets(buckets))
        }
        None => {
            let width = suggested_bucket_width(to - from, DEFAULT_TARGET_POINTS);
            let raw = state
                .store
                .run(move |store| store.query(&target, Some(from), Some(to), None))
                .await?;
            (width, FilteredData::Points(downsample(&raw, width.seconds())))
        }
    };

    let count = match &data {
        FilteredData::Buckets(b) => b.len(),
        FilteredData::Points(p) => p.len(),
    };
    Ok(Json(FilteredResponse {
        symbol,
        days,
        interval,
        count,
        data,
    }))
}

pub(super) async fn list_symbols(
    State(state): State<ApiState>,
) -> Result<Json<SymbolsResponse>, ApiError> {
    let symbols = state.store.run(|store| store.distinct_symbols()).await?;
    Ok(Json(SymbolsResponse { symbols }))
}

pub(super) async fn store_stats(State(state): State<ApiState>) -> Result<Json<StoreStats>, ApiError> {
    let stats = state.store.run(|store| store.stats()).await?;
    Ok(Json(stats))
}

pub(super) async fn list_quotes(State(state): State<ApiState>) -> Json<QuotesResponse> {
    let mut quotes: Vec<Quote> = state.quotes.snapshot().into_values().collect();
    quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    Json(QuotesResponse {
        count: quotes.len(),
        quotes,
    })
}

pub(super) async fn latest_quote(
    State(state): State<ApiState>,
    Path(raw): Path<String>,
) -> Result<Json<Quote>, ApiError> {
    let symbol = parse_symbol(&raw)?;
    state
        .quotes
        .get(&symbol)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no quote for {symbol}")))
}

// =============================================================================
// Parsing
// =============================================================================

fn parse_symbol(raw: &str) -> Result<Symbol, ApiError> {
    Symbol::parse(raw).map_err(|_| ApiError::bad_request("symbol is required"))
}

/// Parse a date query value into unix seconds.
///
/// A bare `YYYY-MM-DD` resolves to the start of the day, or to its last
/// second when `end_of_day` is set.
fn parse_date_bound(raw: &str, end_of_day: bool) -> Result<i64, ApiError> {
    let raw = raw.trim();

    if let Ok(numeric) = raw.parse::<f64>()
        && numeric.is_finite()
    {
        return Ok(normalize_epoch_seconds(numeric));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp());
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if end_of_day {
            NaiveTime::from_hms_opt(23, 59, 59)
        } else {
            Some(NaiveTime::MIN)
        };
        if let Some(time) = time {
            return Ok(date.and_time(time).and_utc().timestamp());
        }
    }

    Err(ApiError::bad_request(format!("invalid date: {raw}")))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("1700000000", false, 1_700_000_000 ; "unix seconds")]
    #[test_case("1700000000000", false, 1_700_000_000 ; "unix millis")]
    #[test_case("2024-01-01T00:00:00Z", false, 1_704_067_200 ; "rfc3339")]
    #[test_case("2024-01-01T02:00:00+02:00", false, 1_704_067_200 ; "rfc3339 offset")]
    #[test_case("2024-01-01", false, 1_704_067_200 ; "date start")]
    #[test_case("2024-01-01", true, 1_704_153_599 ; "date end")]
    fn parses_date_bounds(raw: &str, end_of_day: bool, expected: i64) {
        assert_eq!(parse_date_bound(raw, end_of_day).unwrap(), expected);
    }

    #[test_case("yesterday" ; "word")]
    #[test_case("2024-13-01" ; "bad month")]
    #[test_case("" ; "empty")]
    fn rejects_bad_dates(raw: &str) {
        assert!(matches!(
            parse_date_bound(raw, false),
            Err(ApiError::BadRequest(_))
        ));
    }
}

//! Public HTTP API
//!
//! REST endpoints over the time-series store plus the WebSocket stream.
//!
//! # Endpoints
//!
//! - `POST /price` - Store pushed points (`{symbol, dataPoints}`)
//! - `GET /price/{symbol}` - Raw history (`startDate`, `endDate`, `limit`)
//! - `GET /price/{symbol}/filter` - Chart series (`days`, `interval`)
//! - `GET /symbols` - Symbols with stored history
//! - `GET /stats` - Store statistics
//! - `GET /quotes` - Latest polled quote per symbol
//! - `GET /quotes/{symbol}` - Latest polled quote for one symbol
//! - `GET /ws` - WebSocket price stream

mod error;
mod rest;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use self::error::ApiError;
pub use self::rest::{
    FilterParams, FilteredData, FilteredResponse, IncomingPoint, PriceHistoryResponse,
    QuotesResponse, RangeParams, StorePricesRequest, StorePricesResponse, SymbolsResponse,
};
use crate::application::services::QuoteCache;
use crate::infrastructure::broadcast::StreamBroadcaster;
use crate::infrastructure::storage::TimeSeriesStore;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct ApiState {
    store: TimeSeriesStore,
    broadcaster: Arc<StreamBroadcaster>,
    quotes: Arc<QuoteCache>,
}

impl ApiState {
    /// Create handler state.
    #[must_use]
    pub const fn new(
        store: TimeSeriesStore,
        broadcaster: Arc<StreamBroadcaster>,
        quotes: Arc<QuoteCache>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            quotes,
        }
    }
}

/// Build the API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/price", post(rest::store_prices))
        .route("/price/{symbol}", get(rest::price_history))
        .route("/price/{symbol}/filter", get(rest::filtered_history))
        .route("/symbols", get(rest::list_symbols))
        .route("/stats", get(rest::store_stats))
        .route("/quotes", get(rest::list_quotes))
        .route("/quotes/{symbol}", get(rest::latest_quote))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

// =============================================================================
// API Server
// =============================================================================

/// REST and WebSocket server.
pub struct ApiServer {
    port: u16,
    state: ApiState,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new API server.
    #[must_use]
    pub const fn new(port: u16, state: ApiState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ApiServerError` if binding fails or the server exits with an error.
    pub async fn run(self) -> Result<(), ApiServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ApiServerError::ServerFailed(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

/// API server errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::market::{PriceSample, Quote, Symbol, now_seconds};
    use crate::domain::subscription::SubscriptionRegistry;
    use crate::infrastructure::broadcast::{BroadcastConfig, ServerMessage};

    fn app_with_quotes(quotes: Arc<QuoteCache>) -> (Router, TimeSeriesStore, Arc<StreamBroadcaster>) {
        let store = TimeSeriesStore::open_in_memory().unwrap();
        let broadcaster = Arc::new(StreamBroadcaster::new(
            Arc::new(SubscriptionRegistry::new()),
            store.clone(),
            BroadcastConfig::default(),
        ));
        let app = router(ApiState::new(store.clone(), Arc::clone(&broadcaster), quotes));
        (app, store, broadcaster)
    }

    fn setup() -> (Router, TimeSeriesStore, Arc<StreamBroadcaster>) {
        app_with_quotes(Arc::new(QuoteCache::new()))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn sym(raw: &str) -> Symbol {
        Symbol::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn post_price_normalizes_millis_and_broadcasts() {
        let (app, store, broadcaster) = setup();
        let (conn, mut rx) = broadcaster.connect();
        broadcaster.subscribe(conn, &["BTC-USD".to_string()]).await;
        while rx.try_recv().is_ok() {}

        let (status, body) = send(
            app,
            post_json(
                "/price",
                &json!({
                    "symbol": "btc-usd",
                    "dataPoints": [
                        {"timestamp": 1_700_000_000_000_i64, "price": 1.0},
                        {"timestamp": 1_700_000_060, "price": 2.0}
                    ]
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "symbol": "BTC-USD", "stored": 2}));
        let stored = store.query(&sym("BTC-USD"), None, None, None).unwrap();
        assert_eq!(stored[0].timestamp, 1_700_000_000);
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerMessage::Price { timestamp: 1_700_000_060, .. })
        ));
    }

    #[tokio::test]
    async fn post_price_without_points_is_bad_request() {
        let (app, _store, _broadcaster) = setup();

        let (status, body) = send(
            app,
            post_json("/price", &json!({"symbol": "BTC-USD", "dataPoints": []})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let (app, _store, _broadcaster) = setup();
        let request = Request::builder()
            .method("POST")
            .uri("/price")
            .header("content-type", "application/json")
            .body(Body::from("{oops"))
            .unwrap();

        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn history_honors_range_and_limit() {
        let (app, store, _broadcaster) = setup();
        let points: Vec<PriceSample> = (0..10)
            .map(|i| PriceSample {
                timestamp: 1_700_000_000 + i,
                price: 100.0 + i as f64,
            })
            .collect();
        store.upsert(&sym("ETH-USD"), &points).unwrap();

        let (status, body) = send(
            app,
            get("/price/eth-usd?startDate=1700000002&endDate=1700000008&limit=3"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "ETH-USD");
        assert_eq!(body["count"], 3);
        assert_eq!(body["data"][0]["timestamp"], 1_700_000_002);
    }

    #[tokio::test]
    async fn history_rejects_bad_date() {
        let (app, _store, _broadcaster) = setup();

        let (status, _) = send(app, get("/price/BTC-USD?startDate=soon")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn filter_with_interval_returns_buckets() {
        let (app, store, _broadcaster) = setup();
        let now = now_seconds();
        let base = now - now.rem_euclid(3_600) - 3_600;
        store
            .upsert(
                &sym("BTC-USD"),
                &[
                    PriceSample { timestamp: base + 10, price: 10.0 },
                    PriceSample { timestamp: base + 20, price: 30.0 },
                ],
            )
            .unwrap();

        let (status, body) = send(app, get("/price/BTC-USD/filter?days=1&interval=1h")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["interval"], "1h");
        assert_eq!(body["count"], 1);
        assert_eq!(
            body["data"][0],
            json!({"bucketStart": base, "avg": 20.0, "min": 10.0, "max": 30.0, "count": 2})
        );
    }

    #[tokio::test]
    async fn filter_without_interval_downsamples() {
        let (app, store, _broadcaster) = setup();
        let now = now_seconds();
        let points: Vec<PriceSample> = (1..=600)
            .map(|i| PriceSample {
                timestamp: now - i * 10,
                price: 1.0,
            })
            .collect();
        store.upsert(&sym("BTC-USD"), &points).unwrap();

        let (status, body) = send(app, get("/price/BTC-USD/filter")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["days"], 1);
        assert_eq!(body["interval"], "15m");
        assert!(body["count"].as_u64().unwrap() <= 8);
    }

    #[tokio::test]
    async fn filter_rejects_unknown_interval_and_zero_days() {
        let (app, _store, _broadcaster) = setup();

        let (bad_interval, _) = send(app.clone(), get("/price/BTC-USD/filter?interval=7m")).await;
        let (zero_days, _) = send(app, get("/price/BTC-USD/filter?days=0")).await;

        assert_eq!(bad_interval, StatusCode::BAD_REQUEST);
        assert_eq!(zero_days, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn symbols_and_stats() {
        let (app, store, _broadcaster) = setup();
        store
            .upsert(&sym("ETH-USD"), &[PriceSample { timestamp: 5, price: 1.0 }])
            .unwrap();
        store
            .upsert(&sym("BTC-USD"), &[PriceSample { timestamp: 9, price: 1.0 }])
            .unwrap();

        let (_, symbols) = send(app.clone(), get("/symbols")).await;
        let (_, stats) = send(app, get("/stats")).await;

        assert_eq!(symbols, json!({"symbols": ["BTC-USD", "ETH-USD"]}));
        assert_eq!(
            stats,
            json!({
                "totalRecords": 2,
                "distinctSymbolCount": 2,
                "oldestTimestamp": 5,
                "newestTimestamp": 9
            })
        );
    }

    #[tokio::test]
    async fn quotes_are_served_from_the_cache() {
        let quotes = Arc::new(QuoteCache::new());
        quotes.update(&[
            Quote::from_price(sym("ETH-USD"), Decimal::from(3_200), Utc::now()),
            Quote::from_price(sym("BTC-USD"), Decimal::from(65_000), Utc::now()),
        ]);
        let (app, _store, _broadcaster) = app_with_quotes(quotes);

        let (status, all) = send(app.clone(), get("/quotes")).await;
        let (_, one) = send(app.clone(), get("/quotes/btc-usd")).await;
        let (missing, body) = send(app, get("/quotes/SOL-USD")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(all["count"], 2);
        assert_eq!(all["quotes"][0]["symbol"], "BTC-USD");
        assert_eq!(all["quotes"][1]["symbol"], "ETH-USD");
        assert_eq!(one["symbol"], "BTC-USD");
        assert_eq!(one["price"], "65000");
        assert_eq!(missing, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "no quote for SOL-USD");
    }
}

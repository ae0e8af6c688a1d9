//! REST surface against an on-disk store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use market_feed::{
    ApiState, BroadcastConfig, QuoteCache, StreamBroadcaster, SubscriptionRegistry, TimeSeriesStore, router,
};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(store: &TimeSeriesStore) -> Router {
    let broadcaster = Arc::new(StreamBroadcaster::new(
        Arc::new(SubscriptionRegistry::new()),
        store.clone(),
        BroadcastConfig::default(),
    ));
    router(ApiState::new(store.clone(), broadcaster, Arc::new(QuoteCache::new())))
}

async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn pushed_prices_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("prices.db");

    {
        let store = TimeSeriesStore::open(&path).unwrap();
        let (status, _) = call(
            app(&store),
            "POST",
            "/price",
            Some(json!({
                "symbol": "sol-usd",
                "dataPoints": [
                    {"timestamp": 1_700_000_000, "price": 150.5},
                    {"timestamp": 1_700_000_001, "price": 151.0}
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let store = TimeSeriesStore::open(&path).unwrap();
    let app = app(&store);

    let (_, symbols) = call(app.clone(), "GET", "/symbols", None).await;
    let (_, history) = call(
        app.clone(),
        "GET",
        "/price/SOL-USD?startDate=2023-11-14&endDate=2023-11-14",
        None,
    )
    .await;
    let (_, stats) = call(app, "GET", "/stats", None).await;

    assert_eq!(symbols, json!({"symbols": ["SOL-USD"]}));
    assert_eq!(history["count"], 2);
    assert_eq!(history["data"][1], json!({"timestamp": 1_700_000_001, "price": 151.0}));
    assert_eq!(stats["totalRecords"], 2);
}

#[tokio::test]
async fn reposting_a_timestamp_overwrites_it() {
    let store = TimeSeriesStore::open_in_memory().unwrap();
    let point = |price: f64| json!({"symbol": "BTC-USD", "dataPoints": [{"timestamp": 1_700_000_000, "price": price}]});

    call(app(&store), "POST", "/price", Some(point(1.0))).await;
    call(app(&store), "POST", "/price", Some(point(2.0))).await;
    let (_, history) = call(app(&store), "GET", "/price/BTC-USD", None).await;

    assert_eq!(history["count"], 1);
    assert_eq!(history["data"][0]["price"], 2.0);
}

#[tokio::test]
async fn inverted_range_is_bad_request() {
    let store = TimeSeriesStore::open_in_memory().unwrap();

    let (status, body) = call(
        app(&store),
        "GET",
        "/price/BTC-USD?startDate=2024-02-01&endDate=2024-01-01",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "startDate must not be after endDate");
}

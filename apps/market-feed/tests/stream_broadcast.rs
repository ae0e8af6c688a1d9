//! WebSocket protocol over a real socket.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use market_feed::{
    ApiState, BroadcastConfig, PriceSample, QuoteCache, ServerMessage, StreamBroadcaster,
    SubscriptionRegistry, Symbol, TimeSeriesStore, router,
};
use market_feed::domain::market::now_seconds;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    url: String,
    registry: Arc<SubscriptionRegistry>,
    store: TimeSeriesStore,
    broadcaster: Arc<StreamBroadcaster>,
}

async fn spawn_server() -> Server {
    let registry = Arc::new(SubscriptionRegistry::new());
    let store = TimeSeriesStore::open_in_memory().unwrap();
    let broadcaster = Arc::new(StreamBroadcaster::new(
        Arc::clone(&registry),
        store.clone(),
        BroadcastConfig::default(),
    ));
    let app = router(ApiState::new(
        store.clone(),
        Arc::clone(&broadcaster),
        Arc::new(QuoteCache::new()),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        url: format!("ws://{addr}/ws"),
        registry,
        store,
        broadcaster,
    }
}

async fn connect(server: &Server) -> Client {
    let (client, _) = connect_async(server.url.as_str()).await.unwrap();
    client
}

async fn next_message(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a server message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_text(client: &mut Client, text: &str) {
    client.send(Message::text(text)).await.unwrap();
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

fn sym(raw: &str) -> Symbol {
    Symbol::parse(raw).unwrap()
}

#[tokio::test]
async fn greets_replays_history_and_streams_prices() {
    let server = spawn_server().await;
    let now = now_seconds();
    server
        .store
        .upsert(
            &sym("BTC-USD"),
            &[
                PriceSample { timestamp: now - 30, price: 64_000.0 },
                PriceSample { timestamp: now - 15, price: 64_500.0 },
            ],
        )
        .unwrap();
    let mut client = connect(&server).await;

    assert!(matches!(next_message(&mut client).await, ServerMessage::Connected { .. }));

    send_text(&mut client, r#"{"type":"subscribe","symbols":["btc-usd"]}"#).await;

    match next_message(&mut client).await {
        ServerMessage::Historical { symbol, data, .. } => {
            assert_eq!(symbol, sym("BTC-USD"));
            assert_eq!(data.len(), 2);
            assert_eq!(data[1].price, 64_500.0);
        }
        other => panic!("expected history, got {other:?}"),
    }
    assert!(matches!(
        next_message(&mut client).await,
        ServerMessage::Subscribed { .. }
    ));
    assert!(server.registry.current_union().contains(&sym("BTC-USD")));

    server
        .broadcaster
        .broadcast_price_update(&sym("BTC-USD"), now, 65_000.0);

    match next_message(&mut client).await {
        ServerMessage::Price { symbol, price, .. } => {
            assert_eq!(symbol, sym("BTC-USD"));
            assert_eq!(price, 65_000.0);
        }
        other => panic!("expected price, got {other:?}"),
    }
}

#[tokio::test]
async fn bad_input_yields_error_without_closing() {
    let server = spawn_server().await;
    let mut client = connect(&server).await;
    next_message(&mut client).await;

    send_text(&mut client, "not json").await;
    assert!(matches!(next_message(&mut client).await, ServerMessage::Error { .. }));

    send_text(&mut client, r#"{"type":"subscribe","symbols":[]}"#).await;
    assert!(matches!(next_message(&mut client).await, ServerMessage::Error { .. }));

    send_text(&mut client, r#"{"type":"getLatest","symbol":"ETH-USD"}"#).await;
    assert_eq!(
        next_message(&mut client).await,
        ServerMessage::Latest {
            symbol: sym("ETH-USD"),
            data: None,
        }
    );
}

#[tokio::test]
async fn unsubscribe_stops_updates() {
    let server = spawn_server().await;
    let mut client = connect(&server).await;
    next_message(&mut client).await;

    send_text(&mut client, r#"{"type":"subscribe","symbols":["ETH-USD","SOL-USD"]}"#).await;
    next_message(&mut client).await;
    send_text(&mut client, r#"{"type":"unsubscribe","symbols":["eth-usd"]}"#).await;
    match next_message(&mut client).await {
        ServerMessage::Unsubscribed { symbols, .. } => assert_eq!(symbols, vec![sym("ETH-USD")]),
        other => panic!("expected unsubscribe ack, got {other:?}"),
    }

    assert_eq!(
        server.broadcaster.broadcast_price_update(&sym("ETH-USD"), 1, 1.0),
        0
    );
    assert_eq!(
        server.broadcaster.broadcast_price_update(&sym("SOL-USD"), 1, 1.0),
        1
    );
    assert!(matches!(
        next_message(&mut client).await,
        ServerMessage::Price { .. }
    ));
}

#[tokio::test]
async fn closing_the_socket_releases_subscriptions() {
    let server = spawn_server().await;
    let mut client = connect(&server).await;
    next_message(&mut client).await;
    send_text(&mut client, r#"{"type":"subscribe","symbols":["BTC-USD"]}"#).await;
    next_message(&mut client).await;
    assert_eq!(server.broadcaster.stats().connections, 1);

    client.close(None).await.unwrap();
    drop(client);

    let broadcaster = Arc::clone(&server.broadcaster);
    let registry = Arc::clone(&server.registry);
    wait_until(move || {
        broadcaster.stats().connections == 0 && registry.current_union().is_empty()
    })
    .await;
    assert_eq!(server.broadcaster.stats().symbols, 0);
}

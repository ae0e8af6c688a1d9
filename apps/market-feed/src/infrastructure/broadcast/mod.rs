//! WebSocket fan-out.
//!
//! Tracks which connections listen to which symbols and pushes price
//! updates to them through bounded per-connection queues.
//!
//! # Architecture
//!
//! Each connection owns:
//! - An `mpsc` queue drained by its socket writer task
//! - A handle in the shared `SubscriptionRegistry`, so its symbols count
//!   toward the poller's union
//!
//! Sends never block. A full queue drops the message for that client only;
//! a closed queue removes the connection.

pub mod messages;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

pub use self::messages::{ClientMessage, ServerMessage};
use crate::application::ports::PricePublisher;
use crate::domain::market::{Symbol, now_seconds};
use crate::domain::subscription::{SubscriptionHandle, SubscriptionRegistry};
use crate::infrastructure::metrics;
use crate::infrastructure::storage::TimeSeriesStore;

// =============================================================================
// Configuration
// =============================================================================

/// Fan-out tuning.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Per-connection outbound queue capacity.
    pub connection_capacity: usize,
    /// Maximum points replayed on subscribe.
    pub history_limit: usize,
    /// How far back replay and `getLatest` look, in seconds.
    pub history_window_secs: i64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            connection_capacity: 256,
            history_limit: 100,
            history_window_secs: 3600,
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Opaque identifier for one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Connection {
    tx: mpsc::Sender<ServerMessage>,
    symbols: HashSet<Symbol>,
    handle: SubscriptionHandle,
}

#[derive(Default)]
struct BroadcasterState {
    listeners: HashMap<Symbol, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, Connection>,
}

impl BroadcasterState {
    fn detach(&mut self, id: ConnectionId, symbol: &Symbol) {
        if let Some(ids) = self.listeners.get_mut(symbol) {
            ids.remove(&id);
            if ids.is_empty() {
                self.listeners.remove(symbol);
            }
        }
    }
}

/// Connection and listener counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterStats {
    /// Open connections.
    pub connections: usize,
    /// Symbols with at least one listener.
    pub symbols: usize,
    /// Sum of listeners across symbols.
    pub subscriptions: usize,
}

// =============================================================================
// Stream Broadcaster
// =============================================================================

/// Per-symbol fan-out to WebSocket connections.
pub struct StreamBroadcaster {
    state: RwLock<BroadcasterState>,
    registry: Arc<SubscriptionRegistry>,
    store: TimeSeriesStore,
    config: BroadcastConfig,
}

impl std::fmt::Debug for StreamBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBroadcaster")
            .field("stats", &self.stats())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StreamBroadcaster {
    /// Create a broadcaster feeding `registry` and reading history from `store`.
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        store: TimeSeriesStore,
        config: BroadcastConfig,
    ) -> Self {
        Self {
            state: RwLock::new(BroadcasterState::default()),
            registry,
            store,
            config: BroadcastConfig {
                connection_capacity: config.connection_capacity.max(1),
                ..config
            },
        }
    }

    /// Register a connection and queue its `connected` greeting.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(self.config.connection_capacity);
        let id = ConnectionId::new();
        let handle = self.registry.subscribe(std::iter::empty::<&str>());

        let connections = {
            let mut state = self.state.write();
            state.connections.insert(
                id,
                Connection {
                    tx,
                    symbols: HashSet::new(),
                    handle,
                },
            );
            state.connections.len()
        };
        metrics::set_ws_connections(connections);
        tracing::info!(connection = %id, connections, "WebSocket client connected");

        self.send_to(
            id,
            ServerMessage::Connected {
                message: "Connected to market feed".to_string(),
                timestamp: Utc::now(),
            },
        );
        (id, rx)
    }

    /// Add symbols to a connection.
    ///
    /// Symbols the connection did not already hold get their recent history
    /// replayed before the acknowledgement.
    pub async fn subscribe(&self, id: ConnectionId, raw: &[String]) {
        let symbols = dedup(Symbol::parse_all(raw));
        if symbols.is_empty() {
            self.send_to(id, ServerMessage::error("No symbols provided"));
            return;
        }

        let newly_added = {
            let mut state = self.state.write();
            let Some(conn) = state.connections.get_mut(&id) else {
                return;
            };
            let added: Vec<Symbol> = symbols
                .iter()
                .filter(|s| conn.symbols.insert((*s).clone()))
                .cloned()
                .collect();
            let handle = conn.handle;
            let held: Vec<Symbol> = conn.symbols.iter().cloned().collect();
            for symbol in &added {
                state.listeners.entry(symbol.clone()).or_default().insert(id);
            }
            drop(state);

            if let Err(e) = self.registry.update_subscription(handle, &held) {
                tracing::warn!(connection = %id, error = %e, "Registry handle missing");
            }
            added
        };

        for symbol in newly_added {
            self.replay_history(id, symbol).await;
        }

        tracing::debug!(connection = %id, symbols = symbols.len(), "Client subscribed");
        self.send_to(
            id,
            ServerMessage::Subscribed {
                symbols,
                timestamp: Utc::now(),
            },
        );
    }

    /// Remove symbols from a connection.
    pub fn unsubscribe(&self, id: ConnectionId, raw: &[String]) {
        let symbols = dedup(Symbol::parse_all(raw));
        if symbols.is_empty() {
            self.send_to(id, ServerMessage::error("No symbols provided"));
            return;
        }

        {
            let mut state = self.state.write();
            let Some(conn) = state.connections.get_mut(&id) else {
                return;
            };
            let removed: Vec<Symbol> = symbols
                .iter()
                .filter(|s| conn.symbols.remove(*s))
                .cloned()
                .collect();
            let handle = conn.handle;
            let held: Vec<Symbol> = conn.symbols.iter().cloned().collect();
            for symbol in &removed {
                state.detach(id, symbol);
            }
            drop(state);

            if let Err(e) = self.registry.update_subscription(handle, &held) {
                tracing::warn!(connection = %id, error = %e, "Registry handle missing");
            }
        }

        self.send_to(
            id,
            ServerMessage::Unsubscribed {
                symbols,
                timestamp: Utc::now(),
            },
        );
    }

    /// Reply with the newest stored point inside the history window.
    pub async fn get_latest(&self, id: ConnectionId, raw: &str) {
        let Ok(symbol) = Symbol::parse(raw) else {
            self.send_to(id, ServerMessage::error("Symbol is required"));
            return;
        };

        let since = now_seconds() - self.config.history_window_secs;
        let lookup = symbol.clone();
        match self.store.run(move |store| store.latest(&lookup, since)).await {
            Ok(data) => self.send_to(id, ServerMessage::Latest { symbol, data }),
            Err(e) => {
                tracing::warn!(connection = %id, symbol = %symbol, error = %e, "Latest lookup failed");
                self.send_to(id, ServerMessage::error("Failed to load latest price"));
            }
        }
    }

    /// Parse and dispatch one client text frame.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Subscribe { symbols }) => self.subscribe(id, &symbols).await,
            Ok(ClientMessage::Unsubscribe { symbols }) => self.unsubscribe(id, &symbols),
            Ok(ClientMessage::GetLatest { symbol }) => self.get_latest(id, &symbol).await,
            Err(e) => {
                tracing::debug!(connection = %id, error = %e, "Malformed client message");
                self.send_to(id, ServerMessage::error("Invalid message format"));
            }
        }
    }

    /// Drop a connection and release its symbols. Returns `false` if it was
    /// already gone.
    pub fn on_disconnect(&self, id: ConnectionId) -> bool {
        let (conn, connections) = {
            let mut state = self.state.write();
            let Some(conn) = state.connections.remove(&id) else {
                return false;
            };
            for symbol in &conn.symbols {
                state.detach(id, symbol);
            }
            (conn, state.connections.len())
        };

        if let Err(e) = self.registry.unsubscribe(conn.handle) {
            tracing::warn!(connection = %id, error = %e, "Registry handle missing");
        }
        metrics::set_ws_connections(connections);
        tracing::info!(connection = %id, connections, "WebSocket client disconnected");
        true
    }

    /// Push a price to every listener of `symbol`. Returns how many queues
    /// accepted it.
    pub fn broadcast_price_update(&self, symbol: &Symbol, timestamp: i64, price: f64) -> usize {
        let targets: Vec<(ConnectionId, mpsc::Sender<ServerMessage>)> = {
            let state = self.state.read();
            let Some(ids) = state.listeners.get(symbol) else {
                return 0;
            };
            ids.iter()
                .filter_map(|id| state.connections.get(id).map(|c| (*id, c.tx.clone())))
                .collect()
        };

        let message = ServerMessage::Price {
            symbol: symbol.clone(),
            timestamp,
            price,
            server_time: Utc::now(),
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    metrics::record_message_sent(message.metric_type());
                }
                Err(TrySendError::Full(_)) => {
                    metrics::record_message_dropped(message.metric_type());
                    tracing::debug!(connection = %id, symbol = %symbol, "Client queue full, dropping update");
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        for id in closed {
            self.on_disconnect(id);
        }
        delivered
    }

    /// Current connection and listener counts.
    #[must_use]
    pub fn stats(&self) -> BroadcasterStats {
        let state = self.state.read();
        BroadcasterStats {
            connections: state.connections.len(),
            symbols: state.listeners.len(),
            subscriptions: state.listeners.values().map(HashSet::len).sum(),
        }
    }

    async fn replay_history(&self, id: ConnectionId, symbol: Symbol) {
        let since = now_seconds() - self.config.history_window_secs;
        let limit = self.config.history_limit;
        let lookup = symbol.clone();
        match self.store.run(move |store| store.recent(&lookup, since, limit)).await {
            Ok(data) if data.is_empty() => {}
            Ok(data) => self.send_to(
                id,
                ServerMessage::Historical {
                    symbol,
                    data,
                    timestamp: Utc::now(),
                },
            ),
            Err(e) => {
                tracing::warn!(connection = %id, symbol = %symbol, error = %e, "History replay failed");
            }
        }
    }

    fn send_to(&self, id: ConnectionId, message: ServerMessage) {
        let Some(tx) = self.state.read().connections.get(&id).map(|c| c.tx.clone()) else {
            return;
        };

        let kind = message.metric_type();
        match tx.try_send(message) {
            Ok(()) => metrics::record_message_sent(kind),
            Err(TrySendError::Full(_)) => metrics::record_message_dropped(kind),
            Err(TrySendError::Closed(_)) => {
                self.on_disconnect(id);
            }
        }
    }
}

impl PricePublisher for StreamBroadcaster {
    fn publish_price(&self, symbol: &Symbol, timestamp: i64, price: f64) {
        self.broadcast_price_update(symbol, timestamp, price);
    }
}

fn dedup(symbols: Vec<Symbol>) -> Vec<Symbol> {
    let mut seen = HashSet::new();
    symbols.into_iter().filter(|s| seen.insert(s.clone())).collect()
}

// =============================================================================
// Tests
// =============================================================================

//! WebSocket wire protocol.
//!
//! JSON objects discriminated by a `type` field. Event timestamps are
//! RFC 3339; data timestamps are unix seconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::market::{PriceSample, Symbol};
use crate::infrastructure::metrics::MessageType;

/// Client → server requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Start receiving updates for symbols.
    Subscribe {
        /// Raw symbols, normalized on receipt.
        #[serde(default)]
        symbols: Vec<String>,
    },
    /// Stop receiving updates for symbols.
    Unsubscribe {
        /// Raw symbols, normalized on receipt.
        #[serde(default)]
        symbols: Vec<String>,
    },
    /// Ask for the most recent stored point.
    GetLatest {
        /// Raw symbol.
        symbol: String,
    },
}

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once after the socket opens.
    Connected {
        /// Greeting.
        message: String,
        /// Server time.
        timestamp: DateTime<Utc>,
    },
    /// Subscribe acknowledgement.
    Subscribed {
        /// Normalized symbols from the request.
        symbols: Vec<Symbol>,
        /// Server time.
        timestamp: DateTime<Utc>,
    },
    /// Unsubscribe acknowledgement.
    Unsubscribed {
        /// Normalized symbols from the request.
        symbols: Vec<Symbol>,
        /// Server time.
        timestamp: DateTime<Utc>,
    },
    /// Recent history replayed on first subscribe.
    Historical {
        /// Symbol.
        symbol: Symbol,
        /// Points, ascending.
        data: Vec<PriceSample>,
        /// Server time.
        timestamp: DateTime<Utc>,
    },
    /// Live price update.
    Price {
        /// Symbol.
        symbol: Symbol,
        /// Observation time, unix seconds.
        timestamp: i64,
        /// Price.
        price: f64,
        /// Server time.
        server_time: DateTime<Utc>,
    },
    /// Reply to `getLatest`.
    Latest {
        /// Symbol.
        symbol: Symbol,
        /// Newest point within the last hour, or `null`.
        data: Option<PriceSample>,
    },
    /// Request could not be handled; the connection stays open.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerMessage {
    /// Build an error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub(crate) const fn metric_type(&self) -> MessageType {
        match self {
            Self::Connected { .. } => MessageType::Connected,
            Self::Subscribed { .. } | Self::Unsubscribed { .. } => MessageType::Ack,
            Self::Historical { .. } => MessageType::Historical,
            Self::Price { .. } => MessageType::Price,
            Self::Latest { .. } => MessageType::Latest,
            Self::Error { .. } => MessageType::Error,
        }
    }
}

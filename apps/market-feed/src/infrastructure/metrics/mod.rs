//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Polling**: Cycle outcomes, durations, backoff multiplier, union size
//! - **Source**: Quotes received and price-source errors by kind
//! - **Persistence**: Points stored, ticks flushed, sink and storage failures
//! - **Throttling**: Rate limiter waits per limiter
//! - **Streaming**: WebSocket connections, messages sent and dropped
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again after a successful install returns the same handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Polling
    describe_counter!(
        "market_feed_poll_cycles_total",
        "Total poll cycles by outcome"
    );
    describe_histogram!(
        "market_feed_poll_cycle_seconds",
        "Wall time of a poll cycle including limiter wait"
    );
    describe_gauge!(
        "market_feed_backoff_multiplier",
        "Current poll interval multiplier"
    );
    describe_gauge!(
        "market_feed_union_symbols",
        "Number of distinct symbols across live subscriptions"
    );

    // Source
    describe_counter!(
        "market_feed_quotes_received_total",
        "Total quotes returned by the price source"
    );
    describe_counter!(
        "market_feed_source_errors_total",
        "Total price source errors by kind"
    );

    // Persistence
    describe_counter!(
        "market_feed_points_stored_total",
        "Total price points written to the time-series store"
    );
    describe_counter!(
        "market_feed_storage_errors_total",
        "Total storage failures by operation"
    );
    describe_counter!(
        "market_feed_ticks_flushed_total",
        "Total tick records forwarded to the ingestion sink"
    );
    describe_counter!(
        "market_feed_sink_errors_total",
        "Total failed ingestion sink batches"
    );

    // Throttling
    describe_counter!(
        "market_feed_rate_limiter_waits_total",
        "Total acquisitions that had to wait for a refill"
    );

    // Streaming
    describe_gauge!(
        "market_feed_ws_connections",
        "Number of connected WebSocket clients"
    );
    describe_counter!(
        "market_feed_messages_sent_total",
        "Total messages queued to WebSocket clients"
    );
    describe_counter!(
        "market_feed_messages_dropped_total",
        "Total messages dropped due to slow consumers"
    );

    // Backfill
    describe_counter!(
        "market_feed_backfill_points_total",
        "Total historical points written by backfill"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for outbound WebSocket message types.
#[derive(Debug, Clone, Copy)]
pub enum MessageType {
    /// Connection acknowledgement.
    Connected,
    /// Subscribe/unsubscribe acknowledgement.
    Ack,
    /// Historical replay.
    Historical,
    /// Live price update.
    Price,
    /// Latest-point reply.
    Latest,
    /// Error event.
    Error,
}

impl MessageType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Ack => "ack",
            Self::Historical => "historical",
            Self::Price => "price",
            Self::Latest => "latest",
            Self::Error => "error",
        }
    }
}

/// Record a completed poll cycle.
pub fn record_poll_cycle(outcome: &'static str, duration: Duration) {
    counter!("market_feed_poll_cycles_total", "outcome" => outcome).increment(1);
    histogram!("market_feed_poll_cycle_seconds").record(duration.as_secs_f64());
}

/// Update the backoff multiplier gauge.
pub fn set_backoff_multiplier(multiplier: f64) {
    gauge!("market_feed_backoff_multiplier").set(multiplier);
}

/// Update the union size gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_union_symbols(count: usize) {
    gauge!("market_feed_union_symbols").set(count as f64);
}

/// Record quotes returned by the price source.
pub fn record_quotes_received(count: u64) {
    counter!("market_feed_quotes_received_total").increment(count);
}

/// Record a price source error.
pub fn record_source_error(kind: &'static str) {
    counter!("market_feed_source_errors_total", "kind" => kind).increment(1);
}

/// Record price points written to the store.
pub fn record_points_stored(count: u64) {
    counter!("market_feed_points_stored_total").increment(count);
}

/// Record a storage failure.
pub fn record_storage_error(operation: &'static str) {
    counter!("market_feed_storage_errors_total", "operation" => operation).increment(1);
}

/// Record ticks forwarded to the ingestion sink.
pub fn record_ticks_flushed(count: u64) {
    counter!("market_feed_ticks_flushed_total").increment(count);
}

/// Record a failed sink batch.
pub fn record_sink_error() {
    counter!("market_feed_sink_errors_total").increment(1);
}

/// Record an acquisition that had to wait for tokens.
pub fn record_rate_limiter_wait(limiter: &'static str) {
    counter!("market_feed_rate_limiter_waits_total", "limiter" => limiter).increment(1);
}

/// Update the WebSocket connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_ws_connections(count: usize) {
    gauge!("market_feed_ws_connections").set(count as f64);
}

/// Record a message queued to a WebSocket client.
pub fn record_message_sent(msg_type: MessageType) {
    counter!(
        "market_feed_messages_sent_total",
        "message_type" => msg_type.as_str()
    )
    .increment(1);
}

/// Record a message dropped because a client's queue was full.
pub fn record_message_dropped(msg_type: MessageType) {
    counter!(
        "market_feed_messages_dropped_total",
        "message_type" => msg_type.as_str()
    )
    .increment(1);
}

/// Record historical points written by backfill.
pub fn record_backfill_points(count: u64) {
    counter!("market_feed_backfill_points_total").increment(count);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_as_str() {
        assert_eq!(MessageType::Connected.as_str(), "connected");
        assert_eq!(MessageType::Ack.as_str(), "ack");
        assert_eq!(MessageType::Historical.as_str(), "historical");
        assert_eq!(MessageType::Price.as_str(), "price");
        assert_eq!(MessageType::Latest.as_str(), "latest");
        assert_eq!(MessageType::Error.as_str(), "error");
    }

    #[test]
    fn recording_without_recorder_is_harmless() {
        record_poll_cycle("success", Duration::from_millis(5));
        record_source_error("network");
        set_union_symbols(3);
        record_message_dropped(MessageType::Price);
    }
}

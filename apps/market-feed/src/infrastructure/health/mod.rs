//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, poller status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (poller running, store reachable)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{PollerState, QuotePoller, RateLimiter};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::broadcast::{BroadcasterStats, StreamBroadcaster};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::storage::{StoreStats, TimeSeriesStore};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Poller status.
    pub poller: PollerStatus,
    /// Subscription union size.
    pub subscriptions: SubscriptionStatus,
    /// WebSocket fan-out counts.
    pub clients: BroadcasterStats,
    /// Store statistics, absent when the store is unreachable.
    pub storage: Option<StoreStats>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Polling under rate-limit backoff.
    Degraded,
    /// Poller stopped or store unreachable.
    Unhealthy,
}

/// Poller status.
#[derive(Debug, Clone, Serialize)]
pub struct PollerStatus {
    /// "running" or "stopped".
    pub state: &'static str,
    /// Current backoff multiplier (1.0 when not backing off).
    pub backoff_multiplier: f64,
    /// Tokens left in the polling limiter, if it was not busy.
    pub limiter_tokens: Option<u32>,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Live registry handles.
    pub handles: usize,
    /// Symbols in the polled union.
    pub union_symbols: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    poller: Arc<QuotePoller>,
    limiter: Arc<RateLimiter>,
    registry: Arc<SubscriptionRegistry>,
    broadcaster: Arc<StreamBroadcaster>,
    store: TimeSeriesStore,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        poller: Arc<QuotePoller>,
        limiter: Arc<RateLimiter>,
        registry: Arc<SubscriptionRegistry>,
        broadcaster: Arc<StreamBroadcaster>,
        store: TimeSeriesStore,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            poller,
            limiter,
            registry,
            broadcaster,
            store,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, health_router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn health_router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state).await;
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state).await;

    if response.status == HealthStatus::Unhealthy {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let storage = match state.store.run(|store| store.stats()).await {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read store stats");
            None
        }
    };

    let poller_state = state.poller.state();
    let multiplier = state.poller.backoff_multiplier();
    let registry = state.registry.stats();

    HealthResponse {
        status: determine_health_status(poller_state, multiplier, storage.is_some()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        poller: PollerStatus {
            state: poller_state.as_str(),
            backoff_multiplier: multiplier,
            limiter_tokens: state.limiter.available(),
        },
        subscriptions: SubscriptionStatus {
            handles: registry.handle_count,
            union_symbols: registry.symbol_count,
        },
        clients: state.broadcaster.stats(),
        storage,
    }
}

fn determine_health_status(
    poller: PollerState,
    backoff_multiplier: f64,
    store_reachable: bool,
) -> HealthStatus {
    match (poller, store_reachable) {
        (PollerState::Stopped, _) | (_, false) => HealthStatus::Unhealthy,
        (PollerState::Running, true) if backoff_multiplier > 1.0 => HealthStatus::Degraded,
        (PollerState::Running, true) => HealthStatus::Healthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
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

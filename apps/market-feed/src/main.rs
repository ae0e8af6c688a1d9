//! Market Feed Binary
//!
//! Starts the quote poller, REST/WebSocket API, and health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-feed
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//! - `POLL_SYMBOLS`: Comma-separated symbols polled at startup (default: BTC-USD,ETH-USD)
//! - `POLL_INTERVAL_MS`: Base poll interval (default: 1500)
//! - `POLL_MAX_BACKOFF`: Backoff multiplier ceiling (default: 8)
//! - `POLL_MAX_SYMBOLS_PER_REQUEST`: Per-request symbol cap (default: 50)
//! - `RATE_LIMIT_CAPACITY` / `RATE_LIMIT_REFILL_AMOUNT` / `RATE_LIMIT_REFILL_INTERVAL_MS`
//! - `HISTORY_RATE_LIMIT_*`: Same keys for the backfill limiter
//! - `PRICE_SOURCE_URL`: Market data API base (default: <https://api.coinbase.com>)
//! - `PRICE_SOURCE_TOKEN`: Bearer token for the price source
//! - `INGEST_SINK_URL`: Tick ingestion endpoint (ticks discarded when unset)
//! - `DATABASE_PATH`: SQLite file (default: data/prices.db)
//! - `HTTP_PORT`: REST and WebSocket port (default: 3001)
//! - `HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `BACKFILL_ENABLED`, `BACKFILL_DAYS`: Startup history backfill
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_feed::application::ports::{
    HistorySource, NoOpTickSink, PricePublisher, PriceRepository, PriceSource, TickSink,
};
use market_feed::application::services::BackfillConfig;
use market_feed::domain::market::now_seconds;
use market_feed::infrastructure::telemetry;
use market_feed::{
    ApiServer, ApiState, BackfillService, BroadcastConfig, EngineConfig, HealthServer,
    HealthServerState, HttpPriceSource, HttpSourceConfig, HttpTickSink, PollerConfig, PollerDeps,
    QuoteCache, QuotePoller, RateLimiter, StreamBroadcaster, SubscriptionRegistry, TimeSeriesStore,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting market feed");

    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = EngineConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store = TimeSeriesStore::open(&config.storage.database_path)
        .with_context(|| format!("failed to open {}", config.storage.database_path.display()))?;

    // Seed symbols hold their own handle for the life of the process.
    let registry = Arc::new(SubscriptionRegistry::new());
    let _seed_handle = registry.subscribe(&config.poller.symbols);

    let broadcaster = Arc::new(StreamBroadcaster::new(
        Arc::clone(&registry),
        store.clone(),
        BroadcastConfig::from(&config.broadcast),
    ));

    let source = Arc::new(HttpPriceSource::new(HttpSourceConfig::from(&config.source))?);

    let sink: Arc<dyn TickSink> = match &config.sink.url {
        Some(url) => Arc::new(HttpTickSink::new(url.clone(), config.sink.timeout)?),
        None => Arc::new(NoOpTickSink),
    };

    let poll_limiter = Arc::new(RateLimiter::new("poll", config.rate_limit.poll));
    let quotes = Arc::new(QuoteCache::new());

    let poller = Arc::new(QuotePoller::new(
        PollerDeps {
            registry: Arc::clone(&registry),
            source: Arc::clone(&source) as Arc<dyn PriceSource>,
            limiter: Arc::clone(&poll_limiter),
            cache: Arc::clone(&quotes),
            repository: Arc::new(store.clone()) as Arc<dyn PriceRepository>,
            sink,
            publisher: Arc::clone(&broadcaster) as Arc<dyn PricePublisher>,
        },
        PollerConfig::from(&config.poller),
    ));

    if config.backfill.enabled {
        let service = BackfillService::new(
            Arc::clone(&source) as Arc<dyn HistorySource>,
            Arc::new(store.clone()),
            Arc::new(RateLimiter::new("history", config.rate_limit.history)),
            BackfillConfig::from(&config.backfill),
        );
        let symbols = config.poller.symbols.clone();
        let cancel = shutdown_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Backfill cancelled");
                }
                report = service.backfill_all(&symbols, now_seconds()) => {
                    tracing::info!(
                        symbols = report.completed.len(),
                        failed = report.failed.len(),
                        stored = report.total_stored(),
                        "Backfill finished"
                    );
                }
            }
        });
    }

    poller.start().await;

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&poller),
        Arc::clone(&poll_limiter),
        Arc::clone(&registry),
        Arc::clone(&broadcaster),
        store.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let api_server = ApiServer::new(
        config.server.http_port,
        ApiState::new(store.clone(), Arc::clone(&broadcaster), quotes),
        shutdown_token.clone(),
    );
    let api_token = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "API server error");
            api_token.cancel();
        }
    });

    tracing::info!("Market feed ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, poller.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Poller did not stop within the shutdown timeout");
    }

    tracing::info!("Market feed stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        symbols = config.poller.symbols.len(),
        interval_ms = u64::try_from(config.poller.base_interval.as_millis()).unwrap_or(u64::MAX),
        http_port = config.server.http_port,
        health_port = config.server.health_port,
        database = %config.storage.database_path.display(),
        backfill = config.backfill.enabled,
        sink = config.sink.url.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(source = ?config.source, "Price source");
}

/// Wait for shutdown (SIGTERM, SIGINT, or an internal cancel).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

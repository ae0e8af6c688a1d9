//! Time-Series Store
//!
//! SQLite-backed price history keyed by `(symbol, timestamp)`. All access
//! goes through a single connection behind a mutex, so writes are
//! serialized. Async callers should go through [`TimeSeriesStore::run`],
//! which moves the blocking work onto the blocking thread pool.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::Serialize;

use crate::application::ports::{PriceRepository, StorageError};
use crate::domain::market::{PricePoint, PriceSample, Symbol};

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS price_points (
        symbol TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        price REAL NOT NULL,
        PRIMARY KEY (symbol, timestamp)
    ) WITHOUT ROWID;
";

const UPSERT: &str = r"
    INSERT INTO price_points (symbol, timestamp, price)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(symbol, timestamp) DO UPDATE SET price = excluded.price
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Types
// =============================================================================

/// One aggregated bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBucket {
    /// Bucket floor, `floor(ts / width) * width`.
    pub bucket_start: i64,
    /// Mean price.
    pub avg: f64,
    /// Lowest price.
    pub min: f64,
    /// Highest price.
    pub max: f64,
    /// Points in the bucket.
    pub count: u64,
}

/// Result of [`TimeSeriesStore::aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// No bucket width was given; raw points in ascending order.
    Raw(Vec<PriceSample>),
    /// Buckets in ascending order.
    Buckets(Vec<AggregateBucket>),
}

/// Store-wide statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Total stored points.
    pub total_records: u64,
    /// Number of distinct symbols.
    pub distinct_symbol_count: u64,
    /// Oldest stored timestamp.
    pub oldest_timestamp: Option<i64>,
    /// Newest stored timestamp.
    pub newest_timestamp: Option<i64>,
}

// =============================================================================
// Error Mapping
// =============================================================================

fn unavailable(e: &rusqlite::Error) -> StorageError {
    StorageError::unavailable(e.to_string())
}

fn classify(e: &rusqlite::Error) -> StorageError {
    match e.sqlite_error_code() {
        Some(
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::ReadOnly
            | ErrorCode::DiskFull
            | ErrorCode::SystemIoFailure
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt,
        ) => unavailable(e),
        _ => StorageError::Query {
            message: e.to_string(),
        },
    }
}

// =============================================================================
// Time-Series Store
// =============================================================================

/// Durable `(symbol, timestamp)`-keyed price store.
///
/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct TimeSeriesStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for TimeSeriesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesStore").finish_non_exhaustive()
    }
}

impl TimeSeriesStore {
    /// Open (or create) a store on disk, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the file or schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| unavailable(&e))?;
        // Best effort; WAL is unavailable on some filesystems.
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;") {
            tracing::warn!(error = %e, "Could not enable WAL journal");
        }
        conn.busy_timeout(BUSY_TIMEOUT).map_err(|e| unavailable(&e))?;

        tracing::info!(path = %path.display(), "Opened time-series store");
        Self::with_connection(conn)
    }

    /// Open a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|e| unavailable(&e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA).map_err(|e| unavailable(&e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run blocking store work on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or `StorageError::Unavailable` if the
    /// blocking task panicked or was cancelled.
    pub async fn run<F, R>(&self, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(&Self) -> Result<R, StorageError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StorageError::unavailable(format!("storage task failed: {e}")))?
    }

    /// Insert or overwrite points for `symbol` in one transaction.
    ///
    /// Individual point failures are logged and skipped. Returns rows written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the transaction cannot begin or commit.
    pub fn upsert(&self, symbol: &Symbol, points: &[PriceSample]) -> Result<usize, StorageError> {
        if points.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| unavailable(&e))?;

        let mut written = 0;
        {
            let mut stmt = tx.prepare(UPSERT).map_err(|e| unavailable(&e))?;
            for point in points {
                if !point.price.is_finite() {
                    tracing::warn!(symbol = %symbol, timestamp = point.timestamp, "Skipping non-finite price");
                    continue;
                }
                match stmt.execute(params![symbol.as_str(), point.timestamp, point.price]) {
                    Ok(rows) => written += rows,
                    Err(e) => tracing::warn!(
                        symbol = %symbol,
                        timestamp = point.timestamp,
                        error = %e,
                        "Failed to write price point"
                    ),
                }
            }
        }

        tx.commit().map_err(|e| unavailable(&e))?;
        Ok(written)
    }

    /// Points in `[from, to]`, ascending, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the query fails.
    pub fn query(
        &self,
        symbol: &Symbol,
        from: Option<i64>,
        to: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<PriceSample>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, price FROM price_points
                 WHERE symbol = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                 ORDER BY timestamp ASC LIMIT ?4",
            )
            .map_err(|e| classify(&e))?;

        let rows = stmt
            .query_map(
                params![
                    symbol.as_str(),
                    from.unwrap_or(i64::MIN),
                    to.unwrap_or(i64::MAX),
                    sql_limit(limit),
                ],
                |row| {
                    Ok(PriceSample {
                        timestamp: row.get(0)?,
                        price: row.get(1)?,
                    })
                },
            )
            .map_err(|e| classify(&e))?;

        rows.collect::<Result<Vec<_>, _>>().map_err(|e| classify(&e))
    }

    /// Newest stored timestamp for a symbol.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the query fails.
    pub fn latest_timestamp(&self, symbol: &Symbol) -> Result<Option<i64>, StorageError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT MAX(timestamp) FROM price_points WHERE symbol = ?1",
            params![symbol.as_str()],
            |row| row.get::<_, Option<i64>>(0),
        )
        .map_err(|e| classify(&e))
    }

    /// Every symbol with stored history, sorted.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the query fails.
    pub fn distinct_symbols(&self) -> Result<Vec<Symbol>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT symbol FROM price_points ORDER BY symbol ASC")
            .map_err(|e| classify(&e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| classify(&e))?;

        let raw = rows.collect::<Result<Vec<_>, _>>().map_err(|e| classify(&e))?;
        Ok(Symbol::parse_all(raw))
    }

    /// Aggregate `[from, to]` into `bucket_seconds` buckets, or raw points when no width is given.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the query fails.
    pub fn aggregate(
        &self,
        symbol: &Symbol,
        from: i64,
        to: i64,
        bucket_seconds: Option<i64>,
    ) -> Result<Aggregation, StorageError> {
        let Some(width) = bucket_seconds.filter(|w| *w > 0) else {
            return self
                .query(symbol, Some(from), Some(to), None)
                .map(Aggregation::Raw);
        };

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT timestamp - (((timestamp % ?4) + ?4) % ?4) AS bucket, AVG(price), MIN(price), MAX(price), COUNT(*)
                 FROM price_points
                 WHERE symbol = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                 GROUP BY bucket ORDER BY bucket ASC",
            )
            .map_err(|e| classify(&e))?;

        let rows = stmt
            .query_map(params![symbol.as_str(), from, to, width], |row| {
                Ok(AggregateBucket {
                    bucket_start: row.get(0)?,
                    avg: row.get(1)?,
                    min: row.get(2)?,
                    max: row.get(3)?,
                    count: row.get::<_, i64>(4)?.unsigned_abs(),
                })
            })
            .map_err(|e| classify(&e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map(Aggregation::Buckets)
            .map_err(|e| classify(&e))
    }

    /// Newest `limit` points at or after `since`, returned ascending.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the query fails.
    pub fn recent(
        &self,
        symbol: &Symbol,
        since: i64,
        limit: usize,
    ) -> Result<Vec<PriceSample>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, price FROM price_points
                 WHERE symbol = ?1 AND timestamp >= ?2
                 ORDER BY timestamp DESC LIMIT ?3",
            )
            .map_err(|e| classify(&e))?;

        let rows = stmt
            .query_map(params![symbol.as_str(), since, sql_limit(Some(limit))], |row| {
                Ok(PriceSample {
                    timestamp: row.get(0)?,
                    price: row.get(1)?,
                })
            })
            .map_err(|e| classify(&e))?;

        let mut points = rows.collect::<Result<Vec<_>, _>>().map_err(|e| classify(&e))?;
        points.reverse();
        Ok(points)
    }

    /// Newest point at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the query fails.
    pub fn latest(&self, symbol: &Symbol, since: i64) -> Result<Option<PriceSample>, StorageError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT timestamp, price FROM price_points
             WHERE symbol = ?1 AND timestamp >= ?2
             ORDER BY timestamp DESC LIMIT 1",
            params![symbol.as_str(), since],
            |row| {
                Ok(PriceSample {
                    timestamp: row.get(0)?,
                    price: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(|e| classify(&e))
    }

    /// Store-wide statistics.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the query fails.
    pub fn stats(&self) -> Result<StoreStats, StorageError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT symbol), MIN(timestamp), MAX(timestamp) FROM price_points",
            [],
            |row| {
                Ok(StoreStats {
                    total_records: row.get::<_, i64>(0)?.unsigned_abs(),
                    distinct_symbol_count: row.get::<_, i64>(1)?.unsigned_abs(),
                    oldest_timestamp: row.get(2)?,
                    newest_timestamp: row.get(3)?,
                })
            },
        )
        .map_err(|e| classify(&e))
    }
}

/// SQLite treats a negative LIMIT as unbounded.
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

// =============================================================================
// Repository Port
// =============================================================================

#[async_trait]
impl PriceRepository for TimeSeriesStore {
    async fn upsert_points(
        &self,
        symbol: &Symbol,
        points: &[PricePoint],
    ) -> Result<usize, StorageError> {
        let symbol = symbol.clone();
        let samples: Vec<PriceSample> = points.iter().map(PricePoint::sample).collect();
        self.run(move |store| store.upsert(&symbol, &samples)).await
    }

    async fn latest_timestamp(&self, symbol: &Symbol) -> Result<Option<i64>, StorageError> {
        let symbol = symbol.clone();
        self.run(move |store| TimeSeriesStore::latest_timestamp(store, &symbol))
            .await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn samples(points: &[(i64, f64)]) -> Vec<PriceSample> {
        points
            .iter()
            .map(|&(timestamp, price)| PriceSample { timestamp, price })
            .collect()
    }

    fn seeded() -> TimeSeriesStore {
        let store = TimeSeriesStore::open_in_memory().unwrap();
        store
            .upsert(
                &sym("BTC-USD"),
                &samples(&[(300, 3.0), (100, 1.0), (200, 2.0), (3_700, 10.0)]),
            )
            .unwrap();
        store
            .upsert(&sym("ETH-USD"), &samples(&[(150, 50.0)]))
            .unwrap();
        store
    }

    #[test]
    fn upsert_is_idempotent_and_last_write_wins() {
        let store = TimeSeriesStore::open_in_memory().unwrap();
        let btc = sym("BTC-USD");

        store.upsert(&btc, &samples(&[(100, 1.0)])).unwrap();
        store.upsert(&btc, &samples(&[(100, 1.0)])).unwrap();
        store.upsert(&btc, &samples(&[(100, 2.0)])).unwrap();

        let points = store.query(&btc, None, None, None).unwrap();
        assert_eq!(points, samples(&[(100, 2.0)]));
        assert_eq!(store.stats().unwrap().total_records, 1);
    }

    #[test]
    fn non_finite_points_are_skipped() {
        let store = TimeSeriesStore::open_in_memory().unwrap();
        let btc = sym("BTC-USD");

        let written = store
            .upsert(&btc, &samples(&[(1, f64::NAN), (2, 5.0)]))
            .unwrap();

        assert_eq!(written, 1);
    }

    #[test]
    fn query_is_ascending_with_inclusive_bounds() {
        let store = seeded();
        let btc = sym("BTC-USD");

        let all = store.query(&btc, None, None, None).unwrap();
        assert_eq!(
            all.iter().map(|p| p.timestamp).collect::<Vec<_>>(),
            vec![100, 200, 300, 3_700]
        );

        let bounded = store.query(&btc, Some(200), Some(300), None).unwrap();
        assert_eq!(bounded, samples(&[(200, 2.0), (300, 3.0)]));

        let limited = store.query(&btc, None, None, Some(2)).unwrap();
        assert_eq!(limited, samples(&[(100, 1.0), (200, 2.0)]));
    }

    #[test]
    fn unknown_symbol_has_no_data() {
        let store = seeded();
        let doge = sym("DOGE-USD");

        assert!(store.query(&doge, None, None, None).unwrap().is_empty());
        assert_eq!(store.latest_timestamp(&doge).unwrap(), None);
        assert_eq!(store.latest(&doge, 0).unwrap(), None);
    }

    #[test]
    fn latest_timestamp_and_symbols() {
        let store = seeded();

        assert_eq!(store.latest_timestamp(&sym("BTC-USD")).unwrap(), Some(3_700));
        assert_eq!(
            store.distinct_symbols().unwrap(),
            vec![sym("BTC-USD"), sym("ETH-USD")]
        );
    }

    #[test]
    fn aggregate_groups_by_bucket_floor() {
        let store = seeded();

        let Aggregation::Buckets(buckets) = store
            .aggregate(&sym("BTC-USD"), 0, 10_000, Some(3_600))
            .unwrap()
        else {
            panic!("expected buckets");
        };

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].bucket_start, 0);
        assert_eq!(buckets[0].count, 3);
        assert!((buckets[0].avg - 2.0).abs() < 1e-9);
        assert!((buckets[0].min - 1.0).abs() < f64::EPSILON);
        assert!((buckets[0].max - 3.0).abs() < f64::EPSILON);
        assert_eq!(buckets[1].bucket_start, 3_600);
    }

    #[test]
    fn aggregate_floors_pre_epoch_timestamps() {
        let store = TimeSeriesStore::open_in_memory().unwrap();
        let btc = sym("BTC-USD");
        store
            .upsert(&btc, &samples(&[(-3_601, 1.0), (-1, 2.0), (0, 3.0)]))
            .unwrap();

        let Aggregation::Buckets(buckets) = store.aggregate(&btc, -10_000, 10, Some(3_600)).unwrap()
        else {
            panic!("expected buckets");
        };

        let starts: Vec<i64> = buckets.iter().map(|b| b.bucket_start).collect();
        assert_eq!(starts, vec![-7_200, -3_600, 0]);
    }

    #[test]
    fn aggregate_without_width_is_raw() {
        let store = seeded();

        let result = store.aggregate(&sym("BTC-USD"), 0, 250, None).unwrap();

        assert_eq!(result, Aggregation::Raw(samples(&[(100, 1.0), (200, 2.0)])));
    }

    #[test]
    fn recent_returns_newest_ascending() {
        let store = seeded();

        let recent = store.recent(&sym("BTC-USD"), 150, 2).unwrap();

        assert_eq!(recent, samples(&[(300, 3.0), (3_700, 10.0)]));
    }

    #[test]
    fn latest_respects_cutoff() {
        let store = seeded();
        let btc = sym("BTC-USD");

        assert_eq!(store.latest(&btc, 0).unwrap(), Some(PriceSample { timestamp: 3_700, price: 10.0 }));
        assert_eq!(store.latest(&btc, 4_000).unwrap(), None);
    }

    #[test]
    fn stats_summarize_table() {
        let store = seeded();

        let stats = store.stats().unwrap();

        assert_eq!(stats.total_records, 5);
        assert_eq!(stats.distinct_symbol_count, 2);
        assert_eq!(stats.oldest_timestamp, Some(100));
        assert_eq!(stats.newest_timestamp, Some(3_700));
    }

    #[test]
    fn empty_store_stats() {
        let store = TimeSeriesStore::open_in_memory().unwrap();
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn on_disk_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prices.db");
        let btc = sym("BTC-USD");

        {
            let store = TimeSeriesStore::open(&path).unwrap();
            store.upsert(&btc, &samples(&[(1, 1.5)])).unwrap();
        }

        let reopened = TimeSeriesStore::open(&path).unwrap();
        assert_eq!(reopened.latest_timestamp(&btc).unwrap(), Some(1));
    }

    #[tokio::test]
    async fn repository_port_runs_off_thread() {
        let store = TimeSeriesStore::open_in_memory().unwrap();
        let btc = sym("BTC-USD");
        let points = vec![
            PricePoint::new(btc.clone(), 10, 1.0),
            PricePoint::new(btc.clone(), 20, 2.0),
        ];

        let written = store.upsert_points(&btc, &points).await.unwrap();
        let latest = PriceRepository::latest_timestamp(&store, &btc).await.unwrap();

        assert_eq!(written, 2);
        assert_eq!(latest, Some(20));
    }
}

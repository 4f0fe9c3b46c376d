//! Best-effort record counting for a single export database.

use crate::error::{ErrorKind, Result};
use crate::strategy::{self, ProbeContext, ProbeStrategy, Resolution, Tables};
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::Connection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::instrument;

/// SQLite's own lock wait. Export databases are written once and then only
/// read, so anything longer than this means something else is wrong.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Record counts for one database file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub nomenclature: u64,
    pub counterparties: u64,
    /// Size of the database file on disk, in bytes.
    pub file_size: u64,
}

/// Counts records in one export database.
///
/// Implementations must give up once `deadline` has passed, reporting
/// [`ErrorKind::Timeout`], and must not leave connections open on any path.
#[async_trait]
pub trait RecordCounter: Send + Sync {
    async fn count(&self, path: &Path, deadline: Instant) -> Result<Counts>;
}

/// [`RecordCounter`] that opens the file read-only with a single-connection
/// pool and walks the probe strategy cascade.
pub struct SqliteRecordCounter {
    strategies: Vec<Box<dyn ProbeStrategy>>,
}
impl Default for SqliteRecordCounter {
    fn default() -> Self {
        Self::new(strategy::default_strategies())
    }
}
impl SqliteRecordCounter {
    pub fn new(strategies: Vec<Box<dyn ProbeStrategy>>) -> Self {
        Self { strategies }
    }

    /// Open a read-only, single-connection pool and make sure the connection
    /// can actually be established before handing the pool out.
    async fn open(path: &Path, deadline: Instant) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .acquire_timeout(deadline.saturating_duration_since(Instant::now()))
            .connect_lazy_with(options);
        let ping = async {
            let mut conn = pool.acquire().await?;
            conn.ping().await
        };
        match timeout_at(deadline, ping).await {
            Ok(Ok(())) => Ok(pool),
            Ok(Err(sqlx::Error::PoolTimedOut)) => {
                pool.close().await;
                exn::bail!(ErrorKind::Timeout)
            },
            Ok(Err(err)) => {
                pool.close().await;
                Err(err).or_raise(|| ErrorKind::ConnectionFailure)
            },
            Err(elapsed) => {
                pool.close().await;
                Err(elapsed).or_raise(|| ErrorKind::Timeout)
            },
        }
    }

    async fn resolve(&self, pool: &SqlitePool, path: &Path) -> Result<Resolution> {
        let mut conn = pool.acquire().await.or_raise(|| ErrorKind::ConnectionFailure)?;
        // The first real query is where a file that isn't SQLite gives itself away.
        let tables = Tables::load(&mut conn).await.or_raise(|| ErrorKind::Corrupt)?;
        let ctx = ProbeContext { path, tables: &tables };
        Ok(strategy::resolve(&self.strategies, &mut conn, &ctx).await)
    }
}

#[async_trait]
impl RecordCounter for SqliteRecordCounter {
    #[instrument(level = "debug", skip(self, path, deadline), fields(path = %path.display()))]
    async fn count(&self, path: &Path, deadline: Instant) -> Result<Counts> {
        // A stat on a hung network mount can block as long as an open.
        let file_size = match timeout_at(deadline, tokio::fs::metadata(path)).await {
            Ok(Ok(meta)) => meta.len(),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                exn::bail!(ErrorKind::FileNotFound(path.to_path_buf()))
            },
            Ok(Err(err)) => return Err(err).or_raise(|| ErrorKind::ConnectionFailure),
            Err(elapsed) => return Err(elapsed).or_raise(|| ErrorKind::Timeout),
        };

        let pool = Self::open(path, deadline).await?;
        let resolved = timeout_at(deadline, self.resolve(&pool, path)).await;
        // Close before inspecting the outcome: every path out of here releases the file.
        pool.close().await;
        let resolution = resolved.or_raise(|| ErrorKind::Timeout)??;

        Ok(Counts {
            nomenclature: resolution.nomenclature.unwrap_or(0),
            counterparties: resolution.counterparties.unwrap_or(0),
            file_size,
        })
    }
}

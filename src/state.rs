//! Shared server state and the services behind it.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use fleetscan_broadcast::Intervals;
use fleetscan_cache::{Database, DEFAULT_LIMIT, HistoryRepository, SummaryCache};
use fleetscan_config::Config;
use fleetscan_metadata::SqliteMetadataStore;
use fleetscan_probe::SqliteRecordCounter;
use fleetscan_scan::{ScanOptions, Scanner, SystemSummary};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const DEFAULT_SCAN_DEADLINE: Duration = Duration::from_secs(300);

/// Everything a request handler needs. One instance per server, shared
/// behind an [`Arc`].
pub struct AppState {
    scanner: Scanner,
    cache: Arc<SummaryCache>,
    history: Option<HistoryRepository>,
    scan_deadline: Duration,
    history_limit: usize,
    intervals: Intervals,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(scanner: Scanner, cache: Arc<SummaryCache>) -> Self {
        Self {
            scanner,
            cache,
            history: None,
            scan_deadline: DEFAULT_SCAN_DEADLINE,
            history_limit: DEFAULT_LIMIT,
            intervals: Intervals::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_history(mut self, history: HistoryRepository) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_scan_deadline(mut self, deadline: Duration) -> Self {
        self.scan_deadline = deadline;
        self
    }

    pub fn with_intervals(mut self, intervals: Intervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Cancelling this token ends the server and every open summary stream.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn cache(&self) -> &Arc<SummaryCache> {
        &self.cache
    }

    pub fn history(&self) -> Option<&HistoryRepository> {
        self.history.as_ref()
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn intervals(&self) -> Intervals {
        self.intervals
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Scan the fleet now, install the result in the cache and record it in
    /// the history (when enabled).
    ///
    /// History write failures are logged and otherwise ignored.
    pub async fn refresh(&self) -> fleetscan_scan::error::Result<Arc<SystemSummary>> {
        let deadline = Instant::now() + self.scan_deadline;
        match self.scanner.scan(deadline).await {
            Ok(summary) => {
                let summary = self.cache.set(summary).await;
                self.record(&summary, None).await;
                Ok(summary)
            },
            Err(err) => {
                self.record(&SystemSummary::default(), Some(&err.to_string())).await;
                Err(err)
            },
        }
    }

    async fn record(&self, summary: &SystemSummary, error: Option<&str>) {
        let Some(history) = &self.history else { return };
        if let Err(err) = history.save(summary, error).await {
            tracing::warn!(error = ?err, "Could not record scan in history");
        }
    }
}

/// Connections opened from the configuration. Kept separately from
/// [`AppState`] so they can be closed cleanly once the server has stopped.
pub struct Services {
    metadata: Arc<SqliteMetadataStore>,
    history: Option<Database>,
}

impl Services {
    pub async fn connect(config: &Config) -> Result<Self> {
        let metadata = SqliteMetadataStore::connect(&config.metadata.uploads_db, &config.metadata.service_db)
            .await
            .or_raise(|| ErrorKind::Metadata)?;
        let history = match &config.history.path {
            Some(path) => Some(Database::connect(path).await.or_raise(|| ErrorKind::History)?),
            None => None,
        };
        Ok(Self { metadata: Arc::new(metadata), history })
    }

    pub fn app_state(&self, config: &Config, shutdown: CancellationToken) -> AppState {
        let options = ScanOptions {
            concurrency: config.scan.concurrency,
            unit_timeout: config.scan.unit_timeout(),
        };
        let scanner = Scanner::new(self.metadata.clone(), Arc::new(SqliteRecordCounter::default()), options);
        let state = AppState::new(scanner, Arc::new(SummaryCache::new(config.cache.ttl())))
            .with_scan_deadline(config.scan.deadline())
            .with_history_limit(config.history.default_limit)
            .with_intervals(Intervals {
                update: config.broadcast.update_interval(),
                heartbeat: config.broadcast.heartbeat_interval(),
            })
            .with_shutdown(shutdown);
        match &self.history {
            Some(db) => state.with_history(HistoryRepository::from(db)),
            None => state,
        }
    }

    pub async fn close(&self) {
        self.metadata.close().await;
        if let Some(db) = &self.history {
            db.close().await;
        }
    }
}

//! Fleet scan orchestration.

use crate::error::{ErrorKind, Result};
use crate::models::{SkipReason, SystemSummary, UploadSummary};
use exn::ResultExt;
use fleetscan_metadata::MetadataStore;
use fleetscan_probe::{Counts, RecordCounter};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{Instant, timeout_at};
use tracing::instrument;

const DEFAULT_CONCURRENCY: usize = 5;
const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Maximum number of databases being counted at the same time.
    pub concurrency: usize,
    /// Time budget for counting one database.
    pub unit_timeout: Duration,
}
impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
        }
    }
}

/// One database to count, pointing back at its row in the detail list.
struct Unit {
    index: usize,
    upload_id: i64,
    path: PathBuf,
}

/// State shared by the counting tasks of one scan.
#[derive(Default)]
struct Aggregate {
    processed: u64,
    skipped: u64,
    details: Vec<UploadSummary>,
}
impl Aggregate {
    fn record_counts(&mut self, index: usize, counts: Counts) {
        self.processed += 1;
        if let Some(detail) = self.details.get_mut(index) {
            detail.record_counts(counts);
        }
    }

    fn record_skip(&mut self, index: usize, reason: SkipReason) {
        self.skipped += 1;
        if let Some(detail) = self.details.get_mut(index) {
            detail.skip_reason = Some(reason);
        }
    }
}

/// Scans every upload known to the metadata store and aggregates the record
/// counts of their databases into one [`SystemSummary`].
///
/// At most [`ScanOptions::concurrency`] databases are counted at once; an
/// upload whose database cannot be counted is skipped, never fatal.
pub struct Scanner {
    store: Arc<dyn MetadataStore>,
    counter: Arc<dyn RecordCounter>,
    options: ScanOptions,
}

impl Scanner {
    pub fn new(store: Arc<dyn MetadataStore>, counter: Arc<dyn RecordCounter>, options: ScanOptions) -> Self {
        Self { store, counter, options }
    }

    /// Run one full scan that must finish by `deadline`.
    ///
    /// Fails only when the metadata store cannot be read. Databases still
    /// being counted when the deadline passes are recorded as timeouts, and
    /// databases not yet started are skipped without being opened.
    #[instrument(level = "info", skip(self, deadline), fields(store = self.store.name()))]
    pub async fn scan(&self, deadline: Instant) -> Result<SystemSummary> {
        let started = Instant::now();
        let uploads = self.store.list_uploads().await.or_raise(|| ErrorKind::MetadataUnavailable)?;
        if uploads.is_empty() {
            tracing::info!("No uploads registered; nothing to scan");
            return Ok(SystemSummary { scan_duration_ms: elapsed_ms(started), ..SystemSummary::default() });
        }

        // Resolve every distinct reference in one round trip before fanning out.
        let references: Vec<i64> =
            uploads.iter().filter_map(|upload| upload.database_id).collect::<BTreeSet<_>>().into_iter().collect();
        let paths = if references.is_empty() {
            HashMap::new()
        } else {
            self.store.resolve_database_paths(&references).await.or_raise(|| ErrorKind::MetadataUnavailable)?
        };

        let mut details = Vec::with_capacity(uploads.len());
        let mut units = Vec::new();
        let mut unresolved = Vec::new();
        let mut distinct_paths = HashSet::new();
        for (index, upload) in uploads.iter().enumerate() {
            let mut detail = UploadSummary::from(upload);
            if let Some(database_id) = upload.database_id {
                match paths.get(&database_id) {
                    Some(path) => {
                        detail.attach_database(path);
                        distinct_paths.insert(path.clone());
                        units.push(Unit { index, upload_id: upload.id, path: path.clone() });
                    },
                    None => unresolved.push((index, upload.id, database_id)),
                }
            }
            details.push(detail);
        }
        tracing::info!(
            uploads = uploads.len(),
            databases = distinct_paths.len(),
            units = units.len(),
            concurrency = self.options.concurrency,
            "Starting fleet scan"
        );

        let mut aggregate = Aggregate { details, ..Aggregate::default() };
        for (index, upload_id, database_id) in unresolved {
            tracing::warn!(upload = upload_id, database_id, reason = %SkipReason::Unresolved, "Skipping upload");
            aggregate.record_skip(index, SkipReason::Unresolved);
        }
        let aggregate = Arc::new(Mutex::new(aggregate));
        self.fan_out(units, &aggregate, started, deadline).await;
        let aggregate = std::mem::take(&mut *aggregate.lock().await);

        let mut summary = SystemSummary {
            total_databases: distinct_paths.len() as u64,
            last_activity: uploads.iter().filter_map(|upload| upload.last_activity()).max(),
            databases_processed: aggregate.processed,
            databases_skipped: aggregate.skipped,
            upload_details: aggregate.details,
            ..SystemSummary::default()
        };
        summary.tally_statuses();
        // Skipped rows never carry counts, so this is the sum over processed units.
        summary.tally_entities();
        summary.scan_duration_ms = elapsed_ms(started);

        tracing::info!(
            total_databases = summary.total_databases,
            total_uploads = summary.total_uploads,
            processed = summary.databases_processed,
            skipped = summary.databases_skipped,
            total_nomenclature = summary.total_nomenclature,
            total_counterparties = summary.total_counterparties,
            elapsed_ms = summary.scan_duration_ms,
            "Fleet scan complete"
        );
        Ok(summary)
    }

    async fn fan_out(&self, units: Vec<Unit>, aggregate: &Arc<Mutex<Aggregate>>, started: Instant, deadline: Instant) {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        // Derived once from the outer deadline and reused for every unit; each
        // unit is still cut off at the outer deadline itself.
        let unit_timeout = self.options.unit_timeout.min(deadline.saturating_duration_since(started));

        let mut tasks = JoinSet::new();
        let mut running: HashMap<task::Id, (usize, i64)> = HashMap::new();
        let mut units = units.into_iter();
        while let Some(unit) = units.next() {
            // The semaphore is never closed, so only the deadline ends the wait.
            let permit = match timeout_at(deadline, Arc::clone(&semaphore).acquire_owned()).await {
                Ok(Ok(permit)) if Instant::now() < deadline => Some(permit),
                _ => None,
            };
            let Some(permit) = permit else {
                let mut aggregate = aggregate.lock().await;
                for late in std::iter::once(unit).chain(units.by_ref()) {
                    tracing::warn!(
                        upload = late.upload_id,
                        path = %late.path.display(),
                        reason = %SkipReason::Timeout,
                        "Scan deadline passed before the database could be counted"
                    );
                    aggregate.record_skip(late.index, SkipReason::Timeout);
                }
                break;
            };

            let counter = Arc::clone(&self.counter);
            let shared = Arc::clone(aggregate);
            let Unit { index, upload_id, path } = unit;
            let handle = tasks.spawn(async move {
                let _permit = permit;
                let unit_deadline = (Instant::now() + unit_timeout).min(deadline);
                // Counters are asked to honour the deadline; enforce it anyway.
                match timeout_at(unit_deadline, counter.count(&path, unit_deadline)).await {
                    Ok(Ok(counts)) => {
                        tracing::debug!(upload = upload_id, path = %path.display(), ?counts, "Counted database");
                        shared.lock().await.record_counts(index, counts);
                    },
                    Err(_elapsed) => {
                        let reason = SkipReason::Timeout;
                        let path = path.display();
                        tracing::warn!(upload = upload_id, %path, %reason, "Counter overran its deadline");
                        shared.lock().await.record_skip(index, reason);
                    },
                    Ok(Err(err)) => {
                        let reason = SkipReason::from(&*err);
                        let path = path.display();
                        tracing::warn!(upload = upload_id, %path, %reason, error = ?err, "Skipping upload");
                        shared.lock().await.record_skip(index, reason);
                    },
                }
            });
            running.insert(handle.id(), (index, upload_id));
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, ())) => {
                    running.remove(&id);
                },
                Err(err) => Self::recover(err, &mut running, aggregate).await,
            }
        }
    }

    /// A counting task died before recording its outcome; count it as skipped
    /// so sibling tasks and the totals are unaffected.
    async fn recover(err: JoinError, running: &mut HashMap<task::Id, (usize, i64)>, aggregate: &Mutex<Aggregate>) {
        let Some((index, upload_id)) = running.remove(&err.id()) else {
            tracing::error!(error = %err, "Unknown scan task failed");
            return;
        };
        tracing::error!(upload = upload_id, reason = %SkipReason::Panic, error = %err, "Counting task panicked");
        aggregate.lock().await.record_skip(index, SkipReason::Panic);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetscan_metadata::{MockMetadataStore, Upload};
    use fleetscan_probe::error::ErrorKind as ProbeErrorKind;
    use fleetscan_probe::{MockOutcome, MockRecordCounter};
    use rstest::rstest;
    use time::macros::datetime;

    const DEADLINE: Duration = Duration::from_secs(300);

    fn counts(nomenclature: u64, counterparties: u64) -> MockOutcome {
        MockOutcome::Counts(Counts { nomenclature, counterparties, file_size: 4096 })
    }

    fn scanner(store: MockMetadataStore, counter: Arc<MockRecordCounter>, options: ScanOptions) -> Scanner {
        Scanner::new(Arc::new(store), counter, options)
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_resolved_one_dangling() {
        let store = MockMetadataStore::with_uploads([
            Upload::new(1, "completed").with_database(10),
            Upload::new(2, "completed").with_database(20),
            Upload::new(3, "failed").with_database(30),
        ])
        .with_database(10, "/fleet/a.db")
        .with_database(20, "/fleet/b.db");
        let counter = Arc::new(
            MockRecordCounter::default()
                .with_outcome("/fleet/a.db", counts(10, 0))
                .with_outcome("/fleet/b.db", counts(0, 5)),
        );

        let summary = scanner(store, counter, ScanOptions::default()).scan(Instant::now() + DEADLINE).await.unwrap();
        assert_eq!(summary.databases_processed, 2);
        assert_eq!(summary.databases_skipped, 1);
        assert_eq!(summary.total_nomenclature, 10);
        assert_eq!(summary.total_counterparties, 5);
        assert_eq!(summary.total_databases, 2);
        assert_eq!((summary.total_uploads, summary.completed_uploads, summary.failed_uploads), (3, 2, 1));
        assert_eq!(summary.upload_details[2].skip_reason, Some(SkipReason::Unresolved));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_file_is_skipped_not_fatal() {
        let store = MockMetadataStore::with_uploads([
            Upload::new(1, "completed").with_database(10),
            Upload::new(2, "completed").with_database(20),
        ])
        .with_database(10, "/fleet/present.db")
        .with_database(20, "/fleet/deleted.db");
        let counter = Arc::new(
            MockRecordCounter::default()
                .with_outcome("/fleet/present.db", counts(7, 3))
                .with_outcome(
                    "/fleet/deleted.db",
                    MockOutcome::Fail(ProbeErrorKind::FileNotFound("/fleet/deleted.db".into())),
                ),
        );

        let summary = scanner(store, counter, ScanOptions::default()).scan(Instant::now() + DEADLINE).await.unwrap();
        assert_eq!((summary.databases_processed, summary.databases_skipped), (1, 1));
        assert_eq!(summary.upload_details[1].skip_reason, Some(SkipReason::FileNotFound));
        // The upload's own status is untouched by the skip.
        assert_eq!(summary.completed_uploads, 2);
        assert_eq!((summary.total_nomenclature, summary.total_counterparties), (7, 3));
    }

    #[rstest]
    #[case(ProbeErrorKind::Timeout, SkipReason::Timeout)]
    #[case(ProbeErrorKind::ConnectionFailure, SkipReason::Connection)]
    #[case(ProbeErrorKind::Corrupt, SkipReason::Corrupt)]
    #[tokio::test(start_paused = true)]
    async fn test_failures_are_classified(#[case] kind: ProbeErrorKind, #[case] reason: SkipReason) {
        let store =
            MockMetadataStore::with_uploads([Upload::new(1, "completed").with_database(1)]).with_database(1, "/x.db");
        let counter = Arc::new(MockRecordCounter::default().with_outcome("/x.db", MockOutcome::Fail(kind)));
        let summary = scanner(store, counter, ScanOptions::default()).scan(Instant::now() + DEADLINE).await.unwrap();
        assert_eq!(summary.databases_skipped, 1);
        assert_eq!(summary.upload_details[0].skip_reason, Some(reason));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uploads_without_a_database_count_toward_neither() {
        let store = MockMetadataStore::with_uploads([
            Upload::new(1, "in_progress"),
            Upload::new(2, "completed").with_database(1),
        ])
        .with_database(1, "/one.db");
        let counter = Arc::new(MockRecordCounter::default().with_outcome("/one.db", counts(1, 1)));
        let summary = scanner(store, counter, ScanOptions::default()).scan(Instant::now() + DEADLINE).await.unwrap();
        assert_eq!((summary.databases_processed, summary.databases_skipped), (1, 0));
        assert_eq!(summary.upload_details.len(), 2);
        assert_eq!(summary.upload_details[0].skip_reason, None);
        assert_eq!(summary.in_progress_uploads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let mut uploads = Vec::new();
        let mut store_paths = Vec::new();
        let mut counter = MockRecordCounter::default().with_latency(Duration::from_millis(50));
        for id in 0..20 {
            let path = format!("/fleet/{id}.db");
            uploads.push(Upload::new(id, "completed").with_database(id));
            store_paths.push((id, path.clone()));
            counter = counter.with_outcome(path, counts(1, 2));
        }
        let store = store_paths
            .into_iter()
            .fold(MockMetadataStore::with_uploads(uploads), |store, (id, path)| store.with_database(id, path));
        let counter = Arc::new(counter);
        let options = ScanOptions { concurrency: 3, ..ScanOptions::default() };

        let summary = scanner(store, Arc::clone(&counter), options).scan(Instant::now() + DEADLINE).await.unwrap();
        assert_eq!(summary.databases_processed, 20);
        assert_eq!((summary.total_nomenclature, summary.total_counterparties), (20, 40));
        assert_eq!(counter.max_in_flight(), 3);
        assert_eq!(counter.calls(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_unit_becomes_a_skip() {
        let store = MockMetadataStore::with_uploads([
            Upload::new(1, "completed").with_database(1),
            Upload::new(2, "completed").with_database(2),
        ])
        .with_database(1, "/boom.db")
        .with_database(2, "/fine.db");
        let counter = Arc::new(
            MockRecordCounter::default()
                .with_outcome("/boom.db", MockOutcome::Panic)
                .with_outcome("/fine.db", counts(4, 0)),
        );
        let summary = scanner(store, counter, ScanOptions::default()).scan(Instant::now() + DEADLINE).await.unwrap();
        assert_eq!((summary.databases_processed, summary.databases_skipped), (1, 1));
        assert_eq!(summary.upload_details[0].skip_reason, Some(SkipReason::Panic));
        assert_eq!(summary.total_nomenclature, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_database_times_out_with_the_unit_timeout() {
        let store = MockMetadataStore::with_uploads([
            Upload::new(1, "completed").with_database(1),
            Upload::new(2, "completed").with_database(2),
        ])
        .with_database(1, "/hang.db")
        .with_database(2, "/fine.db");
        let counter = Arc::new(
            MockRecordCounter::default()
                .with_outcome("/hang.db", MockOutcome::Hang)
                .with_outcome("/fine.db", counts(0, 9)),
        );
        let options = ScanOptions { unit_timeout: Duration::from_secs(2), ..ScanOptions::default() };

        let start = Instant::now();
        let summary = scanner(store, counter, options).scan(start + DEADLINE).await.unwrap();
        assert_eq!(summary.upload_details[0].skip_reason, Some(SkipReason::Timeout));
        assert_eq!(summary.total_counterparties, 9);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_ignoring_its_deadline_is_cut_off() {
        let store = MockMetadataStore::with_uploads([
            Upload::new(1, "completed").with_database(1),
            Upload::new(2, "completed").with_database(2),
        ])
        .with_database(1, "/stuck.db")
        .with_database(2, "/fine.db");
        let counter = Arc::new(
            MockRecordCounter::default()
                .with_outcome("/stuck.db", MockOutcome::Stall(Counts { nomenclature: 50, ..Counts::default() }))
                .with_outcome("/fine.db", counts(1, 0)),
        );
        let options = ScanOptions { unit_timeout: Duration::from_secs(2), ..ScanOptions::default() };

        let start = Instant::now();
        let summary = scanner(store, counter, options).scan(start + Duration::from_secs(10)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!((summary.databases_processed, summary.databases_skipped), (1, 1));
        assert_eq!(summary.upload_details[0].skip_reason, Some(SkipReason::Timeout));
        assert_eq!(summary.total_nomenclature, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_units_queued_past_the_deadline_are_not_opened() {
        let store = MockMetadataStore::with_uploads([
            Upload::new(1, "completed").with_database(1),
            Upload::new(2, "completed").with_database(2),
            Upload::new(3, "completed").with_database(3),
        ])
        .with_database(1, "/hang.db")
        .with_database(2, "/b.db")
        .with_database(3, "/c.db");
        let counter = Arc::new(
            MockRecordCounter::default()
                .with_outcome("/hang.db", MockOutcome::Hang)
                .with_outcome("/b.db", counts(1, 1))
                .with_outcome("/c.db", counts(1, 1)),
        );
        let options = ScanOptions { concurrency: 1, unit_timeout: Duration::from_secs(60) };

        let deadline = Instant::now() + Duration::from_secs(3);
        let summary = scanner(store, Arc::clone(&counter), options).scan(deadline).await.unwrap();
        assert_eq!(counter.calls(), 1);
        assert_eq!((summary.databases_processed, summary.databases_skipped), (0, 3));
        assert!(summary.upload_details.iter().all(|d| d.skip_reason == Some(SkipReason::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_derived_fields() {
        let store = MockMetadataStore::with_uploads([
            Upload::new(1, "completed")
                .with_database(1)
                .started_at(datetime!(2025-01-01 10:00 UTC))
                .completed_at(datetime!(2025-01-01 10:10 UTC)),
            Upload::new(2, "in_progress").with_database(1).started_at(datetime!(2025-02-01 08:00 UTC)),
        ])
        .with_database(1, "/shared.db");
        let counter = Arc::new(MockRecordCounter::default().with_outcome("/shared.db", counts(2, 1)));
        let summary = scanner(store, counter, ScanOptions::default()).scan(Instant::now() + DEADLINE).await.unwrap();

        // Two uploads sharing one file: one database, counted once per upload.
        assert_eq!(summary.total_databases, 1);
        assert_eq!(summary.databases_processed, 2);
        assert_eq!(summary.last_activity, Some(datetime!(2025-02-01 08:00 UTC)));
        // Listing order, not completion order.
        assert_eq!(summary.upload_details.iter().map(|d| d.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_store_yields_empty_summary() {
        let counter = Arc::new(MockRecordCounter::default());
        let summary = scanner(MockMetadataStore::default(), Arc::clone(&counter), ScanOptions::default())
            .scan(Instant::now() + DEADLINE)
            .await
            .unwrap();
        assert_eq!(summary, SystemSummary::default());
        assert_eq!(counter.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_store_is_fatal() {
        let store = MockMetadataStore::with_uploads([Upload::new(1, "completed")]);
        store.set_unavailable(true);
        let err = scanner(store, Arc::new(MockRecordCounter::default()), ScanOptions::default())
            .scan(Instant::now() + DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::MetadataUnavailable));
    }
}

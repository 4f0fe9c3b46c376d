//! Persistent record of past scans.

use crate::Database;
use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use fleetscan_scan::{SystemSummary, UploadSummary};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use time::OffsetDateTime;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 1000;

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    scan_time: i64,
    summary_json: String,
    scan_duration_ms: i64,
    success: bool,
    error: Option<String>,
}

/// One stored scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanHistoryEntry {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub scan_time: OffsetDateTime,
    pub summary: SystemSummary,
    pub scan_duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TryFrom<HistoryRow> for ScanHistoryEntry {
    type Error = Error;
    fn try_from(row: HistoryRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            scan_time: OffsetDateTime::from_unix_timestamp(row.scan_time)
                .or_raise(|| ErrorKind::InvalidData("scan time"))?,
            summary: serde_json::from_str(&row.summary_json).or_raise(|| ErrorKind::InvalidData("summary"))?,
            scan_duration_ms: u64::try_from(row.scan_duration_ms).or_raise(|| ErrorKind::InvalidData("scan duration"))?,
            success: row.success,
            error: row.error,
        })
    }
}

/// Differences between two scans, `new` minus `old`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanDiff {
    pub total_databases_change: i64,
    pub total_uploads_change: i64,
    pub completed_uploads_change: i64,
    pub failed_uploads_change: i64,
    pub total_nomenclature_change: i64,
    pub total_counterparties_change: i64,
    /// Uploads present in `new` but not in `old`, matched by UUID.
    pub new_uploads: Vec<UploadSummary>,
    pub new_uploads_count: usize,
}

impl ScanDiff {
    pub fn between(old: &SystemSummary, new: &SystemSummary) -> Self {
        fn delta(old: u64, new: u64) -> i64 {
            (i128::from(new) - i128::from(old)).clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
        }
        let known: HashSet<&str> = old.upload_details.iter().map(|u| u.upload_uuid.as_str()).collect();
        let new_uploads: Vec<UploadSummary> =
            new.upload_details.iter().filter(|u| !known.contains(u.upload_uuid.as_str())).cloned().collect();
        Self {
            total_databases_change: delta(old.total_databases, new.total_databases),
            total_uploads_change: delta(old.total_uploads, new.total_uploads),
            completed_uploads_change: delta(old.completed_uploads, new.completed_uploads),
            failed_uploads_change: delta(old.failed_uploads, new.failed_uploads),
            total_nomenclature_change: delta(old.total_nomenclature, new.total_nomenclature),
            total_counterparties_change: delta(old.total_counterparties, new.total_counterparties),
            new_uploads_count: new_uploads.len(),
            new_uploads,
        }
    }
}

/// Append-only store of scan results.
#[derive(Debug, Clone)]
pub struct HistoryRepository {
    pool: SqlitePool,
}
impl From<&Database> for HistoryRepository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl HistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record one scan. Pass `error` for a scan that failed.
    pub async fn save(&self, summary: &SystemSummary, error: Option<&str>) -> Result<i64> {
        self.save_at(OffsetDateTime::now_utc(), summary, error).await
    }

    async fn save_at(&self, scan_time: OffsetDateTime, summary: &SystemSummary, error: Option<&str>) -> Result<i64> {
        let json = serde_json::to_string(summary).or_raise(|| ErrorKind::InvalidData("summary"))?;
        let duration = i64::try_from(summary.scan_duration_ms).or_raise(|| ErrorKind::InvalidData("scan duration"))?;
        let id: i64 = sqlx::query_scalar(include_str!("../queries/insert_scan.sql"))
            .bind(scan_time.unix_timestamp())
            .bind(json)
            .bind(duration)
            .bind(error.is_none())
            .bind(error)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tracing::debug!(id, "Saved scan to history");
        Ok(id)
    }

    /// Newest scans first. `limit` is clamped to `1..=MAX_LIMIT`; `None`
    /// means [`DEFAULT_LIMIT`]. Rows that can no longer be decoded are skipped.
    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<ScanHistoryEntry>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let rows: Vec<HistoryRow> = sqlx::query_as(include_str!("../queries/list_history.sql"))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                ScanHistoryEntry::try_from(row)
                    .inspect_err(|err| tracing::warn!(id, error = ?err, "Skipping undecodable history entry"))
                    .ok()
            })
            .collect())
    }

    pub async fn last(&self) -> Result<Option<ScanHistoryEntry>> {
        Ok(self.history(Some(1)).await?.into_iter().next())
    }

    pub async fn get(&self, id: i64) -> Result<Option<ScanHistoryEntry>> {
        let row: Option<HistoryRow> = sqlx::query_as(include_str!("../queries/get_scan.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(ScanHistoryEntry::try_from).transpose()
    }
}

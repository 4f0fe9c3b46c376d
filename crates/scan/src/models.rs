use derive_more::Display;
use fleetscan_metadata::{Upload, UploadStatus};
use fleetscan_probe::error::ErrorKind as ProbeErrorKind;
use fleetscan_probe::{Counts, ExportFileName};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Why an upload's database could not be counted during a scan.
///
/// A skip never changes the upload's own [`UploadStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The upload references a database the catalog doesn't know.
    #[display("unresolved")]
    Unresolved,
    #[display("file-not-found")]
    FileNotFound,
    #[display("timeout")]
    Timeout,
    #[display("connection")]
    Connection,
    #[display("corrupt")]
    Corrupt,
    /// The counting task itself blew up.
    #[display("panic")]
    Panic,
}
impl From<&ProbeErrorKind> for SkipReason {
    fn from(kind: &ProbeErrorKind) -> Self {
        match kind {
            ProbeErrorKind::FileNotFound(_) => Self::FileNotFound,
            ProbeErrorKind::Timeout => Self::Timeout,
            ProbeErrorKind::ConnectionFailure => Self::Connection,
            ProbeErrorKind::Corrupt => Self::Corrupt,
        }
    }
}

/// Per-upload row of a [`SystemSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub id: i64,
    pub upload_uuid: String,
    pub name: String,
    pub status: UploadStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub database_id: Option<i64>,
    pub database_file: Option<PathBuf>,
    pub database_size: u64,
    pub display_name: Option<String>,
    pub nomenclature_count: u64,
    pub counterparty_count: u64,
    pub client_id: Option<i64>,
    pub project_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

impl UploadSummary {
    pub(crate) fn attach_database(&mut self, path: &Path) {
        self.database_file = Some(path.to_path_buf());
        self.display_name = Some(ExportFileName::from_path(path).display_name);
    }

    pub(crate) fn record_counts(&mut self, counts: Counts) {
        self.nomenclature_count = counts.nomenclature;
        self.counterparty_count = counts.counterparties;
        self.database_size = counts.file_size;
    }
}

impl From<&Upload> for UploadSummary {
    fn from(upload: &Upload) -> Self {
        Self {
            id: upload.id,
            upload_uuid: upload.uuid.clone(),
            name: upload.name.clone(),
            status: upload.status.clone(),
            created_at: upload.started_at,
            completed_at: upload.completed_at,
            database_id: upload.database_id,
            database_file: None,
            database_size: 0,
            display_name: None,
            nomenclature_count: 0,
            counterparty_count: 0,
            client_id: upload.client_id,
            project_id: upload.project_id,
            skip_reason: None,
        }
    }
}

/// Fleet-wide snapshot produced by one scan.
///
/// Treated as immutable once published; consumers that need a different view
/// (filters, exports) derive a new value instead of editing this one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSummary {
    /// Distinct database files referenced by the listed uploads.
    pub total_databases: u64,
    pub total_uploads: u64,
    pub completed_uploads: u64,
    pub failed_uploads: u64,
    pub in_progress_uploads: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_activity: Option<OffsetDateTime>,
    pub total_nomenclature: u64,
    pub total_counterparties: u64,
    pub databases_processed: u64,
    pub databases_skipped: u64,
    pub scan_duration_ms: u64,
    pub upload_details: Vec<UploadSummary>,
}

impl SystemSummary {
    /// Recount the upload status totals from `upload_details`.
    pub(crate) fn tally_statuses(&mut self) {
        self.total_uploads = self.upload_details.len() as u64;
        self.completed_uploads = 0;
        self.failed_uploads = 0;
        self.in_progress_uploads = 0;
        for detail in &self.upload_details {
            match detail.status {
                UploadStatus::Completed => self.completed_uploads += 1,
                UploadStatus::Failed => self.failed_uploads += 1,
                UploadStatus::InProgress => self.in_progress_uploads += 1,
                UploadStatus::Other(_) => {},
            }
        }
    }

    /// Recount entity totals from `upload_details`.
    pub(crate) fn tally_entities(&mut self) {
        self.total_nomenclature = self.upload_details.iter().map(|d| d.nomenclature_count).sum();
        self.total_counterparties = self.upload_details.iter().map(|d| d.counterparty_count).sum();
    }
}

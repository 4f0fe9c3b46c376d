//! Static renderings of a [`SystemSummary`].

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use fleetscan_scan::SystemSummary;
use std::str::FromStr;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

const HEADER: [&str; 14] = [
    "ID",
    "UUID",
    "Name",
    "Status",
    "Created At",
    "Completed At",
    "Database File",
    "Database Size",
    "Display Name",
    "Nomenclature",
    "Counterparties",
    "Client ID",
    "Project ID",
    "Skip Reason",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    /// Attachment name, e.g. `system_summary_20250101_120000.csv`.
    pub fn file_name(self, at: OffsetDateTime) -> String {
        let stamp = at
            .format(format_description!("[year][month][day]_[hour][minute][second]"))
            .unwrap_or_else(|_| at.unix_timestamp().to_string());
        format!("system_summary_{stamp}.{}", self.extension())
    }

    pub fn render(self, summary: &SystemSummary) -> Result<Vec<u8>> {
        match self {
            Self::Csv => to_csv(summary),
            Self::Json => to_json(summary).map(String::into_bytes),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = crate::error::Error;
    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(exn::Exn::from(ErrorKind::UnsupportedFormat(other.to_string()))),
        }
    }
}

fn timestamp(at: Option<OffsetDateTime>) -> String {
    at.and_then(|at| at.format(&Rfc3339).ok()).unwrap_or_default()
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// One row per upload, then a blank line and a two-column block of fleet
/// totals.
pub fn to_csv(summary: &SystemSummary) -> Result<Vec<u8>> {
    // The totals block has fewer columns than the upload table.
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
    writer.write_record(HEADER).or_raise(|| ErrorKind::Render)?;
    for upload in &summary.upload_details {
        writer
            .write_record([
                upload.id.to_string(),
                upload.upload_uuid.clone(),
                upload.name.clone(),
                upload.status.to_string(),
                timestamp(upload.created_at),
                timestamp(upload.completed_at),
                optional(upload.database_file.as_ref().map(|path| path.display())),
                upload.database_size.to_string(),
                upload.display_name.clone().unwrap_or_default(),
                upload.nomenclature_count.to_string(),
                upload.counterparty_count.to_string(),
                optional(upload.client_id),
                optional(upload.project_id),
                optional(upload.skip_reason),
            ])
            .or_raise(|| ErrorKind::Render)?;
    }

    writer.write_record([""]).or_raise(|| ErrorKind::Render)?;
    let totals: [(&str, String); 12] = [
        ("Total Databases", summary.total_databases.to_string()),
        ("Total Uploads", summary.total_uploads.to_string()),
        ("Completed Uploads", summary.completed_uploads.to_string()),
        ("Failed Uploads", summary.failed_uploads.to_string()),
        ("In Progress Uploads", summary.in_progress_uploads.to_string()),
        ("Total Nomenclature", summary.total_nomenclature.to_string()),
        ("Total Counterparties", summary.total_counterparties.to_string()),
        ("Databases Processed", summary.databases_processed.to_string()),
        ("Databases Skipped", summary.databases_skipped.to_string()),
        ("Last Activity", timestamp(summary.last_activity)),
        ("Scan Duration (ms)", summary.scan_duration_ms.to_string()),
        ("Generated At", timestamp(Some(OffsetDateTime::now_utc()))),
    ];
    writer.write_record(["Summary", ""]).or_raise(|| ErrorKind::Render)?;
    for (label, value) in totals {
        writer.write_record([label, value.as_str()]).or_raise(|| ErrorKind::Render)?;
    }
    writer.into_inner().map_err(|err| err.into_error()).or_raise(|| ErrorKind::Render)
}

/// Indented JSON.
pub fn to_json(summary: &SystemSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).or_raise(|| ErrorKind::Render)
}

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Processing outcome recorded for an upload by the import pipeline.
///
/// This is the upload's own status; it says nothing about whether the
/// database file behind it can be scanned right now.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UploadStatus {
    Completed,
    Failed,
    InProgress,
    /// Anything the pipeline may write that this crate doesn't know about.
    Other(String),
}
impl UploadStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::InProgress => "in_progress",
            Self::Other(other) => other,
        }
    }
}
impl From<String> for UploadStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "in_progress" => Self::InProgress,
            _ => Self::Other(value),
        }
    }
}
impl From<&str> for UploadStatus {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}
impl From<UploadStatus> for String {
    fn from(status: UploadStatus) -> Self {
        status.as_str().to_string()
    }
}
impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered upload (export) as listed by the metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub id: i64,
    pub uuid: String,
    /// Name of the export configuration the upload was produced by.
    pub name: String,
    pub status: UploadStatus,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    /// Reference into the project database catalog; resolve it to a file path
    /// with [`MetadataStore::resolve_database_path`](crate::MetadataStore::resolve_database_path).
    pub database_id: Option<i64>,
    pub client_id: Option<i64>,
    pub project_id: Option<i64>,
}

impl Upload {
    /// Minimal upload, mostly for building fixtures.
    pub fn new(id: i64, status: impl Into<UploadStatus>) -> Self {
        Self {
            id,
            uuid: format!("upload-{id}"),
            name: format!("Upload {id}"),
            status: status.into(),
            started_at: None,
            completed_at: None,
            database_id: None,
            client_id: None,
            project_id: None,
        }
    }

    pub fn with_database(mut self, database_id: i64) -> Self {
        self.database_id = Some(database_id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn started_at(mut self, at: OffsetDateTime) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: OffsetDateTime) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn owned_by(mut self, client_id: i64, project_id: i64) -> Self {
        self.client_id = Some(client_id);
        self.project_id = Some(project_id);
        self
    }

    /// Most recent of the start and completion times.
    pub fn last_activity(&self) -> Option<OffsetDateTime> {
        self.started_at.max(self.completed_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    #[rstest]
    #[case("completed", UploadStatus::Completed)]
    #[case("failed", UploadStatus::Failed)]
    #[case("in_progress", UploadStatus::InProgress)]
    #[case("queued", UploadStatus::Other("queued".to_string()))]
    fn test_status_from_string(#[case] raw: &str, #[case] expected: UploadStatus) {
        assert_eq!(UploadStatus::from(raw), expected);
        assert_eq!(expected.as_str(), raw);
    }

    #[test]
    fn test_status_serializes_as_plain_string() {
        let json = serde_json::to_string(&UploadStatus::InProgress).unwrap();
        assert_eq!(json, r#""in_progress""#);
        let back: UploadStatus = serde_json::from_str(r#""weird""#).unwrap();
        assert_eq!(back, UploadStatus::Other("weird".to_string()));
    }

    #[test]
    fn test_last_activity_prefers_the_later_timestamp() {
        let upload = Upload::new(1, "completed")
            .started_at(datetime!(2025-01-01 10:00 UTC))
            .completed_at(datetime!(2025-01-01 11:30 UTC));
        assert_eq!(upload.last_activity(), Some(datetime!(2025-01-01 11:30 UTC)));
        assert_eq!(Upload::new(2, "failed").last_activity(), None);
    }
}

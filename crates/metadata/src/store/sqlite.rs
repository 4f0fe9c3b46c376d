//! SQLite-backed metadata store.
//!
//! The upload registry and the project database catalog live in two separate
//! database files owned by other services. Both are opened read-only; this
//! crate never migrates or writes them. Expected tables:
//!
//! - `uploads`: `id`, `upload_uuid`, `config_name`, `status`, `started_at`,
//!   `completed_at`, `database_id`, `client_id`, `project_id`
//! - `project_databases`: `id`, `file_path`

use crate::error::{ErrorKind, Result};
use crate::models::{Upload, UploadStatus};
use crate::store::MetadataStore;
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::instrument;

const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(sqlx::FromRow)]
struct UploadRow {
    id: i64,
    upload_uuid: String,
    config_name: Option<String>,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    database_id: Option<i64>,
    client_id: Option<i64>,
    project_id: Option<i64>,
}

impl From<UploadRow> for Upload {
    fn from(row: UploadRow) -> Self {
        Upload {
            started_at: parse_timestamp(row.id, row.started_at.as_deref()),
            completed_at: parse_timestamp(row.id, row.completed_at.as_deref()),
            id: row.id,
            uuid: row.upload_uuid,
            name: row.config_name.unwrap_or_default(),
            status: UploadStatus::from(row.status),
            database_id: row.database_id,
            client_id: row.client_id,
            project_id: row.project_id,
        }
    }
}

/// Accepts RFC 3339 as well as SQLite's own `CURRENT_TIMESTAMP` format
/// (assumed UTC). Anything else is logged and treated as unknown rather than
/// failing the whole listing.
fn parse_timestamp(upload_id: i64, raw: Option<&str>) -> Option<OffsetDateTime> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(parsed);
    }
    let sqlite = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let sqlite_subsecond = format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]");
    match PrimitiveDateTime::parse(raw, sqlite).or_else(|_| PrimitiveDateTime::parse(raw, sqlite_subsecond)) {
        Ok(parsed) => Some(parsed.assume_utc()),
        Err(_) => {
            tracing::warn!(upload_id, value = raw, "Unrecognised timestamp format in upload registry");
            None
        },
    }
}

/// Metadata store reading two SQLite files: the upload registry and the
/// service database holding the project database catalog.
///
/// Both may be the same file.
#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    uploads: SqlitePool,
    service: SqlitePool,
}

impl SqliteMetadataStore {
    pub async fn connect(uploads_db: impl AsRef<Path>, service_db: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            uploads: Self::open(uploads_db.as_ref()).await?,
            service: Self::open(service_db.as_ref()).await?,
        })
    }

    async fn open(path: &Path) -> Result<SqlitePool> {
        // Without this check SQLite reports a generic "unable to open" error.
        if !path.is_file() {
            return Err(exn::Exn::from(ErrorKind::NotFound(path.to_path_buf())));
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false)
            .busy_timeout(BUSY_TIMEOUT);
        SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    pub async fn close(&self) {
        self.uploads.close().await;
        self.service.close().await;
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    #[instrument(level = "debug", skip(self))]
    async fn list_uploads(&self) -> Result<Vec<Upload>> {
        let rows: Vec<UploadRow> = sqlx::query_as(include_str!("../../queries/list_uploads.sql"))
            .fetch_all(&self.uploads)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(Upload::from).collect())
    }

    #[instrument(level = "debug", skip(self))]
    async fn resolve_database_path(&self, database_id: i64) -> Result<Option<PathBuf>> {
        let row: Option<(String,)> = sqlx::query_as(include_str!("../../queries/resolve_database_path.sql"))
            .bind(database_id)
            .fetch_optional(&self.service)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(|(path,)| PathBuf::from(path)))
    }

    #[instrument(level = "debug", skip(self, database_ids), fields(count = database_ids.len()))]
    async fn resolve_database_paths(&self, database_ids: &[i64]) -> Result<HashMap<i64, PathBuf>> {
        if database_ids.is_empty() {
            return Ok(HashMap::new());
        }
        // One round trip regardless of the number of references.
        let ids = serde_json::to_string(database_ids).or_raise(|| ErrorKind::InvalidData("database id list"))?;
        let rows: Vec<(i64, String)> = sqlx::query_as(include_str!("../../queries/resolve_database_paths.sql"))
            .bind(ids)
            .fetch_all(&self.service)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(|(id, path)| (id, PathBuf::from(path))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::{ConnectOptions, Connection};
    use tempfile::TempDir;
    use time::macros::datetime;

    async fn fixture(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("metadata.db");
        let options = SqliteConnectOptions::new().filename(&path).create_if_missing(true);
        let mut conn = options.connect().await.unwrap();
        for sql in [
            "CREATE TABLE uploads (
                id INTEGER PRIMARY KEY, upload_uuid TEXT NOT NULL, config_name TEXT, status TEXT NOT NULL,
                started_at TEXT, completed_at TEXT, database_id INTEGER, client_id INTEGER, project_id INTEGER
            )",
            "CREATE TABLE project_databases (id INTEGER PRIMARY KEY, client_project_id INTEGER, file_path TEXT NOT NULL)",
            "INSERT INTO uploads VALUES
                (1, 'u-1', 'ERPWE', 'completed', '2025-03-01T10:00:00Z', '2025-03-01 10:05:00', 10, 3, 4),
                (2, 'u-2', NULL, 'in_progress', '2025-03-02 08:00:00.250', NULL, NULL, NULL, NULL),
                (3, 'u-3', 'Broken', 'queued', 'yesterday', '', 99, NULL, NULL)",
            "INSERT INTO project_databases VALUES (10, 1, '/srv/db/10.db'), (11, 1, '/srv/db/11.db')",
        ] {
            sqlx::query(sql).execute(&mut conn).await.unwrap();
        }
        conn.close().await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_list_uploads_maps_rows() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir).await;
        let store = SqliteMetadataStore::connect(&path, &path).await.unwrap();

        let uploads = store.list_uploads().await.unwrap();
        assert_eq!(uploads.len(), 3);

        let first = &uploads[0];
        assert_eq!(first.uuid, "u-1");
        assert_eq!(first.name, "ERPWE");
        assert_eq!(first.status, UploadStatus::Completed);
        assert_eq!(first.started_at, Some(datetime!(2025-03-01 10:00 UTC)));
        assert_eq!(first.completed_at, Some(datetime!(2025-03-01 10:05 UTC)));
        assert_eq!((first.database_id, first.client_id, first.project_id), (Some(10), Some(3), Some(4)));

        let second = &uploads[1];
        assert_eq!(second.name, "");
        assert_eq!(second.status, UploadStatus::InProgress);
        assert_eq!(second.started_at, Some(datetime!(2025-03-02 08:00:00.25 UTC)));
        assert_eq!(second.database_id, None);

        // Unparseable timestamps degrade to "unknown".
        let third = &uploads[2];
        assert_eq!(third.status, UploadStatus::Other("queued".to_string()));
        assert_eq!((third.started_at, third.completed_at), (None, None));
        store.close().await;
    }

    #[tokio::test]
    async fn test_resolve_paths() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir).await;
        let store = SqliteMetadataStore::connect(&path, &path).await.unwrap();

        assert_eq!(store.resolve_database_path(10).await.unwrap(), Some(PathBuf::from("/srv/db/10.db")));
        assert_eq!(store.resolve_database_path(99).await.unwrap(), None);

        let resolved = store.resolve_database_paths(&[10, 11, 99]).await.unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[&11], PathBuf::from("/srv/db/11.db"));
        assert!(store.resolve_database_paths(&[]).await.unwrap().is_empty());
        store.close().await;
    }

    #[tokio::test]
    async fn test_missing_database_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.db");
        let err = SqliteMetadataStore::connect(&missing, &missing).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(path) if path == &missing));
        assert!(!missing.exists());
    }
}

//! In-memory metadata store for testing.

use crate::error::{ErrorKind, Result};
use crate::models::Upload;
use crate::store::MetadataStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// In-memory metadata store for testing.
///
/// Uploads and database paths live behind [`RwLock`]s so fixtures can be
/// changed between scans. [`set_unavailable`](Self::set_unavailable) makes
/// every call fail, which is how tests exercise a dead metadata database.
///
/// # Examples
///
/// ```
/// use fleetscan_metadata::{MetadataStore, MockMetadataStore, Upload};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MockMetadataStore::with_uploads([Upload::new(1, "completed").with_database(7)])
///     .with_database(7, "/data/7.db");
/// assert_eq!(store.list_uploads().await?.len(), 1);
/// assert!(store.resolve_database_path(7).await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockMetadataStore {
    uploads: RwLock<Vec<Upload>>,
    databases: RwLock<HashMap<i64, PathBuf>>,
    unavailable: AtomicBool,
}

impl MockMetadataStore {
    pub fn with_uploads(uploads: impl IntoIterator<Item = Upload>) -> Self {
        Self {
            uploads: RwLock::new(uploads.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Register a database file under `database_id`.
    pub fn with_database(mut self, database_id: i64, path: impl Into<PathBuf>) -> Self {
        self.databases.get_mut().insert(database_id, path.into());
        self
    }

    pub async fn push(&self, upload: Upload) {
        self.uploads.write().await.push(upload);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(exn::Exn::from(ErrorKind::Unavailable));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MockMetadataStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_uploads(&self) -> Result<Vec<Upload>> {
        self.check_available()?;
        Ok(self.uploads.read().await.clone())
    }

    async fn resolve_database_path(&self, database_id: i64) -> Result<Option<PathBuf>> {
        self.check_available()?;
        Ok(self.databases.read().await.get(&database_id).cloned())
    }
}

//! Metadata store backends.

#[cfg(any(test, feature = "mock"))]
mod mock;
mod sqlite;

#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockMetadataStore;
pub use self::sqlite::SqliteMetadataStore;

use crate::error::Result;
use crate::models::Upload;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

/// Read-only view of the upload registry and the project database catalog.
///
/// Implementations must be safe to share between concurrently running scan
/// units; every method takes `&self`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Every registered upload, in a stable order.
    async fn list_uploads(&self) -> Result<Vec<Upload>>;

    /// Resolve a database reference to the file it lives in.
    ///
    /// Returns `Ok(None)` for a dangling reference; that is a per-upload
    /// problem, not a store failure.
    async fn resolve_database_path(&self, database_id: i64) -> Result<Option<PathBuf>>;

    /// Resolve many references at once. Dangling references are simply absent
    /// from the returned map.
    ///
    /// The default implementation resolves one reference at a time; backends
    /// that can do better should override it.
    async fn resolve_database_paths(&self, database_ids: &[i64]) -> Result<HashMap<i64, PathBuf>> {
        let mut resolved = HashMap::with_capacity(database_ids.len());
        for &id in database_ids {
            if let Some(path) = self.resolve_database_path(id).await? {
                resolved.insert(id, path);
            }
        }
        Ok(resolved)
    }
}

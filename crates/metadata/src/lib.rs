//! Upload registry access.
//!
//! The scanner only ever needs two things from the outside world: the list of
//! registered uploads, and the file path behind each upload's database
//! reference. [`MetadataStore`] is that seam; [`SqliteMetadataStore`] reads the
//! real registry and `MockMetadataStore` (feature `mock`) stands in for it in
//! tests.

pub mod error;
mod models;
pub mod store;

pub use crate::models::{Upload, UploadStatus};
#[cfg(any(test, feature = "mock"))]
pub use crate::store::MockMetadataStore;
pub use crate::store::{MetadataStore, SqliteMetadataStore};

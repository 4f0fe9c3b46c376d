//! Fleet-wide scan of every registered export database.
//!
//! [`Scanner`] lists uploads from a [`MetadataStore`](fleetscan_metadata::MetadataStore),
//! counts each referenced database with a [`RecordCounter`](fleetscan_probe::RecordCounter)
//! under a concurrency limit, and folds the results into one [`SystemSummary`].

pub mod error;
mod filter;
mod models;
mod scanner;

pub use crate::filter::{MAX_LIMIT, SortField, SortOrder, SummaryFilter};
pub use crate::models::{SkipReason, SystemSummary, UploadSummary};
pub use crate::scanner::{ScanOptions, Scanner};

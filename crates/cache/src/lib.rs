//! Summary caching and scan history.
//!
//! [`SummaryCache`] keeps the most recent fleet summary in memory so that
//! readers (HTTP requests, the live stream, exports) never pay for a scan.
//! [`HistoryRepository`] optionally persists every scan to SQLite so changes
//! between scans can be inspected later.

mod db;
pub mod error;
mod history;
mod summary;

pub use crate::db::Database;
pub use crate::history::{DEFAULT_LIMIT, HistoryRepository, MAX_LIMIT, ScanDiff, ScanHistoryEntry};
pub use crate::summary::{CacheStats, DEFAULT_TTL, SummaryCache};

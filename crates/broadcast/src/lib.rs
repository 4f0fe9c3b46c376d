//! Everything observers see of a cached summary without triggering a scan:
//! the live update stream and the CSV/JSON exports.

pub mod error;
mod export;
mod stream;

pub use crate::export::{ExportFormat, to_csv, to_json};
pub use crate::stream::{DEFAULT_INTERVAL, Frame, Intervals, StreamEvent, SummaryTotals, summary_update, updates};

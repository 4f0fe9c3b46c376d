//! Record counting for individual ERP export databases.
//!
//! Export databases come from many ERP installations and many versions of the
//! exporter, so their schema is never guaranteed. This crate answers one
//! question per file ("how many nomenclature items and counterparties does it
//! hold?") by probing which known table layout the file exposes. See
//! [`strategy`] for the layouts and the order they are tried in.

mod counter;
pub mod error;
mod filename;
#[cfg(any(test, feature = "mock"))]
mod mock;
pub mod strategy;

pub use crate::counter::{Counts, RecordCounter, SqliteRecordCounter};
pub use crate::filename::{DataType, ExportFileName};
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::{MockOutcome, MockRecordCounter};

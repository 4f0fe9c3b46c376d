//! Metadata Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A metadata store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for metadata store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The metadata database file itself is missing.
    #[display("metadata database not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    #[display("metadata database error")]
    Database,
    /// A row could not be converted into its model.
    #[display("invalid metadata: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    /// The store is (deliberately) unreachable; used by test doubles.
    #[display("metadata store unavailable")]
    Unavailable,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database | Self::Unavailable)
    }
}

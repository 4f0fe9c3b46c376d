//! Probe Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A probe error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for probe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single database file could not be counted.
///
/// None of these are fatal to a fleet scan; the orchestrator folds every one
/// of them into its skipped counter.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ErrorKind {
    /// The database file does not exist (anymore).
    #[display("database file not found: {}", _0.display())]
    FileNotFound(#[error(not(source))] PathBuf),
    /// The deadline passed before the file could be opened or counted.
    #[display("database probe timed out")]
    Timeout,
    /// The file exists but a connection could not be established.
    #[display("could not connect to database")]
    ConnectionFailure,
    /// A connection was established but the file cannot be read as SQLite.
    #[display("database file is unreadable")]
    Corrupt,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionFailure)
    }
}

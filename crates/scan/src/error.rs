//! Scan Error Types
//!
//! Only failures that prevent a scan from producing any summary at all live
//! here. Per-upload problems are folded into the summary as skips.

use derive_more::{Display, Error};

/// A scan error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for scan operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The metadata store could not list uploads or resolve their databases.
    #[display("metadata store unavailable")]
    MetadataUnavailable,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MetadataUnavailable)
    }
}

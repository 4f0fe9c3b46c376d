//! Application Error Types
//!
//! Failures that stop the server or the one-shot scan from starting or
//! finishing. Request-level failures are mapped to HTTP responses by
//! [`ApiError`](crate::api::ApiError) instead.

use derive_more::{Display, Error};
use std::net::SocketAddr;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("could not open the upload registry")]
    Metadata,
    #[display("could not open the scan history database")]
    History,
    #[display("could not listen on {_0}")]
    Bind(#[error(not(source))] SocketAddr),
    #[display("server error")]
    Serve,
    #[display("scan failed")]
    Scan,
    #[display("failed to write export")]
    Export,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Bind(_) | Self::Scan)
    }
}

//! Fleet-wide record scanner for ERP export databases, served over HTTP.
//!
//! The heavy lifting lives in the workspace crates; this crate wires them to
//! configuration and an axum router.

mod api;
pub mod error;
mod server;
mod state;

pub use crate::api::ApiError;
pub use crate::server::{router, serve};
pub use crate::state::{AppState, Services};

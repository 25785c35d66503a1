//! HTTP API server for the depot upload service.
//!
//! This crate provides the synchronous upload surface:
//! - Multipart upload with single-pass hashing and dedup
//! - Object retrieval, deletion and listing
//! - Private-key authentication on every endpoint

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;

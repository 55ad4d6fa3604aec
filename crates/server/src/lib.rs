//! HTTP service and file lifecycle engine for trove.
//!
//! This crate provides:
//! - Streaming and resumable uploads with per-user deduplication
//! - Folder namespace, trash and reference-counted reclamation
//! - Upload worker pool and background sweepers
//! - Authentication, admin endpoints and Prometheus metrics

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod metrics;
pub mod password;
pub mod routes;
pub mod state;

pub use auth::{Principal, TraceId};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

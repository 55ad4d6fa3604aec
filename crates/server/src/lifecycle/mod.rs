//! File lifecycle engine.
//!
//! Everything between an HTTP request and the index/backend pair lives here:
//! - Streaming ingest and the upload worker pool
//! - The resumable chunked upload protocol
//! - Folder namespace operations, trash and reclamation
//! - Background sweepers for trash retention and upload sessions
//!
//! Handlers stay thin; they translate requests into calls on this module.

pub mod chunked;
pub mod ingest;
pub mod namespace;
pub mod quota;
pub mod sweeper;
pub mod temp;
pub mod trash;
pub mod workers;

pub use ingest::{IngestOutcome, IngestDisposition};
pub use temp::TempArea;
pub use workers::{UploadJob, UploadQueue, WorkerPool};

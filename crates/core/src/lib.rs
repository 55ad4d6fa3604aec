//! Core domain types and shared logic for the trove file store.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Logical path and display-name rules
//! - Content hashing
//! - File and upload-session status lifecycles
//! - Upload-session wire types
//! - Application configuration

pub mod config;
pub mod error;
pub mod file;
pub mod hash;
pub mod path;
pub mod upload;

pub use error::{Error, Result};
pub use file::{FileStatus, MAX_ERROR_MESSAGE_CHARS, truncate_error_message};
pub use hash::{ContentHash, ContentHasher};
pub use path::{
    MAX_SEGMENT_LEN, escape_like, sanitize_filename, sanitize_folder_name, sanitize_logical_path,
};
pub use upload::{SessionStatus, UploadId};

/// Default MIME type when the client does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Name of the per-process temp area under the OS temp directory.
pub const TEMP_ROOT_NAME: &str = "trove-uploads";

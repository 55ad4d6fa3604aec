//! Metadata store abstraction and implementations for trove.
//!
//! This crate provides the relational index behind the file lifecycle:
//! - Users and their quota counters
//! - File rows, explicit folders and the trash
//! - Resumable upload sessions and chunk tracking
//! - Bearer tokens and the bootstrap marker

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use trove_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            tracing::info!(path = %path.display(), "Opening SQLite metadata store");
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}

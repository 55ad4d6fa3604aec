//! Application state shared across handlers.

use crate::lifecycle::{TempArea, UploadQueue};
use std::sync::Arc;
use trove_core::config::AppConfig;
use trove_metadata::MetadataStore;
use trove_storage::ObjectStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Sending half of the upload worker queue.
    pub uploads: UploadQueue,
    /// Local staging area for upload bytes.
    pub temp: TempArea,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        uploads: UploadQueue,
    ) -> Self {
        let temp = TempArea::new(config.server.temp_root());
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            uploads,
            temp,
        }
    }
}

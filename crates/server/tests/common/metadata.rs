//! Metadata store test utilities.

use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use trove_core::FileStatus;
use trove_metadata::models::{FileRow, FolderRow, UserRow};
use trove_metadata::{MetadataResult, MetadataStore, SqliteStore};
use uuid::Uuid;

/// A test metadata store wrapper that cleans up on drop.
#[allow(dead_code)]
pub struct TestMetadata {
    pub store: Arc<dyn MetadataStore>,
    pub(crate) sqlite_store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestMetadata {
    /// Create a new test metadata store backed by a SQLite file.
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let store = Arc::new(SqliteStore::new(&db_path).await?);

        Ok(Self {
            store: store.clone(),
            sqlite_store: store,
            _temp_dir: temp_dir,
        })
    }

    /// Get a reference to the metadata store.
    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    /// Get a reference to the SQLite connection pool for raw queries.
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite_store.pool()
    }
}

/// Build a user row with the given quota.
#[allow(dead_code)]
pub fn test_user(username: &str, storage_quota: i64) -> UserRow {
    let now = OffsetDateTime::now_utc();
    UserRow {
        user_id: Uuid::new_v4(),
        username: username.to_string(),
        email: format!("{username}@example.com"),
        password_hash: "!".to_string(),
        is_admin: false,
        storage_quota,
        storage_used: 0,
        retention_days: None,
        created_at: now,
        updated_at: now,
    }
}

/// Build a completed file row in `logical_path`.
#[allow(dead_code)]
pub fn test_file(user_id: Uuid, logical_path: &str, filename: &str, size: i64) -> FileRow {
    let now = OffsetDateTime::now_utc();
    let file_id = Uuid::new_v4();
    FileRow {
        file_id,
        user_id,
        storage_path: format!("ab/{file_id}.bin"),
        logical_path: logical_path.to_string(),
        filename: filename.to_string(),
        original_filename: filename.to_string(),
        file_size: size,
        mime_type: "text/plain".to_string(),
        hash: format!("{:064x}", file_id.as_u128()),
        upload_status: FileStatus::Completed.as_str().to_string(),
        error_message: None,
        temp_path: None,
        trashed_at: None,
        original_logical_path: None,
        trashed_with: None,
        created_at: now,
        updated_at: now,
    }
}

/// Build a folder row.
#[allow(dead_code)]
pub fn test_folder(user_id: Uuid, folder_path: &str) -> FolderRow {
    let now = OffsetDateTime::now_utc();
    FolderRow {
        folder_id: Uuid::new_v4(),
        user_id,
        folder_path: folder_path.to_string(),
        trashed_at: None,
        original_folder_path: None,
        trashed_with: None,
        created_at: now,
        updated_at: now,
    }
}

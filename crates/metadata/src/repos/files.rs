//! File repository.

use crate::error::MetadataResult;
use crate::models::FileRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Outcome of removing a file row.
#[derive(Debug, Clone)]
pub struct Reclaim {
    /// The row as it was before deletion.
    pub file: FileRow,
    /// Rows of the same user still pointing at `file.storage_path`.
    pub remaining_refs: i64,
}

impl Reclaim {
    /// Whether the backend object lost its last reference.
    pub fn is_last_reference(&self) -> bool {
        self.remaining_refs == 0
    }
}

/// Repository for file rows.
///
/// "Live" means `trashed_at IS NULL`. Display names are unique per
/// (user, logical_path) among live rows; inserts and renames that would break
/// that fail with `AlreadyExists`.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a file row.
    async fn create_file(&self, file: &FileRow) -> MetadataResult<()>;

    /// Get a file by ID, trashed or not.
    async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>>;

    /// Live files directly inside `logical_path`, ordered by name.
    async fn list_files_in_folder(
        &self,
        user_id: Uuid,
        logical_path: &str,
    ) -> MetadataResult<Vec<FileRow>>;

    /// Whether a live file named `filename` exists in `logical_path`.
    async fn file_name_exists(
        &self,
        user_id: Uuid,
        logical_path: &str,
        filename: &str,
    ) -> MetadataResult<bool>;

    /// Whether any live file sits at `path` or below it (implicit folder test).
    async fn has_files_under(&self, user_id: Uuid, path: &str) -> MetadataResult<bool>;

    /// Distinct `logical_path`s of live files strictly below `path`.
    async fn list_descendant_file_paths(
        &self,
        user_id: Uuid,
        path: &str,
    ) -> MetadataResult<Vec<String>>;

    /// A completed file of this user with `hash`, other than `exclude`.
    async fn find_completed_by_hash(
        &self,
        user_id: Uuid,
        hash: &str,
        exclude: Option<Uuid>,
    ) -> MetadataResult<Option<FileRow>>;

    /// Move a `pending` row to `uploading`. Returns `false` if it was not pending.
    async fn mark_uploading(&self, file_id: Uuid, updated_at: OffsetDateTime)
    -> MetadataResult<bool>;

    /// Point the row at its stored object and mark it `completed`; clears `temp_path`.
    async fn mark_completed(
        &self,
        file_id: Uuid,
        storage_path: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Mark the row `failed` with a message; clears `temp_path`.
    async fn mark_failed(
        &self,
        file_id: Uuid,
        error_message: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Rename a live file in place.
    async fn rename_file(
        &self,
        file_id: Uuid,
        filename: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Move a live file to another folder.
    async fn move_file(
        &self,
        file_id: Uuid,
        logical_path: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Soft-delete a single live file.
    async fn trash_file(&self, file_id: Uuid, trashed_at: OffsetDateTime) -> MetadataResult<()>;

    /// Bring a trashed file back into `logical_path`.
    async fn restore_file(
        &self,
        file_id: Uuid,
        logical_path: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete a row and count the user's remaining references to its object,
    /// atomically. `None` when the row is already gone.
    async fn delete_file_and_count_refs(&self, file_id: Uuid) -> MetadataResult<Option<Reclaim>>;

    /// Trashed files that are trash roots (not part of a folder batch).
    async fn list_trash_root_files(&self, user_id: Uuid) -> MetadataResult<Vec<FileRow>>;

    /// Trashed files, for one user or everyone, oldest first.
    async fn list_trashed_files(
        &self,
        user_id: Option<Uuid>,
        limit: u32,
    ) -> MetadataResult<Vec<FileRow>>;

    /// Files trashed together with folder `batch_id`.
    async fn list_files_trashed_with(&self, batch_id: Uuid) -> MetadataResult<Vec<FileRow>>;

    /// Trashed files of a user with `trashed_at < cutoff`, oldest first.
    async fn list_expired_trashed_files(
        &self,
        user_id: Uuid,
        cutoff: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<FileRow>>;

    /// Failed files of a user, newest first.
    async fn list_failed_files(&self, user_id: Uuid) -> MetadataResult<Vec<FileRow>>;

    /// Distinct storage paths referenced by a user's rows.
    async fn list_storage_paths(&self, user_id: Uuid) -> MetadataResult<Vec<String>>;

    /// Mark every `pending` or `uploading` row `failed`. Used at startup, when
    /// no worker can still be holding one. Returns how many rows changed.
    async fn fail_unsettled_files(
        &self,
        error_message: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<u64>;
}

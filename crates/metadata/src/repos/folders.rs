//! Folder repository.

use crate::error::MetadataResult;
use crate::models::FolderRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Rows touched by a subtree cascade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeCount {
    pub folders: u64,
    pub files: u64,
}

/// Repository for explicit folder rows and subtree cascades.
///
/// Cascades bound descendants with `LIKE '{path}/%' ESCAPE '\'` after escaping
/// the path, and run in one transaction.
#[async_trait]
pub trait FolderRepo: Send + Sync {
    /// Insert a folder row. A live folder at the same path fails with `AlreadyExists`.
    async fn create_folder(&self, folder: &FolderRow) -> MetadataResult<()>;

    /// Get a folder by ID, trashed or not.
    async fn get_folder(&self, folder_id: Uuid) -> MetadataResult<Option<FolderRow>>;

    /// Live folder at exactly `path`.
    async fn get_folder_by_path(&self, user_id: Uuid, path: &str)
    -> MetadataResult<Option<FolderRow>>;

    /// Live folders strictly below `path`, ordered by path.
    async fn list_descendant_folders(
        &self,
        user_id: Uuid,
        path: &str,
    ) -> MetadataResult<Vec<FolderRow>>;

    /// Rewrite `old_path` to `new_path` on the folder row (if explicit), every live
    /// descendant folder, and every live file at or below it.
    async fn rename_folder_cascade(
        &self,
        user_id: Uuid,
        old_path: &str,
        new_path: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<CascadeCount>;

    /// Hard-delete a folder row.
    async fn delete_folder(&self, folder_id: Uuid) -> MetadataResult<()>;

    /// Soft-delete a live folder and everything live below it as one batch.
    async fn trash_folder_cascade(
        &self,
        folder_id: Uuid,
        trashed_at: OffsetDateTime,
    ) -> MetadataResult<CascadeCount>;

    /// Restore a trashed root folder and its batch to their original paths.
    /// Any live row already occupying one of those paths fails with `AlreadyExists`
    /// and nothing changes.
    async fn restore_folder_cascade(
        &self,
        folder_id: Uuid,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<CascadeCount>;

    /// Hard-delete the folder rows trashed with `folder_id`, then the folder itself.
    async fn purge_folder_batch(&self, folder_id: Uuid) -> MetadataResult<u64>;

    /// Trashed folders that are trash roots.
    async fn list_trash_root_folders(&self, user_id: Uuid) -> MetadataResult<Vec<FolderRow>>;

    /// Trashed root folders, for one user or everyone.
    async fn list_trashed_root_folders_for(
        &self,
        user_id: Option<Uuid>,
    ) -> MetadataResult<Vec<FolderRow>>;

    /// Trashed root folders of a user with `trashed_at < cutoff`.
    async fn list_expired_trashed_folders(
        &self,
        user_id: Uuid,
        cutoff: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<FolderRow>>;
}

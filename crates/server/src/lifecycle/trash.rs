//! Trash, restore and reference-counted reclamation.
//!
//! Soft-deletes never touch the backend or the quota. A permanent delete
//! removes the row and, only when no other row of the same user still points
//! at the object, deletes the object and debits its size.

use crate::error::{ApiError, ApiResult};
use crate::lifecycle::namespace::{folder_exists, owned_file, require_logical_path};
use crate::lifecycle::quota;
use crate::lifecycle::temp::remove_file_logged;
use crate::metrics::{BYTES_RECLAIMED, OBJECTS_RECLAIMED};
use std::path::Path;
use time::OffsetDateTime;
use trove_core::path;
use trove_core::{FileStatus, sanitize_folder_name};
use trove_metadata::models::{FileRow, FolderRow};
use trove_metadata::repos::{CascadeCount, Reclaim};
use trove_metadata::{MetadataError, MetadataStore};
use trove_storage::ObjectStore;
use uuid::Uuid;

/// Rows fetched per page when emptying trash.
const EMPTY_PAGE_SIZE: u32 = 500;

/// Top-level trash entries of a user.
#[derive(Debug, Clone)]
pub struct TrashListing {
    pub files: Vec<FileRow>,
    pub folders: Vec<FolderRow>,
}

/// What an empty-trash run removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmptyTrashReport {
    pub files: u64,
    pub folders: u64,
}

pub async fn list_trash(metadata: &dyn MetadataStore, user_id: Uuid) -> ApiResult<TrashListing> {
    Ok(TrashListing {
        files: metadata.list_trash_root_files(user_id).await?,
        folders: metadata.list_trash_root_folders(user_id).await?,
    })
}

/// Move a live file into the trash.
#[tracing::instrument(skip(metadata), fields(user_id = %user_id, file_id = %file_id))]
pub async fn soft_delete_file(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    file_id: Uuid,
) -> ApiResult<FileRow> {
    let file = owned_file(metadata, user_id, file_id).await?;
    if file.is_trashed() {
        return Err(ApiError::NotFound(format!("file {file_id} not found")));
    }
    metadata
        .trash_file(file_id, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(logical_path = %file.logical_path, filename = %file.filename, "File trashed");
    Ok(file)
}

/// Move folder `name` inside `current` and its whole subtree into the trash.
/// An implicit folder gets a row first so the batch has a root to restore.
#[tracing::instrument(skip(metadata), fields(user_id = %user_id))]
pub async fn soft_delete_folder(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    current: &str,
    name: &str,
) -> ApiResult<CascadeCount> {
    let parent = require_logical_path(current)?;
    let name = sanitize_folder_name(name)?;
    let folder_path = path::join(&parent, &name);

    let folder = match metadata.get_folder_by_path(user_id, &folder_path).await? {
        Some(folder) => folder,
        None => {
            if !metadata.has_files_under(user_id, &folder_path).await? {
                return Err(ApiError::NotFound(format!("folder {folder_path} not found")));
            }
            materialize_folder(metadata, user_id, &folder_path).await?
        }
    };

    let count = metadata
        .trash_folder_cascade(folder.folder_id, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(
        folder_path = %folder_path,
        folders = count.folders,
        files = count.files,
        "Folder trashed"
    );
    Ok(count)
}

async fn materialize_folder(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    folder_path: &str,
) -> ApiResult<FolderRow> {
    let now = OffsetDateTime::now_utc();
    let folder = FolderRow {
        folder_id: Uuid::new_v4(),
        user_id,
        folder_path: folder_path.to_string(),
        trashed_at: None,
        original_folder_path: None,
        trashed_with: None,
        created_at: now,
        updated_at: now,
    };
    match metadata.create_folder(&folder).await {
        Ok(()) => Ok(folder),
        // Lost a race with a concurrent create; use the winner.
        Err(MetadataError::AlreadyExists(_)) => metadata
            .get_folder_by_path(user_id, folder_path)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("folder {folder_path} not found"))),
        Err(e) => Err(e.into()),
    }
}

async fn owned_trashed_file(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    file_id: Uuid,
) -> ApiResult<FileRow> {
    let file = owned_file(metadata, user_id, file_id).await?;
    if !file.is_trashed() {
        return Err(ApiError::NotFound(format!("file {file_id} is not in the trash")));
    }
    Ok(file)
}

async fn owned_trashed_folder(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    folder_id: Uuid,
) -> ApiResult<FolderRow> {
    metadata
        .get_folder(folder_id)
        .await?
        .filter(|f| f.user_id == user_id && f.trashed_at.is_some() && f.trashed_with.is_none())
        .ok_or_else(|| ApiError::NotFound(format!("folder {folder_id} is not in the trash")))
}

/// Bring a trashed file back. Its folder is used if it still exists, else the root.
#[tracing::instrument(skip(metadata), fields(user_id = %user_id, file_id = %file_id))]
pub async fn restore_file(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    file_id: Uuid,
) -> ApiResult<FileRow> {
    let mut file = owned_trashed_file(metadata, user_id, file_id).await?;
    let original = file
        .original_logical_path
        .clone()
        .unwrap_or_else(|| file.logical_path.clone());
    let target = if folder_exists(metadata, user_id, &original).await? {
        original
    } else {
        "/".to_string()
    };

    if metadata
        .file_name_exists(user_id, &target, &file.filename)
        .await?
    {
        return Err(ApiError::Conflict(format!(
            "a file named '{}' already exists in {target}",
            file.filename
        )));
    }

    metadata
        .restore_file(file_id, &target, OffsetDateTime::now_utc())
        .await
        .map_err(|e| match e {
            MetadataError::AlreadyExists(_) => ApiError::Conflict(format!(
                "a file named '{}' already exists in {target}",
                file.filename
            )),
            other => other.into(),
        })?;
    tracing::info!(logical_path = %target, filename = %file.filename, "File restored");

    file.logical_path = target;
    file.trashed_at = None;
    file.original_logical_path = None;
    file.trashed_with = None;
    Ok(file)
}

/// Restore a trashed folder with the batch trashed alongside it.
#[tracing::instrument(skip(metadata), fields(user_id = %user_id, folder_id = %folder_id))]
pub async fn restore_folder(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    folder_id: Uuid,
) -> ApiResult<CascadeCount> {
    let folder = owned_trashed_folder(metadata, user_id, folder_id).await?;
    let original = folder
        .original_folder_path
        .clone()
        .unwrap_or_else(|| folder.folder_path.clone());

    let count = metadata
        .restore_folder_cascade(folder_id, OffsetDateTime::now_utc())
        .await
        .map_err(|e| match e {
            MetadataError::AlreadyExists(what) => ApiError::Conflict(format!(
                "cannot restore {original}: {what} already exists"
            )),
            other => other.into(),
        })?;
    tracing::info!(
        folder_path = %original,
        folders = count.folders,
        files = count.files,
        "Folder restored"
    );
    Ok(count)
}

/// Remove a file row and reclaim its object if this was the last reference.
///
/// Returns `None` if the row was already gone.
pub async fn reclaim_file(
    metadata: &dyn MetadataStore,
    storage: &dyn ObjectStore,
    file_id: Uuid,
) -> ApiResult<Option<Reclaim>> {
    let Some(reclaim) = metadata.delete_file_and_count_refs(file_id).await? else {
        return Ok(None);
    };
    let file = &reclaim.file;

    if let Some(temp_path) = &file.temp_path {
        remove_file_logged(Path::new(temp_path)).await;
    }

    if reclaim.is_last_reference() {
        // Rows that never completed hold a placeholder key, not an object.
        if file.status()? == FileStatus::Completed {
            match storage.delete(&file.storage_path).await {
                Ok(()) => OBJECTS_RECLAIMED.inc(),
                Err(e) => tracing::warn!(
                    storage_path = %file.storage_path,
                    error = %e,
                    "Failed to delete reclaimed object"
                ),
            }
        }
        quota::debit(metadata, file.user_id, file.file_size).await?;
        BYTES_RECLAIMED.inc_by(u64::try_from(file.file_size).unwrap_or(0));
        tracing::info!(
            file_id = %file.file_id,
            storage_path = %file.storage_path,
            size = file.file_size,
            "Object reclaimed"
        );
    } else {
        tracing::debug!(
            file_id = %file.file_id,
            remaining_refs = reclaim.remaining_refs,
            "Object still referenced, kept"
        );
    }
    Ok(Some(reclaim))
}

/// Permanently delete a trashed file.
#[tracing::instrument(skip(metadata, storage), fields(user_id = %user_id, file_id = %file_id))]
pub async fn permanent_delete_file(
    metadata: &dyn MetadataStore,
    storage: &dyn ObjectStore,
    user_id: Uuid,
    file_id: Uuid,
) -> ApiResult<()> {
    owned_trashed_file(metadata, user_id, file_id).await?;
    reclaim_file(metadata, storage, file_id).await?;
    Ok(())
}

/// Drop a failed row. Its reserved size is always returned to the quota.
/// Failed rows hold a placeholder key, so the backend is not touched.
#[tracing::instrument(skip(metadata), fields(user_id = %user_id, file_id = %file_id))]
pub async fn dismiss_failed(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    file_id: Uuid,
) -> ApiResult<FileRow> {
    let file = owned_file(metadata, user_id, file_id).await?;
    if file.status()? != FileStatus::Failed {
        return Err(ApiError::Conflict(format!("file {file_id} has not failed")));
    }
    let Some(reclaim) = metadata.delete_file_and_count_refs(file_id).await? else {
        return Err(ApiError::NotFound(format!("file {file_id} not found")));
    };
    if let Some(temp_path) = &reclaim.file.temp_path {
        remove_file_logged(Path::new(temp_path)).await;
    }
    quota::debit(metadata, user_id, reclaim.file.file_size).await?;
    tracing::info!(
        filename = %reclaim.file.filename,
        size = reclaim.file.file_size,
        "Failed upload dismissed"
    );
    Ok(reclaim.file)
}

/// Permanently delete a trashed folder and the batch trashed with it.
#[tracing::instrument(skip(metadata, storage), fields(user_id = %user_id, folder_id = %folder_id))]
pub async fn permanent_delete_folder(
    metadata: &dyn MetadataStore,
    storage: &dyn ObjectStore,
    user_id: Uuid,
    folder_id: Uuid,
) -> ApiResult<EmptyTrashReport> {
    owned_trashed_folder(metadata, user_id, folder_id).await?;
    purge_folder(metadata, storage, folder_id).await
}

/// Reclaim a trashed folder's batch files, then hard-delete its folder rows.
pub async fn purge_folder(
    metadata: &dyn MetadataStore,
    storage: &dyn ObjectStore,
    folder_id: Uuid,
) -> ApiResult<EmptyTrashReport> {
    let mut report = EmptyTrashReport::default();
    // Files first: purging the folder rows unlinks the batch.
    for file in metadata.list_files_trashed_with(folder_id).await? {
        if reclaim_file(metadata, storage, file.file_id).await?.is_some() {
            report.files += 1;
        }
    }
    report.folders = metadata.purge_folder_batch(folder_id).await?;
    tracing::info!(
        folder_id = %folder_id,
        files = report.files,
        folders = report.folders,
        "Trashed folder purged"
    );
    Ok(report)
}

/// Permanently delete everything in the trash of one user, or of all users.
#[tracing::instrument(skip(metadata, storage))]
pub async fn empty_trash(
    metadata: &dyn MetadataStore,
    storage: &dyn ObjectStore,
    user_id: Option<Uuid>,
) -> ApiResult<EmptyTrashReport> {
    let mut report = EmptyTrashReport::default();

    loop {
        let page = metadata
            .list_trashed_files(user_id, EMPTY_PAGE_SIZE)
            .await?;
        if page.is_empty() {
            break;
        }
        let mut progressed = false;
        for file in &page {
            if reclaim_file(metadata, storage, file.file_id).await?.is_some() {
                report.files += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    for folder in metadata.list_trashed_root_folders_for(user_id).await? {
        report.folders += metadata.purge_folder_batch(folder.folder_id).await?;
    }

    tracing::info!(files = report.files, folders = report.folders, "Trash emptied");
    Ok(report)
}

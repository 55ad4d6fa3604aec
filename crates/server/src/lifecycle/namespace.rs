//! Logical namespace: display names, folders, file rename and move.
//!
//! Folders are explicit (a folder row) or implicit (some live file sits at or
//! below the path). Either form makes the path a valid navigation target.

use crate::error::{ApiError, ApiResult};
use std::collections::BTreeSet;
use time::OffsetDateTime;
use trove_core::path::{self, MAX_NAME_PROBES, numbered_name, suffixed_name};
use trove_core::{sanitize_filename, sanitize_folder_name, sanitize_logical_path};
use trove_metadata::MetadataStore;
use trove_metadata::models::{FileRow, FolderRow};
use trove_metadata::repos::CascadeCount;
use uuid::Uuid;

/// Sanitize a client folder path, rejecting what the sanitizer refuses.
pub fn require_logical_path(input: &str) -> ApiResult<String> {
    let path = sanitize_logical_path(input);
    if path.is_empty() {
        return Err(ApiError::BadRequest(format!("invalid folder path: {input:?}")));
    }
    Ok(path)
}

/// Pick a display name for `desired` in `folder` that no live file uses.
///
/// Probes `"{stem} (n){ext}"` for n in 1..=10000, then falls back to a random
/// 8-hex suffix. The insert that follows is the authoritative uniqueness check.
pub async fn unique_display_filename(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    folder: &str,
    desired: &str,
) -> ApiResult<String> {
    if !metadata.file_name_exists(user_id, folder, desired).await? {
        return Ok(desired.to_string());
    }
    for n in 1..=MAX_NAME_PROBES {
        let candidate = numbered_name(desired, n);
        if !metadata.file_name_exists(user_id, folder, &candidate).await? {
            return Ok(candidate);
        }
    }
    let suffix = format!("{:08x}", rand::random::<u32>());
    Ok(suffixed_name(desired, &suffix))
}

/// Whether `path` is a valid navigation target for the user.
pub async fn folder_exists(metadata: &dyn MetadataStore, user_id: Uuid, path: &str) -> ApiResult<bool> {
    if path == "/" {
        return Ok(true);
    }
    if metadata.get_folder_by_path(user_id, path).await?.is_some() {
        return Ok(true);
    }
    Ok(metadata.has_files_under(user_id, path).await?)
}

/// Contents of one folder.
#[derive(Debug, Clone)]
pub struct FolderListing {
    pub path: String,
    /// Names of direct subfolders, explicit and implicit, sorted.
    pub folders: Vec<String>,
    pub files: Vec<FileRow>,
}

/// List a folder. Unknown folders are `NotFound`; the root always exists.
#[tracing::instrument(skip(metadata), fields(user_id = %user_id))]
pub async fn list_folder(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    folder: &str,
) -> ApiResult<FolderListing> {
    let path = require_logical_path(folder)?;
    if !folder_exists(metadata, user_id, &path).await? {
        return Err(ApiError::NotFound(format!("folder {path} not found")));
    }

    let mut names = BTreeSet::new();
    let explicit = metadata.list_descendant_folders(user_id, &path).await?;
    let implicit = metadata.list_descendant_file_paths(user_id, &path).await?;
    for descendant in explicit
        .iter()
        .map(|f| f.folder_path.as_str())
        .chain(implicit.iter().map(String::as_str))
    {
        if let Some(name) = direct_child(&path, descendant) {
            names.insert(name.to_string());
        }
    }

    let files = metadata.list_files_in_folder(user_id, &path).await?;
    Ok(FolderListing {
        path,
        folders: names.into_iter().collect(),
        files,
    })
}

/// First segment of `descendant` below `parent`.
fn direct_child<'a>(parent: &str, descendant: &'a str) -> Option<&'a str> {
    let rest = if parent == "/" {
        descendant.strip_prefix('/')?
    } else {
        descendant.strip_prefix(parent)?.strip_prefix('/')?
    };
    rest.split('/').next().filter(|s| !s.is_empty())
}

/// Create an explicit folder `name` inside `current`.
#[tracing::instrument(skip(metadata), fields(user_id = %user_id))]
pub async fn create_folder(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    current: &str,
    name: &str,
) -> ApiResult<FolderRow> {
    let parent = require_logical_path(current)?;
    let name = sanitize_folder_name(name)?;
    if !folder_exists(metadata, user_id, &parent).await? {
        return Err(ApiError::NotFound(format!("folder {parent} not found")));
    }

    let folder_path = path::join(&parent, &name);
    if metadata
        .get_folder_by_path(user_id, &folder_path)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(format!(
            "folder '{name}' already exists"
        )));
    }

    let now = OffsetDateTime::now_utc();
    let folder = FolderRow {
        folder_id: Uuid::new_v4(),
        user_id,
        folder_path,
        trashed_at: None,
        original_folder_path: None,
        trashed_with: None,
        created_at: now,
        updated_at: now,
    };
    metadata.create_folder(&folder).await?;
    tracing::info!(folder_path = %folder.folder_path, "Folder created");
    Ok(folder)
}

/// Rename folder `old_name` inside `current`, carrying its subtree along.
#[tracing::instrument(skip(metadata), fields(user_id = %user_id))]
pub async fn rename_folder(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    current: &str,
    old_name: &str,
    new_name: &str,
) -> ApiResult<CascadeCount> {
    let parent = require_logical_path(current)?;
    let old_name = sanitize_folder_name(old_name)?;
    let new_name = sanitize_folder_name(new_name)?;
    let old_path = path::join(&parent, &old_name);
    let new_path = path::join(&parent, &new_name);

    if !folder_exists(metadata, user_id, &old_path).await? {
        return Err(ApiError::NotFound(format!("folder {old_path} not found")));
    }
    if old_path == new_path {
        return Ok(CascadeCount::default());
    }
    if folder_exists(metadata, user_id, &new_path).await? {
        return Err(ApiError::Conflict(format!(
            "folder '{new_name}' already exists"
        )));
    }

    let count = metadata
        .rename_folder_cascade(user_id, &old_path, &new_path, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(
        old_path = %old_path,
        new_path = %new_path,
        folders = count.folders,
        files = count.files,
        "Folder renamed"
    );
    Ok(count)
}

/// Remove an empty folder. Folders with live content are refused.
#[tracing::instrument(skip(metadata), fields(user_id = %user_id))]
pub async fn delete_folder(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    current: &str,
    name: &str,
) -> ApiResult<()> {
    let parent = require_logical_path(current)?;
    let name = sanitize_folder_name(name)?;
    let folder_path = path::join(&parent, &name);

    if metadata.has_files_under(user_id, &folder_path).await?
        || !metadata
            .list_descendant_folders(user_id, &folder_path)
            .await?
            .is_empty()
    {
        return Err(ApiError::Conflict(format!("folder '{name}' is not empty")));
    }

    let folder = metadata
        .get_folder_by_path(user_id, &folder_path)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("folder {folder_path} not found")))?;
    metadata.delete_folder(folder.folder_id).await?;
    tracing::info!(folder_path = %folder_path, "Folder deleted");
    Ok(())
}

/// Load a file the user owns. Other users' files are reported as missing.
pub async fn owned_file(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    file_id: Uuid,
) -> ApiResult<FileRow> {
    metadata
        .get_file(file_id)
        .await?
        .filter(|f| f.user_id == user_id)
        .ok_or_else(|| ApiError::NotFound(format!("file {file_id} not found")))
}

async fn owned_live_file(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    file_id: Uuid,
) -> ApiResult<FileRow> {
    let file = owned_file(metadata, user_id, file_id).await?;
    if file.is_trashed() {
        return Err(ApiError::NotFound(format!("file {file_id} not found")));
    }
    Ok(file)
}

/// Rename a file within its folder.
#[tracing::instrument(skip(metadata), fields(user_id = %user_id, file_id = %file_id))]
pub async fn rename_file(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    file_id: Uuid,
    new_name: &str,
) -> ApiResult<FileRow> {
    let mut file = owned_live_file(metadata, user_id, file_id).await?;
    let new_name = sanitize_filename(new_name)?;
    if new_name == file.filename {
        return Ok(file);
    }
    if metadata
        .file_name_exists(user_id, &file.logical_path, &new_name)
        .await?
    {
        return Err(ApiError::Conflict(format!(
            "a file named '{new_name}' already exists"
        )));
    }

    metadata
        .rename_file(file_id, &new_name, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(old_name = %file.filename, new_name = %new_name, "File renamed");
    file.filename = new_name;
    Ok(file)
}

/// Move a file into another existing folder, keeping its name.
#[tracing::instrument(skip(metadata), fields(user_id = %user_id, file_id = %file_id))]
pub async fn move_file(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    file_id: Uuid,
    target: &str,
) -> ApiResult<FileRow> {
    let mut file = owned_live_file(metadata, user_id, file_id).await?;
    let target = require_logical_path(target)?;
    if target == file.logical_path {
        return Ok(file);
    }
    if !folder_exists(metadata, user_id, &target).await? {
        return Err(ApiError::NotFound(format!("folder {target} not found")));
    }
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
        .move_file(file_id, &target, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(from = %file.logical_path, to = %target, "File moved");
    file.logical_path = target;
    Ok(file)
}

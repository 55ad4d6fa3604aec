//! Trash listing and the trash form actions.

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    FileResponse, FolderResponse, form_response, parse_id, return_folder,
};
use crate::handlers::files::ReturnForm;
use crate::lifecycle::trash;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Form, Path, State};
use axum::response::Response;
use serde::Serialize;

/// Top-level trash entries.
#[derive(Debug, Serialize)]
pub struct TrashResponse {
    pub files: Vec<FileResponse>,
    pub folders: Vec<FolderResponse>,
}

/// GET /v1/trash
pub async fn list_trash(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<Json<TrashResponse>> {
    let listing = trash::list_trash(state.metadata.as_ref(), principal.user_id).await?;
    Ok(Json(TrashResponse {
        files: listing.files.into_iter().map(FileResponse::from).collect(),
        folders: listing.folders.into_iter().map(FolderResponse::from).collect(),
    }))
}

/// POST /trash/files/{file_id}/restore
pub async fn restore_file_form(
    State(state): State<AppState>,
    principal: Principal,
    Path(file_id): Path<String>,
    Form(form): Form<ReturnForm>,
) -> Response {
    let folder = return_folder(form.folder.as_deref());
    let result = async {
        let file_id = parse_id("file", &file_id)?;
        let file = trash::restore_file(state.metadata.as_ref(), principal.user_id, file_id).await?;
        Ok::<_, ApiError>(format!("Restored {} to {}", file.filename, file.logical_path))
    }
    .await;
    form_response(&folder, result)
}

/// POST /trash/files/{file_id}/delete - Permanently delete a trashed file.
pub async fn purge_file_form(
    State(state): State<AppState>,
    principal: Principal,
    Path(file_id): Path<String>,
    Form(form): Form<ReturnForm>,
) -> Response {
    let folder = return_folder(form.folder.as_deref());
    let result = async {
        let file_id = parse_id("file", &file_id)?;
        trash::permanent_delete_file(
            state.metadata.as_ref(),
            state.storage.as_ref(),
            principal.user_id,
            file_id,
        )
        .await?;
        Ok::<_, ApiError>("File permanently deleted".to_string())
    }
    .await;
    form_response(&folder, result)
}

/// POST /trash/folders/{folder_id}/restore
pub async fn restore_folder_form(
    State(state): State<AppState>,
    principal: Principal,
    Path(folder_id): Path<String>,
    Form(form): Form<ReturnForm>,
) -> Response {
    let folder = return_folder(form.folder.as_deref());
    let result = async {
        let folder_id = parse_id("folder", &folder_id)?;
        let count =
            trash::restore_folder(state.metadata.as_ref(), principal.user_id, folder_id).await?;
        Ok::<_, ApiError>(format!(
            "Restored {} folders and {} files",
            count.folders, count.files
        ))
    }
    .await;
    form_response(&folder, result)
}

/// POST /trash/folders/{folder_id}/delete - Permanently delete a trashed folder.
pub async fn purge_folder_form(
    State(state): State<AppState>,
    principal: Principal,
    Path(folder_id): Path<String>,
    Form(form): Form<ReturnForm>,
) -> Response {
    let folder = return_folder(form.folder.as_deref());
    let result = async {
        let folder_id = parse_id("folder", &folder_id)?;
        let report = trash::permanent_delete_folder(
            state.metadata.as_ref(),
            state.storage.as_ref(),
            principal.user_id,
            folder_id,
        )
        .await?;
        Ok::<_, ApiError>(format!(
            "Permanently deleted {} folders and {} files",
            report.folders, report.files
        ))
    }
    .await;
    form_response(&folder, result)
}

/// POST /trash/empty - Permanently delete everything in the caller's trash.
pub async fn empty_trash_form(
    State(state): State<AppState>,
    principal: Principal,
    Form(form): Form<ReturnForm>,
) -> Response {
    let folder = return_folder(form.folder.as_deref());
    let result = async {
        let report = trash::empty_trash(
            state.metadata.as_ref(),
            state.storage.as_ref(),
            Some(principal.user_id),
        )
        .await?;
        Ok::<_, ApiError>(format!(
            "Trash emptied: {} files, {} folders",
            report.files, report.folders
        ))
    }
    .await;
    form_response(&folder, result)
}

//! File listing, download and the file form actions.

use crate::auth::{Principal, cookie_value};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    FLASH_COOKIE, FileResponse, Flash, FlashKind, decode_flash, flash_redirect, form_response,
    parse_id, return_folder,
};
use crate::lifecycle::{IngestDisposition, ingest, namespace, trash};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Form, Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use trove_core::FileStatus;

/// Query for a folder listing.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub folder: Option<String>,
}

/// Folder listing response.
#[derive(Debug, Serialize)]
pub struct ListingResponse {
    pub path: String,
    pub folders: Vec<String>,
    pub files: Vec<FileResponse>,
    /// Message left by the form action that redirected here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<FlashResponse>,
}

#[derive(Debug, Serialize)]
pub struct FlashResponse {
    pub kind: String,
    pub message: String,
}

impl From<Flash> for FlashResponse {
    fn from(flash: Flash) -> Self {
        Self {
            kind: flash.kind,
            message: flash.message,
        }
    }
}

/// GET /v1/files?folder= - List one folder. A pending flash is consumed.
pub async fn list_files(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let listing = namespace::list_folder(
        state.metadata.as_ref(),
        principal.user_id,
        query.folder.as_deref().unwrap_or("/"),
    )
    .await?;

    let flash = cookie_value(&headers, FLASH_COOKIE).and_then(decode_flash);
    let clear_flash = flash.is_some();
    let mut response = Json(ListingResponse {
        path: listing.path,
        folders: listing.folders,
        files: listing.files.into_iter().map(FileResponse::from).collect(),
        flash: flash.map(FlashResponse::from),
    })
    .into_response();

    if clear_flash {
        response.headers_mut().insert(
            SET_COOKIE,
            HeaderValue::from_static("trove_flash=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax"),
        );
    }
    Ok(response)
}

/// GET /v1/files/{file_id} - One file row, including its upload status.
pub async fn get_file(
    State(state): State<AppState>,
    principal: Principal,
    Path(file_id): Path<String>,
) -> ApiResult<Json<FileResponse>> {
    let file_id = parse_id("file", &file_id)?;
    let file = namespace::owned_file(state.metadata.as_ref(), principal.user_id, file_id).await?;
    Ok(Json(file.into()))
}

/// GET /v1/files/{file_id}/content - Stream a completed file from the backend.
#[tracing::instrument(skip(state, principal), fields(user_id = %principal.user_id))]
pub async fn get_file_content(
    State(state): State<AppState>,
    principal: Principal,
    Path(file_id): Path<String>,
) -> ApiResult<Response> {
    let file_id = parse_id("file", &file_id)?;
    let file = namespace::owned_file(state.metadata.as_ref(), principal.user_id, file_id).await?;
    if file.status()? != FileStatus::Completed {
        return Err(ApiError::Conflict(format!(
            "file {file_id} is {}, not completed",
            file.upload_status
        )));
    }

    let stream = state.storage.open(&file.storage_path).await?;
    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&file.mime_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(file.file_size.max(0) as u64));
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(&file.filename, NON_ALPHANUMERIC)
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// GET /v1/failed - Failed uploads awaiting dismissal.
pub async fn list_failed(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<Json<Vec<FileResponse>>> {
    let failed = state.metadata.list_failed_files(principal.user_id).await?;
    Ok(Json(failed.into_iter().map(FileResponse::from).collect()))
}

/// POST /files/upload - Streaming multipart upload.
///
/// Size, quota and malformed-body failures answer with their status; anything
/// accepted redirects to the target folder.
#[tracing::instrument(skip(state, principal, headers, multipart), fields(user_id = %principal.user_id))]
pub async fn upload_form(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Response> {
    let declared_len = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let outcome = ingest::ingest(&state, &principal, declared_len, multipart).await?;
    let folder = outcome.file.logical_path.clone();
    let response = match outcome.disposition {
        IngestDisposition::Deduplicated | IngestDisposition::Queued => flash_redirect(
            &folder,
            FlashKind::Success,
            &format!("Uploaded {}", outcome.file.filename),
        ),
        IngestDisposition::QueueFull => flash_redirect(
            &folder,
            FlashKind::Error,
            &format!(
                "Upload of {} failed: {}",
                outcome.file.filename,
                outcome.file.error_message.as_deref().unwrap_or("upload queue is full")
            ),
        ),
    };
    Ok(response)
}

/// Form body naming only the folder to return to.
#[derive(Debug, Default, Deserialize)]
pub struct ReturnForm {
    pub folder: Option<String>,
}

/// Form body for a file rename.
#[derive(Debug, Deserialize)]
pub struct RenameFileForm {
    pub new_name: String,
    pub folder: Option<String>,
}

/// Form body for a file move.
#[derive(Debug, Deserialize)]
pub struct MoveFileForm {
    pub target: String,
    pub folder: Option<String>,
}

/// POST /files/{file_id}/rename
pub async fn rename_file_form(
    State(state): State<AppState>,
    principal: Principal,
    Path(file_id): Path<String>,
    Form(form): Form<RenameFileForm>,
) -> Response {
    let folder = return_folder(form.folder.as_deref());
    let result = async {
        let file_id = parse_id("file", &file_id)?;
        let file = namespace::rename_file(
            state.metadata.as_ref(),
            principal.user_id,
            file_id,
            &form.new_name,
        )
        .await?;
        Ok::<_, ApiError>(format!("Renamed to {}", file.filename))
    }
    .await;
    form_response(&folder, result)
}

/// POST /files/{file_id}/move
pub async fn move_file_form(
    State(state): State<AppState>,
    principal: Principal,
    Path(file_id): Path<String>,
    Form(form): Form<MoveFileForm>,
) -> Response {
    let folder = return_folder(form.folder.as_deref());
    let result = async {
        let file_id = parse_id("file", &file_id)?;
        let file = namespace::move_file(
            state.metadata.as_ref(),
            principal.user_id,
            file_id,
            &form.target,
        )
        .await?;
        Ok::<_, ApiError>(format!("Moved {} to {}", file.filename, file.logical_path))
    }
    .await;
    form_response(&folder, result)
}

/// POST /files/{file_id}/delete - Move a file to the trash.
pub async fn trash_file_form(
    State(state): State<AppState>,
    principal: Principal,
    Path(file_id): Path<String>,
    Form(form): Form<ReturnForm>,
) -> Response {
    let folder = return_folder(form.folder.as_deref());
    let result = async {
        let file_id = parse_id("file", &file_id)?;
        let file =
            trash::soft_delete_file(state.metadata.as_ref(), principal.user_id, file_id).await?;
        Ok::<_, ApiError>(format!("Moved {} to trash", file.filename))
    }
    .await;
    form_response(&folder, result)
}

/// POST /files/{file_id}/dismiss - Drop a failed upload and release its quota.
pub async fn dismiss_file_form(
    State(state): State<AppState>,
    principal: Principal,
    Path(file_id): Path<String>,
    Form(form): Form<ReturnForm>,
) -> Response {
    let folder = return_folder(form.folder.as_deref());
    let result = async {
        let file_id = parse_id("file", &file_id)?;
        let file =
            trash::dismiss_failed(state.metadata.as_ref(), principal.user_id, file_id).await?;
        Ok::<_, ApiError>(format!("Dismissed {}", file.filename))
    }
    .await;
    form_response(&folder, result)
}

//! Shared handler helpers: JSON bodies, id parsing, flash redirects and
//! the JSON views of index rows.

use crate::error::{ApiError, ApiResult};
use axum::body::Body;
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use trove_core::sanitize_logical_path;
use trove_metadata::models::{FileRow, FolderRow, UserRow};
use uuid::Uuid;

/// Maximum JSON request body size (64 KiB).
pub const MAX_JSON_BODY_SIZE: usize = 64 * 1024;

/// Cookie carrying the one-shot message shown after a form redirect.
pub const FLASH_COOKIE: &str = "trove_flash";

/// Seconds a flash cookie lives.
const FLASH_MAX_AGE_SECS: u32 = 60;

/// Characters left alone when encoding a folder into a query string.
const QUERY_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Read and parse a JSON request body.
pub async fn read_json<T: DeserializeOwned>(body: Body) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(body, MAX_JSON_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Parse an id from a URL path segment.
pub fn parse_id(kind: &str, raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid {kind} id: {raw}")))
}

/// Sanitized return folder for a form redirect; anything unusable becomes the root.
pub fn return_folder(folder: Option<&str>) -> String {
    let path = sanitize_logical_path(folder.unwrap_or("/"));
    if path.is_empty() { "/".to_string() } else { path }
}

/// Severity of a flash message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashKind {
    Success,
    Error,
}

impl FlashKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Flash message decoded from the cookie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flash {
    pub kind: String,
    pub message: String,
}

/// Decode a `kind:percent-encoded-message` flash cookie value.
pub fn decode_flash(value: &str) -> Option<Flash> {
    let (kind, message) = value.split_once(':')?;
    Some(Flash {
        kind: kind.to_string(),
        message: percent_decode_str(message).decode_utf8().ok()?.into_owned(),
    })
}

/// 303 to the listing of `folder`, carrying a flash cookie.
pub fn flash_redirect(folder: &str, kind: FlashKind, message: &str) -> Response {
    let location = format!("/v1/files?folder={}", utf8_percent_encode(folder, QUERY_SAFE));
    let cookie = format!(
        "{FLASH_COOKIE}={}:{}; Path=/; Max-Age={FLASH_MAX_AGE_SECS}; HttpOnly; SameSite=Lax",
        kind.as_str(),
        utf8_percent_encode(message, NON_ALPHANUMERIC)
    );

    let mut response = StatusCode::SEE_OTHER.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&location) {
        headers.insert(LOCATION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        headers.insert(SET_COOKIE, value);
    }
    response
}

/// Turn the outcome of a form action into a redirect.
///
/// Client mistakes (conflicts, missing items, bad names) are flashed; auth
/// failures and server errors keep their status.
pub fn form_response(folder: &str, result: ApiResult<String>) -> Response {
    match result {
        Ok(message) => flash_redirect(folder, FlashKind::Success, &message),
        Err(e) if e.is_user_facing() => {
            tracing::debug!(error = %e, "Form action refused");
            flash_redirect(folder, FlashKind::Error, &flash_text(&e))
        }
        Err(e) => e.into_response(),
    }
}

/// Message shown to the user for a refused action.
fn flash_text(error: &ApiError) -> String {
    match error {
        ApiError::NotFound(m)
        | ApiError::BadRequest(m)
        | ApiError::Conflict(m)
        | ApiError::PayloadTooLarge(m)
        | ApiError::InsufficientStorage(m)
        | ApiError::QuotaExceeded(m) => m.clone(),
        other => other.to_string(),
    }
}

/// File row as exposed by the JSON API.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub file_id: String,
    pub filename: String,
    pub original_filename: String,
    pub logical_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub hash: String,
    pub upload_status: String,
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trashed_at: Option<OffsetDateTime>,
    pub original_logical_path: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<FileRow> for FileResponse {
    fn from(row: FileRow) -> Self {
        Self {
            file_id: row.file_id.to_string(),
            filename: row.filename,
            original_filename: row.original_filename,
            logical_path: row.logical_path,
            file_size: row.file_size,
            mime_type: row.mime_type,
            hash: row.hash,
            upload_status: row.upload_status,
            error_message: row.error_message,
            trashed_at: row.trashed_at,
            original_logical_path: row.original_logical_path,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Folder row as exposed by the JSON API.
#[derive(Debug, Serialize)]
pub struct FolderResponse {
    pub folder_id: String,
    pub folder_path: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trashed_at: Option<OffsetDateTime>,
    pub original_folder_path: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<FolderRow> for FolderResponse {
    fn from(row: FolderRow) -> Self {
        Self {
            folder_id: row.folder_id.to_string(),
            folder_path: row.folder_path,
            trashed_at: row.trashed_at,
            original_folder_path: row.original_folder_path,
            created_at: row.created_at,
        }
    }
}

/// User as exposed by the JSON API. The password hash never leaves the server.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub storage_quota: i64,
    pub storage_used: i64,
    pub retention_days: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<UserRow> for UserResponse {
    fn from(row: UserRow) -> Self {
        Self {
            user_id: row.user_id.to_string(),
            username: row.username,
            email: row.email,
            is_admin: row.is_admin,
            storage_quota: row.storage_quota,
            storage_used: row.storage_used,
            retention_days: row.retention_days,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_redirect_encodes_folder_and_message() {
        let response = flash_redirect("/my docs", FlashKind::Error, "name taken; try again");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "/v1/files?folder=/my%20docs"
        );
        let cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        let value = cookie
            .strip_prefix("trove_flash=")
            .and_then(|rest| rest.split(';').next())
            .unwrap();
        let flash = decode_flash(value).unwrap();
        assert_eq!(flash.kind, "error");
        assert_eq!(flash.message, "name taken; try again");
    }

    #[test]
    fn test_form_response_keeps_auth_errors() {
        let response = form_response("/", Err(ApiError::Unauthorized("nope".into())));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = form_response("/", Err(ApiError::Conflict("taken".into())));
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[test]
    fn test_return_folder() {
        assert_eq!(return_folder(None), "/");
        assert_eq!(return_folder(Some("docs/")), "/docs");
        assert_eq!(return_folder(Some("../x")), "/");
    }
}

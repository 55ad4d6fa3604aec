//! Administrative endpoints: users, quotas and the global trash.

use crate::auth::AdminPrincipal;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{UserResponse, parse_id, read_json};
use crate::lifecycle::temp::remove_dir_logged;
use crate::lifecycle::trash;
use crate::password::hash_password;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use time::OffsetDateTime;
use trove_metadata::models::UserRow;
use uuid::Uuid;

/// Longest accepted username.
const MAX_USERNAME_LEN: usize = 64;

/// Request to create a user.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
    /// Quota in bytes. Defaults to `quota.default_user_quota`.
    pub storage_quota: Option<u64>,
    /// Trash retention override in days.
    pub retention_days: Option<i64>,
}

/// Request to set a quota.
#[derive(Debug, Deserialize)]
pub struct SetQuotaRequest {
    pub storage_quota: u64,
}

/// Request to reset a password.
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

/// Result of a usage recalculation.
#[derive(Debug, Serialize)]
pub struct RecalculateResponse {
    pub user_id: String,
    pub previous_used: i64,
    pub storage_used: i64,
}

/// Result of emptying every trash.
#[derive(Debug, Serialize)]
pub struct EmptyTrashResponse {
    pub files: u64,
    pub folders: u64,
}

fn validate_username(username: &str) -> ApiResult<()> {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "username must be 1 to {MAX_USERNAME_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ApiError::BadRequest(
            "username may only contain letters, digits, '.', '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> ApiResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ApiError::BadRequest(format!("invalid email: {email}"))),
    }
}

fn db_quota(bytes: u64) -> ApiResult<i64> {
    i64::try_from(bytes).map_err(|_| ApiError::BadRequest(format!("quota {bytes} is too large")))
}

/// Hash a password off the async runtime.
async fn hash_password_blocking(state: &AppState, password: String) -> ApiResult<String> {
    let config = state.config.auth.clone();
    tokio::task::spawn_blocking(move || hash_password(&config, &password))
        .await
        .map_err(|e| ApiError::Internal(format!("password hashing task failed: {e}")))?
}

async fn existing_user(state: &AppState, user_id: Uuid) -> ApiResult<UserRow> {
    state
        .metadata
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {user_id} not found")))
}

/// GET /v1/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
) -> ApiResult<Json<Vec<UserResponse>>> {
    let users = state.metadata.list_users().await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// POST /v1/admin/users
#[tracing::instrument(skip(state, admin, body), fields(admin = %admin.0.username))]
pub async fn create_user(
    State(state): State<AppState>,
    admin: AdminPrincipal,
    body: Body,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    let req: CreateUserRequest = read_json(body).await?;
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_string();
    validate_username(&username)?;
    validate_email(&email)?;
    let storage_quota =
        db_quota(req.storage_quota.unwrap_or(state.config.quota.default_user_quota))?;
    if req.retention_days.is_some_and(|d| d < 0) {
        return Err(ApiError::BadRequest(
            "retention_days must not be negative".to_string(),
        ));
    }

    let password_hash = hash_password_blocking(&state, req.password).await?;
    let now = OffsetDateTime::now_utc();
    let user = UserRow {
        user_id: Uuid::new_v4(),
        username,
        email,
        password_hash,
        is_admin: req.is_admin,
        storage_quota,
        storage_used: 0,
        retention_days: req.retention_days,
        created_at: now,
        updated_at: now,
    };
    state.metadata.create_user(&user).await?;
    tracing::info!(user_id = %user.user_id, username = %user.username, "User created");

    Ok((StatusCode::CREATED, Json(user.into())))
}

/// DELETE /v1/admin/users/{user_id} - Remove a user with everything they own.
#[tracing::instrument(skip(state, admin), fields(admin = %admin.0.username))]
pub async fn delete_user(
    State(state): State<AppState>,
    admin: AdminPrincipal,
    Path(user_id): Path<String>,
) -> ApiResult<StatusCode> {
    let user_id = parse_id("user", &user_id)?;
    if user_id == admin.0.user_id {
        return Err(ApiError::BadRequest(
            "administrators cannot delete themselves".to_string(),
        ));
    }
    let user = existing_user(&state, user_id).await?;

    let paths = state.metadata.list_storage_paths(user_id).await?;
    let sessions = state.metadata.list_user_sessions(user_id).await?;

    // Rows go first so nothing can reference an object once it is deleted.
    state.metadata.delete_user(user_id).await?;

    let mut object_errors = 0u64;
    for path in &paths {
        if let Err(e) = state.storage.delete(path).await {
            object_errors += 1;
            tracing::warn!(storage_path = %path, error = %e, "Failed to delete object of removed user");
        }
    }
    for session in &sessions {
        remove_dir_logged(FsPath::new(&session.temp_dir)).await;
    }

    tracing::info!(
        user_id = %user_id,
        username = %user.username,
        objects = paths.len(),
        object_errors,
        sessions = sessions.len(),
        "User deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /v1/admin/users/{user_id}/quota
#[tracing::instrument(skip(state, admin, body), fields(admin = %admin.0.username))]
pub async fn set_quota(
    State(state): State<AppState>,
    admin: AdminPrincipal,
    Path(user_id): Path<String>,
    body: Body,
) -> ApiResult<Json<UserResponse>> {
    let user_id = parse_id("user", &user_id)?;
    let req: SetQuotaRequest = read_json(body).await?;
    let quota = db_quota(req.storage_quota)?;
    existing_user(&state, user_id).await?;

    state
        .metadata
        .set_quota(user_id, quota, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(user_id = %user_id, storage_quota = quota, "Quota updated");

    Ok(Json(existing_user(&state, user_id).await?.into()))
}

/// POST /v1/admin/users/{user_id}/quota/recalculate - Repair `storage_used` drift.
#[tracing::instrument(skip(state, admin), fields(admin = %admin.0.username))]
pub async fn recalculate_quota(
    State(state): State<AppState>,
    admin: AdminPrincipal,
    Path(user_id): Path<String>,
) -> ApiResult<Json<RecalculateResponse>> {
    let user_id = parse_id("user", &user_id)?;
    let user = existing_user(&state, user_id).await?;
    let storage_used = state.metadata.recalculate_usage(user_id).await?;
    if storage_used != user.storage_used {
        tracing::warn!(
            user_id = %user_id,
            previous = user.storage_used,
            recalculated = storage_used,
            "Quota drift repaired"
        );
    }

    Ok(Json(RecalculateResponse {
        user_id: user_id.to_string(),
        previous_used: user.storage_used,
        storage_used,
    }))
}

/// PUT /v1/admin/users/{user_id}/password - Reset a password and end all sessions.
#[tracing::instrument(skip(state, admin, body), fields(admin = %admin.0.username))]
pub async fn reset_password(
    State(state): State<AppState>,
    admin: AdminPrincipal,
    Path(user_id): Path<String>,
    body: Body,
) -> ApiResult<StatusCode> {
    let user_id = parse_id("user", &user_id)?;
    let req: ResetPasswordRequest = read_json(body).await?;
    existing_user(&state, user_id).await?;

    let password_hash = hash_password_blocking(&state, req.password).await?;
    let now = OffsetDateTime::now_utc();
    state
        .metadata
        .update_password(user_id, &password_hash, now)
        .await?;
    let revoked = state.metadata.revoke_user_tokens(user_id, now).await?;
    tracing::info!(user_id = %user_id, revoked_tokens = revoked, "Password reset");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/admin/trash/empty - Empty every user's trash.
#[tracing::instrument(skip(state, admin), fields(admin = %admin.0.username))]
pub async fn empty_all_trash(
    State(state): State<AppState>,
    admin: AdminPrincipal,
) -> ApiResult<Json<EmptyTrashResponse>> {
    let report = trash::empty_trash(state.metadata.as_ref(), state.storage.as_ref(), None).await?;
    Ok(Json(EmptyTrashResponse {
        files: report.files,
        folders: report.folders,
    }))
}

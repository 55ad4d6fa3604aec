//! Login, logout and caller identity.

use crate::auth::{Principal, TOKEN_COOKIE, generate_token, hash_token};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::read_json;
use crate::password::verify_password;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use trove_metadata::models::TokenRow;
use uuid::Uuid;

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response. The token is shown once; only its hash is stored.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Response for the authenticated caller.
#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub user_id: String,
    pub username: String,
    pub is_admin: bool,
    pub storage_quota: i64,
    pub storage_used: i64,
}

fn cookie_header(value: &str, max_age_secs: i64) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{TOKEN_COOKIE}={value}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax"
    ))
    .ok()
}

/// POST /v1/auth/login - Exchange a username and password for a bearer token.
#[tracing::instrument(skip(state, body))]
pub async fn login(State(state): State<AppState>, body: Body) -> ApiResult<Response> {
    let req: LoginRequest = read_json(body).await?;
    let invalid = || ApiError::Unauthorized("invalid username or password".to_string());

    let user = state
        .metadata
        .get_user_by_username(req.username.trim())
        .await?
        .ok_or_else(invalid)?;

    // Argon2 verification is CPU-bound.
    let stored = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&stored, &req.password))
        .await
        .map_err(|e| ApiError::Internal(format!("password verification task failed: {e}")))?;
    if !verified {
        tracing::info!(username = %user.username, "Login rejected");
        return Err(invalid());
    }

    let token = generate_token();
    let now = OffsetDateTime::now_utc();
    let ttl = state.config.auth.session_ttl();
    let expires_at = now + ttl;
    let row = TokenRow {
        token_id: Uuid::new_v4(),
        user_id: user.user_id,
        token_hash: hash_token(&token),
        expires_at: Some(expires_at),
        revoked_at: None,
        created_at: now,
        last_used_at: None,
        description: Some("login".to_string()),
    };
    state.metadata.create_token(&row).await?;
    tracing::info!(user_id = %user.user_id, token_id = %row.token_id, "User logged in");

    let mut response = Json(LoginResponse { token: token.clone(), expires_at }).into_response();
    if let Some(cookie) = cookie_header(&token, ttl.whole_seconds()) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    Ok(response)
}

/// POST /v1/auth/logout - Revoke the token that authenticated this request.
pub async fn logout(State(state): State<AppState>, principal: Principal) -> ApiResult<Response> {
    state
        .metadata
        .revoke_token(principal.token_id, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(user_id = %principal.user_id, token_id = %principal.token_id, "User logged out");

    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Some(cookie) = cookie_header("", 0) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    Ok(response)
}

/// GET /v1/auth/whoami - Return the caller and their quota.
pub async fn whoami(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<Json<WhoamiResponse>> {
    let user = state
        .metadata
        .get_user(principal.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("user no longer exists".to_string()))?;

    Ok(Json(WhoamiResponse {
        user_id: user.user_id.to_string(),
        username: user.username,
        is_admin: user.is_admin,
        storage_quota: user.storage_quota,
        storage_used: user.storage_used,
    }))
}

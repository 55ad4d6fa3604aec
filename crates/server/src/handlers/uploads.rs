//! Resumable upload session handlers.

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{parse_id, read_json};
use crate::lifecycle::chunked;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use trove_core::upload::{
    ChunkAck, CompleteUploadResponse, InitUploadRequest, InitUploadResponse, UploadStatusResponse,
};

/// Query of a chunk upload.
#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub chunk: Option<String>,
}

/// POST /v1/uploads - Open a session.
#[tracing::instrument(skip(state, principal, body), fields(user_id = %principal.user_id))]
pub async fn init_upload(
    State(state): State<AppState>,
    principal: Principal,
    body: Body,
) -> ApiResult<(StatusCode, Json<InitUploadResponse>)> {
    let req: InitUploadRequest = read_json(body).await?;
    let response = chunked::init(&state, &principal, req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// PUT /v1/uploads/{upload_id}?chunk=n - Store the bytes of one chunk.
#[tracing::instrument(skip(state, principal, query, body), fields(upload_id = %upload_id))]
pub async fn put_chunk(
    State(state): State<AppState>,
    principal: Principal,
    Path(upload_id): Path<String>,
    Query(query): Query<ChunkQuery>,
    body: Body,
) -> ApiResult<Json<ChunkAck>> {
    let upload_id = parse_id("upload", &upload_id)?;
    let raw = query
        .chunk
        .ok_or_else(|| ApiError::BadRequest("missing chunk parameter".to_string()))?;
    let chunk = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("invalid chunk number: {raw}")))?;

    let ack = chunked::put_chunk(&state, &principal, upload_id, chunk, body).await?;
    Ok(Json(ack))
}

/// POST /v1/uploads/{upload_id}/complete - Assemble and store the file.
#[tracing::instrument(skip(state, principal), fields(upload_id = %upload_id))]
pub async fn complete_upload(
    State(state): State<AppState>,
    principal: Principal,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<CompleteUploadResponse>> {
    let upload_id = parse_id("upload", &upload_id)?;
    let response = chunked::complete(&state, &principal, upload_id).await?;
    Ok(Json(response))
}

/// DELETE /v1/uploads/{upload_id} - Cancel a session.
#[tracing::instrument(skip(state, principal), fields(upload_id = %upload_id))]
pub async fn cancel_upload(
    State(state): State<AppState>,
    principal: Principal,
    Path(upload_id): Path<String>,
) -> ApiResult<StatusCode> {
    let upload_id = parse_id("upload", &upload_id)?;
    chunked::cancel(&state, &principal, upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/uploads/{upload_id} - Session progress.
pub async fn get_upload(
    State(state): State<AppState>,
    principal: Principal,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadStatusResponse>> {
    let upload_id = parse_id("upload", &upload_id)?;
    let status = chunked::status(&state, &principal, upload_id).await?;
    Ok(Json(status))
}

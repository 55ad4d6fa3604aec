//! Resumable chunked upload protocol.
//!
//! ```text
//! (absent) --init--> active --put-chunk*--> active --complete--> completing --> completed
//!                      +--cancel--> cancelled            (failure) <--+
//!                      +--expiry--> expired
//! ```
//!
//! Chunk bytes live in `{temp_root}/{upload_id}/chunk_{i}`. The received set is
//! updated by the index under its write lock, so concurrent chunk uploads to
//! one session never lose an index. `complete` claims the session before it
//! assembles, so at most one completion runs per session.

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::lifecycle::ingest::{NAME_ATTEMPTS, new_file_row};
use crate::lifecycle::namespace::{require_logical_path, unique_display_filename};
use crate::lifecycle::quota::{has_headroom, to_db_size};
use crate::lifecycle::temp::{TempArea, remove_dir_logged, remove_file_logged, spawn_remove_dir};
use crate::metrics::{
    BYTES_INGESTED, CHUNKS_RECEIVED, SESSIONS_CANCELLED, SESSIONS_COMPLETED, SESSIONS_CREATED,
    SESSIONS_EXPIRED,
};
use crate::state::AppState;
use axum::body::Body;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use trove_core::upload::{
    ChunkAck, CompleteUploadResponse, InitUploadRequest, InitUploadResponse, UploadStatusResponse,
    is_complete_set,
};
use trove_core::{ContentHash, DEFAULT_MIME_TYPE, FileStatus, SessionStatus, sanitize_filename};
use trove_metadata::models::UploadSessionRow;
use trove_metadata::{MetadataError, MetadataStore};
use trove_storage::{ObjectStore, STREAM_CHUNK_SIZE, SaveOptions, file_stream};
use uuid::Uuid;

fn validate_init(req: &InitUploadRequest, max_upload_size: u64) -> ApiResult<()> {
    if req.total_size == 0 {
        return Err(ApiError::BadRequest("total_size must be greater than 0".to_string()));
    }
    if req.chunk_size == 0 {
        return Err(ApiError::BadRequest("chunk_size must be greater than 0".to_string()));
    }
    if req.total_chunks == 0 {
        return Err(ApiError::BadRequest("total_chunks must be greater than 0".to_string()));
    }
    if req.total_size > max_upload_size {
        return Err(ApiError::BadRequest(format!(
            "total_size {} exceeds the {max_upload_size} byte limit",
            req.total_size
        )));
    }
    let expected_chunks = req.total_size.div_ceil(req.chunk_size);
    if expected_chunks != u64::from(req.total_chunks) {
        return Err(ApiError::BadRequest(format!(
            "total_chunks {} does not match {} bytes in chunks of {}",
            req.total_chunks, req.total_size, req.chunk_size
        )));
    }
    if let Some(hash) = &req.hash
        && hash.is_empty()
    {
        return Err(ApiError::BadRequest("hash must not be empty".to_string()));
    }
    Ok(())
}

/// Open a new session.
#[tracing::instrument(skip(state, principal, req), fields(user_id = %principal.user_id))]
pub async fn init(
    state: &AppState,
    principal: &Principal,
    req: InitUploadRequest,
) -> ApiResult<InitUploadResponse> {
    validate_init(&req, state.config.uploads.max_upload_size)?;
    let filename = sanitize_filename(&req.filename)?;
    let logical_path = require_logical_path(&req.logical_path)?;

    let user = state
        .metadata
        .get_user(principal.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("user no longer exists".to_string()))?;
    if !has_headroom(&user, req.total_size) {
        return Err(ApiError::QuotaExceeded(format!(
            "upload of {} bytes exceeds the remaining quota of {} bytes",
            req.total_size,
            user.remaining_quota()
        )));
    }

    let upload_id = Uuid::new_v4();
    let temp_dir = state
        .temp
        .create_session_dir(upload_id)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to create session directory: {e}")))?;

    let now = OffsetDateTime::now_utc();
    let expires_at = now + state.config.uploads.session_timeout();
    let session = UploadSessionRow {
        upload_id,
        user_id: principal.user_id,
        filename,
        logical_path,
        total_size: to_db_size(req.total_size)?,
        chunk_size: to_db_size(req.chunk_size)?,
        total_chunks: i64::from(req.total_chunks),
        received_chunks: 0,
        chunks_received: "[]".to_string(),
        status: SessionStatus::Active.as_str().to_string(),
        hash: req.hash.map(|h| h.trim().to_ascii_lowercase()),
        mime_type: req
            .mime_type
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
        temp_dir: temp_dir.display().to_string(),
        created_at: now,
        updated_at: now,
        expires_at,
    };

    if let Err(e) = state.metadata.create_session(&session).await {
        remove_dir_logged(&temp_dir).await;
        return Err(e.into());
    }

    SESSIONS_CREATED.inc();
    tracing::info!(
        upload_id = %upload_id,
        total_size = req.total_size,
        total_chunks = req.total_chunks,
        "Upload session created"
    );

    Ok(InitUploadResponse {
        upload_id: upload_id.to_string(),
        chunks_received: Vec::new(),
        expires_at,
    })
}

/// Load a session the caller owns. Foreign sessions are reported as missing.
async fn owned_session(
    metadata: &dyn MetadataStore,
    principal: &Principal,
    upload_id: Uuid,
) -> ApiResult<UploadSessionRow> {
    metadata
        .get_session(upload_id)
        .await?
        .filter(|s| s.user_id == principal.user_id)
        .ok_or_else(|| ApiError::NotFound(format!("upload session {upload_id} not found")))
}

/// Require an active session inside its deadline. A session found past its
/// deadline is expired on the spot.
async fn require_active(metadata: &dyn MetadataStore, session: &UploadSessionRow) -> ApiResult<()> {
    match session.status()? {
        SessionStatus::Active => {}
        SessionStatus::Expired => return Err(ApiError::UploadExpired),
        SessionStatus::Completing => {
            return Err(ApiError::Conflict(
                "upload session is already being completed".to_string(),
            ));
        }
        other => {
            return Err(ApiError::BadRequest(format!(
                "upload session is {other}, not active"
            )));
        }
    }
    if OffsetDateTime::now_utc() >= session.expires_at {
        expire_session(metadata, session).await?;
        return Err(ApiError::UploadExpired);
    }
    Ok(())
}

/// Move an active session to `expired` and remove its chunks.
/// Returns `false`, leaving the chunks alone, if the session had already left `active`.
pub async fn expire_session(
    metadata: &dyn MetadataStore,
    session: &UploadSessionRow,
) -> ApiResult<bool> {
    let expired = metadata
        .finish_session(
            session.upload_id,
            SessionStatus::Expired,
            OffsetDateTime::now_utc(),
        )
        .await?;
    if expired {
        SESSIONS_EXPIRED.inc();
        tracing::info!(upload_id = %session.upload_id, "Upload session expired");
        remove_dir_logged(Path::new(&session.temp_dir)).await;
    }
    Ok(expired)
}

fn chunk_index(session: &UploadSessionRow, chunk: i64) -> ApiResult<u32> {
    u32::try_from(chunk)
        .ok()
        .filter(|&c| i64::from(c) < session.total_chunks)
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "chunk {chunk} out of range [0, {})",
                session.total_chunks
            ))
        })
}

/// Stream `body` into `dest`, refusing more than `limit` bytes.
/// Writes to a side file first so a retry never exposes a half-written chunk.
async fn write_chunk(body: Body, dest: &Path, limit: u64) -> ApiResult<u64> {
    let partial = dest.with_extension(format!("part-{}", Uuid::new_v4().simple()));
    let result = async {
        let mut out = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to create chunk file: {e}")))?;
        let mut written: u64 = 0;
        let mut stream = body.into_data_stream();
        while let Some(piece) = stream.next().await {
            let piece =
                piece.map_err(|e| ApiError::BadRequest(format!("failed to read chunk: {e}")))?;
            written += piece.len() as u64;
            if written > limit {
                return Err(ApiError::BadRequest(format!(
                    "chunk exceeds the session chunk size of {limit} bytes"
                )));
            }
            out.write_all(&piece)
                .await
                .map_err(|e| ApiError::Internal(format!("failed to write chunk: {e}")))?;
        }
        out.flush()
            .await
            .map_err(|e| ApiError::Internal(format!("failed to write chunk: {e}")))?;
        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to store chunk: {e}")))?;
        Ok(written)
    }
    .await;

    if result.is_err() {
        remove_file_logged(&partial).await;
    }
    result
}

/// Accept the bytes of chunk `chunk`. Retries overwrite and are acknowledged.
#[tracing::instrument(skip(state, principal, body), fields(user_id = %principal.user_id))]
pub async fn put_chunk(
    state: &AppState,
    principal: &Principal,
    upload_id: Uuid,
    chunk: i64,
    body: Body,
) -> ApiResult<ChunkAck> {
    let metadata = state.metadata.as_ref();
    let session = owned_session(metadata, principal, upload_id).await?;
    require_active(metadata, &session).await?;
    let index = chunk_index(&session, chunk)?;

    let dir = PathBuf::from(&session.temp_dir);
    let limit = u64::try_from(session.chunk_size).unwrap_or(0);
    let written = write_chunk(body, &TempArea::chunk_path(&dir, index), limit).await?;

    let updated = metadata
        .record_chunk(upload_id, index, OffsetDateTime::now_utc())
        .await?;
    CHUNKS_RECEIVED.inc();
    BYTES_INGESTED.inc_by(written);
    tracing::debug!(chunk = index, bytes = written, received = updated.received_chunks, "Chunk stored");

    Ok(ChunkAck {
        chunk: index,
        received_chunks: u32::try_from(updated.received_chunks).unwrap_or(u32::MAX),
        total_chunks: u32::try_from(updated.total_chunks).unwrap_or(u32::MAX),
    })
}

/// Concatenate chunks `0..total` into a fresh file, hashing as it goes.
async fn assemble(dir: &Path, total: u32) -> ApiResult<(PathBuf, u64, ContentHash)> {
    let assembled = dir.join(format!("assembled-{}", Uuid::new_v4().simple()));
    let result = concat_chunks(dir, total, &assembled).await;
    match result {
        Ok((size, hash)) => Ok((assembled, size, hash)),
        Err(e) => {
            remove_file_logged(&assembled).await;
            Err(e)
        }
    }
}

async fn concat_chunks(dir: &Path, total: u32, assembled: &Path) -> ApiResult<(u64, ContentHash)> {
    let mut out = tokio::fs::File::create(assembled)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to create assembled file: {e}")))?;
    let mut hasher = ContentHash::hasher();
    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];

    for index in 0..total {
        let path = TempArea::chunk_path(dir, index);
        let mut chunk = tokio::fs::File::open(&path).await.map_err(|e| {
            ApiError::Internal(format!("chunk {index} missing from session directory: {e}"))
        })?;
        loop {
            let n = chunk
                .read(&mut buf)
                .await
                .map_err(|e| ApiError::Internal(format!("failed to read chunk {index}: {e}")))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n])
                .await
                .map_err(|e| ApiError::Internal(format!("failed to assemble upload: {e}")))?;
        }
    }
    out.flush()
        .await
        .map_err(|e| ApiError::Internal(format!("failed to assemble upload: {e}")))?;

    let size = hasher.len();
    Ok((size, hasher.finalize()))
}

async fn delete_orphan(storage: &dyn ObjectStore, path: &str) {
    if let Err(e) = storage.delete(path).await {
        tracing::warn!(storage_path = %path, error = %e, "Failed to delete orphaned object");
    }
}

/// Assemble, verify and store a fully received session.
#[tracing::instrument(skip(state, principal), fields(user_id = %principal.user_id))]
pub async fn complete(
    state: &AppState,
    principal: &Principal,
    upload_id: Uuid,
) -> ApiResult<CompleteUploadResponse> {
    let metadata = state.metadata.as_ref();
    let session = owned_session(metadata, principal, upload_id).await?;
    require_active(metadata, &session).await?;

    let total = u32::try_from(session.total_chunks)
        .map_err(|_| ApiError::Internal("corrupt total_chunks".to_string()))?;
    let received = session.chunks()?;
    if session.received_chunks != session.total_chunks || !is_complete_set(&received, total) {
        return Err(ApiError::IncompleteUpload {
            received: received.len() as u64,
            total: u64::from(total),
        });
    }

    if !metadata
        .claim_session(upload_id, OffsetDateTime::now_utc())
        .await?
    {
        return Err(ApiError::Conflict(format!(
            "upload session {upload_id} is no longer active"
        )));
    }

    let result = complete_claimed(state, &session, total).await;
    if result.is_err()
        && let Err(e) = metadata
            .release_session(upload_id, OffsetDateTime::now_utc())
            .await
    {
        tracing::warn!(upload_id = %upload_id, error = %e, "Failed to release upload session");
    }
    result
}

async fn complete_claimed(
    state: &AppState,
    session: &UploadSessionRow,
    total: u32,
) -> ApiResult<CompleteUploadResponse> {
    let metadata = state.metadata.as_ref();
    let upload_id = session.upload_id;
    let dir = PathBuf::from(&session.temp_dir);
    let (assembled, size, hash) = assemble(&dir, total).await?;
    let expected_size = u64::try_from(session.total_size).unwrap_or(0);
    if size != expected_size {
        remove_file_logged(&assembled).await;
        return Err(ApiError::SizeMismatch {
            expected: expected_size,
            actual: size,
        });
    }
    if let Some(declared) = &session.hash
        && !hash.matches_hex(declared)
    {
        remove_file_logged(&assembled).await;
        tracing::warn!(declared = %declared, actual = %hash, "Assembled upload hash mismatch");
        return Err(ApiError::HashMismatch {
            expected: declared.clone(),
            actual: hash.to_hex(),
        });
    }

    let file = match tokio::fs::File::open(&assembled).await {
        Ok(file) => file,
        Err(e) => {
            remove_file_logged(&assembled).await;
            return Err(ApiError::Internal(format!(
                "failed to open assembled file: {e}"
            )));
        }
    };
    let options = SaveOptions::new(session.filename.clone(), session.mime_type.clone());
    let saved = state.storage.save(file_stream(file), &options).await;
    remove_file_logged(&assembled).await;
    let saved = saved?;

    if saved.hash != hash || saved.size != size {
        delete_orphan(state.storage.as_ref(), &saved.path).await;
        tracing::error!(
            storage_path = %saved.path,
            assembled_hash = %hash,
            stored_hash = %saved.hash,
            assembled_size = size,
            stored_size = saved.size,
            "Stored object does not match the assembled upload"
        );
        return Err(ApiError::Internal(
            "stored object does not match the assembled upload".to_string(),
        ));
    }

    let mut row = new_file_row(
        session.user_id,
        &session.logical_path,
        &session.filename,
        &session.filename,
        session.total_size,
        &session.mime_type,
        &hash.to_hex(),
    );
    row.storage_path = saved.path.clone();
    row.upload_status = FileStatus::Completed.as_str().to_string();

    if let Err(e) = commit(metadata, session, &mut row).await {
        delete_orphan(state.storage.as_ref(), &saved.path).await;
        return Err(e);
    }

    SESSIONS_COMPLETED.inc();
    spawn_remove_dir(dir);
    tracing::info!(
        upload_id = %upload_id,
        file_id = %row.file_id,
        storage_path = %saved.path,
        size,
        "Upload session completed"
    );

    Ok(CompleteUploadResponse {
        file_id: row.file_id.to_string(),
        filename: row.filename,
        size,
        hash: hash.to_hex(),
    })
}

/// Insert the assembled file and close the session, choosing a free name.
async fn commit(
    metadata: &dyn MetadataStore,
    session: &UploadSessionRow,
    row: &mut trove_metadata::models::FileRow,
) -> ApiResult<()> {
    for attempt in 1..=NAME_ATTEMPTS {
        row.filename =
            unique_display_filename(metadata, row.user_id, &row.logical_path, &session.filename)
                .await?;
        match metadata
            .commit_chunked_upload(session.upload_id, row, OffsetDateTime::now_utc())
            .await
        {
            Ok(true) => return Ok(()),
            Ok(false) => {
                return Err(ApiError::QuotaExceeded(format!(
                    "upload of {} bytes no longer fits the remaining quota",
                    row.file_size
                )));
            }
            Err(MetadataError::AlreadyExists(_)) if attempt < NAME_ATTEMPTS => {}
            Err(e) => return Err(e.into()),
        }
    }
    Err(ApiError::Conflict(format!(
        "could not find a free name for '{}'",
        session.filename
    )))
}

/// Cancel a session. Cancelling a finished session is a no-op.
#[tracing::instrument(skip(state, principal), fields(user_id = %principal.user_id))]
pub async fn cancel(state: &AppState, principal: &Principal, upload_id: Uuid) -> ApiResult<()> {
    let session = owned_session(state.metadata.as_ref(), principal, upload_id).await?;
    let cancelled = state
        .metadata
        .finish_session(upload_id, SessionStatus::Cancelled, OffsetDateTime::now_utc())
        .await?;
    if cancelled {
        SESSIONS_CANCELLED.inc();
        tracing::info!(upload_id = %upload_id, "Upload session cancelled");
        spawn_remove_dir(PathBuf::from(&session.temp_dir));
    }
    Ok(())
}

/// Report session progress.
pub async fn status(
    state: &AppState,
    principal: &Principal,
    upload_id: Uuid,
) -> ApiResult<UploadStatusResponse> {
    let session = owned_session(state.metadata.as_ref(), principal, upload_id).await?;
    let chunks = session.chunks()?;
    Ok(UploadStatusResponse {
        upload_id: session.upload_id.to_string(),
        status: session.status()?,
        received_chunks: u32::try_from(session.received_chunks).unwrap_or(u32::MAX),
        total_chunks: u32::try_from(session.total_chunks).unwrap_or(u32::MAX),
        chunks_received: chunks,
        expires_at: session.expires_at,
    })
}

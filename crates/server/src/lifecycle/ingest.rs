//! Streaming multipart ingest.
//!
//! The body is walked once. The `file` part is teed into a local temp file
//! and a sha-256 hasher; the `folder` field is read under its own small cap.
//! Once the bytes are down, quota is admitted, the dedup probe runs and the
//! row is created either `completed` (reused object) or `pending` (queued for
//! the worker pool).

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::lifecycle::namespace::{require_logical_path, unique_display_filename};
use crate::lifecycle::quota;
use crate::lifecycle::temp::remove_file_logged;
use crate::lifecycle::workers::UploadJob;
use crate::metrics::{BYTES_INGESTED, DEDUP_HITS, QUEUE_REJECTIONS, UPLOADS_ACCEPTED};
use crate::state::AppState;
use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use axum::http::StatusCode;
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::error::TrySendError;
use trove_core::path::extension;
use trove_core::{ContentHash, DEFAULT_MIME_TYPE, FileStatus, sanitize_filename};
use trove_metadata::MetadataError;
use trove_metadata::models::FileRow;
use uuid::Uuid;

/// Slack allowed over `max_upload_size` for multipart framing and the folder field.
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Inserts retried when a concurrent request takes the chosen display name.
pub(crate) const NAME_ATTEMPTS: usize = 3;

/// How an accepted upload was persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestDisposition {
    /// An identical completed object was reused; the row is already `completed`.
    Deduplicated,
    /// The row is `pending` and a worker will store the bytes.
    Queued,
    /// The worker queue refused the job; the row is `failed`.
    QueueFull,
}

/// Result of a streaming upload.
#[derive(Clone, Debug)]
pub struct IngestOutcome {
    pub file: FileRow,
    pub disposition: IngestDisposition,
}

/// Build a fresh `pending` file row. Callers fill in `storage_path`,
/// `temp_path` and the final status.
pub fn new_file_row(
    user_id: Uuid,
    logical_path: &str,
    filename: &str,
    original_filename: &str,
    file_size: i64,
    mime_type: &str,
    hash: &str,
) -> FileRow {
    let now = OffsetDateTime::now_utc();
    FileRow {
        file_id: Uuid::new_v4(),
        user_id,
        storage_path: String::new(),
        logical_path: logical_path.to_string(),
        filename: filename.to_string(),
        original_filename: original_filename.to_string(),
        file_size,
        mime_type: mime_type.to_string(),
        hash: hash.to_string(),
        upload_status: FileStatus::Pending.as_str().to_string(),
        error_message: None,
        temp_path: None,
        trashed_at: None,
        original_logical_path: None,
        trashed_with: None,
        created_at: now,
        updated_at: now,
    }
}

/// Reject a body whose declared length cannot fit before reading any of it.
pub fn check_declared_length(declared: Option<u64>, max_upload_size: u64) -> ApiResult<()> {
    if let Some(len) = declared
        && len > max_upload_size.saturating_add(MULTIPART_OVERHEAD)
    {
        return Err(ApiError::PayloadTooLarge(format!(
            "upload of {len} bytes exceeds the {max_upload_size} byte limit"
        )));
    }
    Ok(())
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(format!("malformed multipart body: {}", e.body_text()))
    }
}

/// The staged `file` part.
struct StagedPart {
    temp: NamedTempFile,
    filename: String,
    mime_type: String,
    size: u64,
    hash: ContentHash,
}

async fn read_folder_field(mut field: Field<'_>, limit: usize) -> ApiResult<String> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if buf.len() + chunk.len() > limit {
            return Err(ApiError::BadRequest(format!(
                "folder field exceeds {limit} bytes"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf).map_err(|_| ApiError::BadRequest("folder is not UTF-8".to_string()))
}

async fn stage_file_part(
    state: &AppState,
    mut field: Field<'_>,
    max_upload_size: u64,
) -> ApiResult<StagedPart> {
    let filename = sanitize_filename(field.file_name().unwrap_or_default())?;
    let mime_type = field
        .content_type()
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string();

    let temp = state
        .temp
        .create_streaming_file()
        .await
        .map_err(|e| ApiError::Internal(format!("failed to create temp file: {e}")))?;
    let handle = temp
        .as_file()
        .try_clone()
        .map_err(|e| ApiError::Internal(format!("failed to open temp file: {e}")))?;
    let mut out = tokio::fs::File::from_std(handle);
    let mut hasher = ContentHash::hasher();

    // Any early return drops `temp`, which removes the partial file.
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if hasher.len() + chunk.len() as u64 > max_upload_size {
            return Err(ApiError::PayloadTooLarge(format!(
                "upload exceeds the {max_upload_size} byte limit"
            )));
        }
        hasher.update(&chunk);
        out.write_all(&chunk)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to write temp file: {e}")))?;
    }
    out.flush()
        .await
        .map_err(|e| ApiError::Internal(format!("failed to write temp file: {e}")))?;

    let size = hasher.len();
    Ok(StagedPart {
        temp,
        filename,
        mime_type,
        size,
        hash: hasher.finalize(),
    })
}

/// Ingest a streaming multipart upload for `principal`.
#[tracing::instrument(skip(state, principal, multipart), fields(user_id = %principal.user_id))]
pub async fn ingest(
    state: &AppState,
    principal: &Principal,
    declared_len: Option<u64>,
    mut multipart: Multipart,
) -> ApiResult<IngestOutcome> {
    let max_upload_size = state.config.uploads.max_upload_size;
    check_declared_length(declared_len, max_upload_size)?;

    let mut folder: Option<String> = None;
    let mut staged: Option<StagedPart> = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("folder") if folder.is_none() => {
                let limit = state.config.uploads.folder_field_limit;
                folder = Some(read_folder_field(field, limit).await?);
            }
            Some("file") if staged.is_none() => {
                staged = Some(stage_file_part(state, field, max_upload_size).await?);
            }
            // Extra parts are skipped unread.
            _ => {}
        }
    }

    let staged =
        staged.ok_or_else(|| ApiError::BadRequest("missing file field".to_string()))?;
    let folder = require_logical_path(folder.as_deref().unwrap_or("/"))?;
    let metadata = state.metadata.as_ref();
    let user_id = principal.user_id;

    // Re-check against the real size; the declared length proves nothing.
    if !quota::reserve(metadata, user_id, staged.size).await? {
        return Err(ApiError::InsufficientStorage(format!(
            "upload of {} bytes exceeds the remaining quota",
            staged.size
        )));
    }
    UPLOADS_ACCEPTED.inc();
    BYTES_INGESTED.inc_by(staged.size);

    match persist(state, user_id, &folder, staged).await {
        Ok(outcome) => Ok(outcome),
        Err((e, size)) => {
            if let Err(debit_err) = quota::debit(metadata, user_id, size).await {
                tracing::error!(error = %debit_err, "Failed to return reserved quota");
            }
            Err(e)
        }
    }
}

/// Create the row for a staged upload. On error, returns the reserved size
/// so the caller can give it back.
async fn persist(
    state: &AppState,
    user_id: Uuid,
    folder: &str,
    staged: StagedPart,
) -> Result<IngestOutcome, (ApiError, i64)> {
    let metadata = state.metadata.as_ref();
    let size = i64::try_from(staged.size).unwrap_or(i64::MAX);
    let hash = staged.hash.to_hex();

    let existing = metadata
        .find_completed_by_hash(user_id, &hash, None)
        .await
        .map_err(|e| (e.into(), size))?;

    let mut row = new_file_row(
        user_id,
        folder,
        &staged.filename,
        &staged.filename,
        size,
        &staged.mime_type,
        &hash,
    );
    let disposition = match &existing {
        Some(existing) => {
            row.storage_path = existing.storage_path.clone();
            row.upload_status = FileStatus::Completed.as_str().to_string();
            IngestDisposition::Deduplicated
        }
        None => {
            row.storage_path = format!("pending-{}{}", row.file_id, extension(&staged.filename));
            row.temp_path = Some(staged.temp.path().display().to_string());
            IngestDisposition::Queued
        }
    };

    insert_with_unique_name(state, &mut row)
        .await
        .map_err(|e| (e, size))?;

    if disposition == IngestDisposition::Deduplicated {
        // Dropping the staged file removes it.
        drop(staged.temp);
        DEDUP_HITS.inc();
        tracing::info!(file_id = %row.file_id, storage_path = %row.storage_path, "Upload deduplicated");
        return Ok(IngestOutcome {
            file: row,
            disposition,
        });
    }

    let temp_path = match staged.temp.into_temp_path().keep() {
        Ok(path) => path,
        Err(e) => {
            let message = format!("failed to keep temp file: {}", e.error);
            mark_failed(state, &mut row, &message).await;
            return Ok(IngestOutcome {
                file: row,
                disposition: IngestDisposition::QueueFull,
            });
        }
    };

    let job = UploadJob {
        file_id: row.file_id,
        temp_path,
    };
    match state.uploads.try_enqueue(job) {
        Ok(()) => {
            tracing::info!(file_id = %row.file_id, size, "Upload queued");
            Ok(IngestOutcome {
                file: row,
                disposition: IngestDisposition::Queued,
            })
        }
        Err(e) => {
            let (job, message) = match e {
                TrySendError::Full(job) => (job, "upload queue is full"),
                TrySendError::Closed(job) => (job, "upload queue is closed"),
            };
            QUEUE_REJECTIONS.inc();
            tracing::warn!(file_id = %row.file_id, reason = message, "Upload rejected by worker queue");
            mark_failed(state, &mut row, message).await;
            remove_file_logged(&job.temp_path).await;
            Ok(IngestOutcome {
                file: row,
                disposition: IngestDisposition::QueueFull,
            })
        }
    }
}

async fn mark_failed(state: &AppState, row: &mut FileRow, message: &str) {
    if let Err(e) = state
        .metadata
        .mark_failed(row.file_id, message, OffsetDateTime::now_utc())
        .await
    {
        tracing::error!(file_id = %row.file_id, error = %e, "Failed to mark upload as failed");
    }
    row.upload_status = FileStatus::Failed.as_str().to_string();
    row.error_message = Some(message.to_string());
    row.temp_path = None;
}

/// Insert `row`, choosing a free display name and retrying when a concurrent
/// request claims it first.
async fn insert_with_unique_name(state: &AppState, row: &mut FileRow) -> ApiResult<()> {
    let desired = row.filename.clone();
    for attempt in 1..=NAME_ATTEMPTS {
        row.filename =
            unique_display_filename(state.metadata.as_ref(), row.user_id, &row.logical_path, &desired)
                .await?;
        match state.metadata.create_file(row).await {
            Ok(()) => return Ok(()),
            Err(MetadataError::AlreadyExists(_)) if attempt < NAME_ATTEMPTS => {
                tracing::debug!(filename = %row.filename, "Display name taken concurrently, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ApiError::Conflict(format!("could not find a free name for '{desired}'")))
}

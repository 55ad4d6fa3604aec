//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use time::OffsetDateTime;
use trove_core::{FileStatus, SessionStatus};
use uuid::Uuid;

// =============================================================================
// Users
// =============================================================================

/// User account with quota counters.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub storage_quota: i64,
    pub storage_used: i64,
    /// Per-user trash retention override, in days.
    pub retention_days: Option<i64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UserRow {
    /// Bytes still available under the quota.
    pub fn remaining_quota(&self) -> u64 {
        (self.storage_quota - self.storage_used).max(0) as u64
    }
}

// =============================================================================
// Files
// =============================================================================

/// File record. `storage_path` is an opaque backend key.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub file_id: Uuid,
    pub user_id: Uuid,
    pub storage_path: String,
    pub logical_path: String,
    pub filename: String,
    pub original_filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub hash: String,
    pub upload_status: String,
    pub error_message: Option<String>,
    pub temp_path: Option<String>,
    pub trashed_at: Option<OffsetDateTime>,
    pub original_logical_path: Option<String>,
    /// Root folder of the cascade that trashed this file, if any.
    pub trashed_with: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl FileRow {
    pub fn status(&self) -> MetadataResult<FileStatus> {
        FileStatus::parse(&self.upload_status)
            .map_err(|e| MetadataError::Internal(format!("file {}: {e}", self.file_id)))
    }

    pub fn is_trashed(&self) -> bool {
        self.trashed_at.is_some()
    }
}

// =============================================================================
// Folders
// =============================================================================

/// Explicit folder record.
#[derive(Debug, Clone, FromRow)]
pub struct FolderRow {
    pub folder_id: Uuid,
    pub user_id: Uuid,
    pub folder_path: String,
    pub trashed_at: Option<OffsetDateTime>,
    pub original_folder_path: Option<String>,
    pub trashed_with: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Upload Sessions
// =============================================================================

/// Resumable upload session record.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub upload_id: Uuid,
    pub user_id: Uuid,
    pub filename: String,
    pub logical_path: String,
    pub total_size: i64,
    pub chunk_size: i64,
    pub total_chunks: i64,
    pub received_chunks: i64,
    /// Sorted JSON array of received chunk indices.
    pub chunks_received: String,
    pub status: String,
    pub hash: Option<String>,
    pub mime_type: String,
    pub temp_dir: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl UploadSessionRow {
    pub fn status(&self) -> MetadataResult<SessionStatus> {
        SessionStatus::parse(&self.status)
            .map_err(|e| MetadataError::Internal(format!("session {}: {e}", self.upload_id)))
    }

    /// Decode the received chunk set.
    pub fn chunks(&self) -> MetadataResult<Vec<u32>> {
        parse_chunk_set(&self.chunks_received)
    }
}

pub(crate) fn parse_chunk_set(json: &str) -> MetadataResult<Vec<u32>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json)
        .map_err(|e| MetadataError::Internal(format!("corrupt chunks_received: {e}")))
}

// =============================================================================
// Tokens
// =============================================================================

/// Bearer token record. Only the sha-256 of the secret is stored.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
    pub description: Option<String>,
}

impl TokenRow {
    /// Whether the token may authenticate a request at `now`.
    pub fn is_usable(&self, now: OffsetDateTime) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|exp| exp > now)
    }
}

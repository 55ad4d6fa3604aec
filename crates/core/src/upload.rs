//! Upload session types and lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::UploadSession(format!("invalid upload ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UploadId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload session status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is open and accepting chunks.
    Active,
    /// A `complete` call holds the session while it assembles and stores.
    Completing,
    /// Chunks were assembled into a file.
    Completed,
    /// Session was cancelled by its owner.
    Cancelled,
    /// Session outlived its deadline.
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "completing" => Ok(Self::Completing),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(crate::Error::InvalidStatus(format!(
                "unknown session status: {other}"
            ))),
        }
    }

    /// Check if the session can still receive chunks.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insert a chunk index into a sorted set. Returns `false` when already present.
pub fn insert_chunk(received: &mut Vec<u32>, index: u32) -> bool {
    match received.binary_search(&index) {
        Ok(_) => false,
        Err(pos) => {
            received.insert(pos, index);
            true
        }
    }
}

/// Whether `received` is exactly `[0, total)`. Duplicates paired with gaps fail
/// this check even when the count matches.
pub fn is_complete_set(received: &[u32], total: u32) -> bool {
    let mut sorted = received.to_vec();
    sorted.sort_unstable();
    sorted.len() == total as usize && sorted.iter().enumerate().all(|(i, &c)| c as usize == i)
}

/// Request body for session init.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitUploadRequest {
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    #[serde(default)]
    pub logical_path: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Client-declared sha-256 (hex) of the whole file.
    #[serde(default)]
    pub hash: Option<String>,
}

/// Response for session init.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitUploadResponse {
    pub upload_id: String,
    pub chunks_received: Vec<u32>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Acknowledgement for an accepted chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkAck {
    pub chunk: u32,
    pub received_chunks: u32,
    pub total_chunks: u32,
}

/// Response for a completed session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    pub file_id: String,
    pub filename: String,
    pub size: u64,
    pub hash: String,
}

/// Session progress as reported to clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub upload_id: String,
    pub status: SessionStatus,
    pub received_chunks: u32,
    pub total_chunks: u32,
    pub chunks_received: Vec<u32>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::{FileRow, UploadSessionRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use trove_core::SessionStatus;
use uuid::Uuid;

/// Repository for resumable upload sessions.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Create a new upload session.
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()>;

    /// Get an upload session by ID.
    async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>>;

    /// Add `chunk` to the received set of an active session.
    ///
    /// The read-modify-write of `chunks_received` runs in a transaction that takes
    /// the write lock before reading, so concurrent calls never lose an index.
    /// Re-recording a chunk is a no-op. Fails with `NotFound` for unknown sessions
    /// and `InvalidStateTransition` for non-active ones. Returns the updated row.
    async fn record_chunk(
        &self,
        upload_id: Uuid,
        chunk: u32,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<UploadSessionRow>;

    /// Move an active session to `status`. Returns `false` if it was not active.
    async fn finish_session(
        &self,
        upload_id: Uuid,
        status: SessionStatus,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Move an active session to `completing`. Only one caller can win the claim;
    /// the rest get `false`.
    async fn claim_session(&self, upload_id: Uuid, updated_at: OffsetDateTime)
    -> MetadataResult<bool>;

    /// Hand a `completing` session back to `active` after a failed completion.
    async fn release_session(&self, upload_id: Uuid, updated_at: OffsetDateTime)
    -> MetadataResult<()>;

    /// Return every `completing` session to `active`. Run at startup, when no
    /// completion can still be in flight. Returns how many were released.
    async fn release_claimed_sessions(&self, updated_at: OffsetDateTime) -> MetadataResult<u64>;

    /// In one transaction: mark a `completing` session completed, insert the
    /// assembled file and credit its size to the owner.
    ///
    /// The credit is admitted against the quota like `try_reserve_quota`. Returns
    /// `false` and changes nothing when the file no longer fits.
    async fn commit_chunked_upload(
        &self,
        upload_id: Uuid,
        file: &FileRow,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Active sessions whose deadline passed.
    async fn list_expired_active_sessions(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Sessions owned by a user, any status.
    async fn list_user_sessions(&self, user_id: Uuid) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Hard-delete terminal sessions last updated before `cutoff`.
    async fn delete_terminal_sessions_before(&self, cutoff: OffsetDateTime)
    -> MetadataResult<u64>;
}

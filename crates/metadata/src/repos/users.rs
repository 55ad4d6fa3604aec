//! User and quota repository.

use crate::error::MetadataResult;
use crate::models::UserRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for user accounts and quota counters.
///
/// Quota mutations are single atomic statements on the `storage_used` column;
/// callers never read-modify-write it.
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Create a user. Duplicate username or email fails with `AlreadyExists`.
    async fn create_user(&self, user: &UserRow) -> MetadataResult<()>;

    /// Get a user by ID.
    async fn get_user(&self, user_id: Uuid) -> MetadataResult<Option<UserRow>>;

    /// Get a user by username.
    async fn get_user_by_username(&self, username: &str) -> MetadataResult<Option<UserRow>>;

    /// List all users ordered by username.
    async fn list_users(&self) -> MetadataResult<Vec<UserRow>>;

    /// Page through users ordered by ID, starting after `after`.
    async fn list_users_page(&self, after: Option<Uuid>, limit: u32)
    -> MetadataResult<Vec<UserRow>>;

    /// Replace the password hash.
    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Set the storage quota.
    async fn set_quota(
        &self,
        user_id: Uuid,
        storage_quota: i64,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete a user. Files, folders, sessions and tokens cascade.
    async fn delete_user(&self, user_id: Uuid) -> MetadataResult<()>;

    /// Admit and credit `bytes` in one statement.
    /// Returns `false` (and changes nothing) when it would exceed the quota.
    async fn try_reserve_quota(&self, user_id: Uuid, bytes: i64) -> MetadataResult<bool>;

    /// `storage_used -= bytes`, saturating at zero.
    async fn debit_quota(&self, user_id: Uuid, bytes: i64) -> MetadataResult<()>;

    /// Recompute `storage_used` from every non-failed file row, trashed rows
    /// included. Returns the new value.
    async fn recalculate_usage(&self, user_id: Uuid) -> MetadataResult<i64>;
}

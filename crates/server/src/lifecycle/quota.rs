//! Quota accounting.
//!
//! `storage_used` is only ever changed by single atomic statements in the
//! index. This module converts sizes and maps outcomes onto API errors.

use crate::error::{ApiError, ApiResult};
use trove_metadata::MetadataStore;
use trove_metadata::models::UserRow;
use uuid::Uuid;

/// Convert a byte count to the signed column type.
pub fn to_db_size(bytes: u64) -> ApiResult<i64> {
    i64::try_from(bytes).map_err(|_| ApiError::BadRequest(format!("size {bytes} is too large")))
}

/// Whether `bytes` more would still fit under the user's quota.
pub fn has_headroom(user: &UserRow, bytes: u64) -> bool {
    match i64::try_from(bytes) {
        Ok(bytes) => user
            .storage_used
            .checked_add(bytes)
            .is_some_and(|total| total <= user.storage_quota),
        Err(_) => false,
    }
}

/// Admit and credit `bytes` in one statement. Returns `false` when the
/// upload would exceed the quota; nothing is credited then.
pub async fn reserve(metadata: &dyn MetadataStore, user_id: Uuid, bytes: u64) -> ApiResult<bool> {
    Ok(metadata
        .try_reserve_quota(user_id, to_db_size(bytes)?)
        .await?)
}

/// `storage_used -= bytes`, saturating at zero.
pub async fn debit(metadata: &dyn MetadataStore, user_id: Uuid, bytes: i64) -> ApiResult<()> {
    if bytes <= 0 {
        return Ok(());
    }
    metadata.debit_quota(user_id, bytes).await?;
    Ok(())
}

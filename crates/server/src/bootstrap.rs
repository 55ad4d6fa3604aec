//! Admin account and token initialization.

use crate::password::UNUSABLE_PASSWORD;
use anyhow::{Result, bail};
use time::OffsetDateTime;
use trove_core::config::{AdminConfig, QuotaConfig};
use trove_metadata::MetadataStore;
use trove_metadata::models::{TokenRow, UserRow};
use uuid::Uuid;

/// Normalize a configured token hash to lowercase hex without a `sha256:` prefix.
fn normalize_token_hash(raw: &str) -> Result<String> {
    // Lowercase to match auth::hash_token output.
    let hash = raw.strip_prefix("sha256:").unwrap_or(raw).to_lowercase();
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid admin token_hash: expected 64 hex chars");
    }
    Ok(hash)
}

/// Ensure the configured admin user exists. New admins get an unusable
/// password until one is set through the admin API.
async fn ensure_admin_user(
    metadata: &dyn MetadataStore,
    config: &AdminConfig,
    quota: &QuotaConfig,
) -> Result<UserRow> {
    if let Some(user) = metadata.get_user_by_username(&config.username).await? {
        if !user.is_admin {
            bail!(
                "configured admin username '{}' belongs to a non-admin user",
                config.username
            );
        }
        return Ok(user);
    }

    let now = OffsetDateTime::now_utc();
    let user = UserRow {
        user_id: Uuid::new_v4(),
        username: config.username.clone(),
        email: config.email.clone(),
        password_hash: UNUSABLE_PASSWORD.to_string(),
        is_admin: true,
        storage_quota: i64::try_from(quota.default_user_quota).unwrap_or(i64::MAX),
        storage_used: 0,
        retention_days: None,
        created_at: now,
        updated_at: now,
    };
    metadata.create_user(&user).await?;
    tracing::info!(user_id = %user.user_id, username = %user.username, "Admin user created");
    Ok(user)
}

/// Ensure the admin user and its bootstrap token exist, rotating the previous
/// token when the configured hash changes.
pub async fn ensure_admin(
    metadata: &dyn MetadataStore,
    config: &AdminConfig,
    quota: &QuotaConfig,
) -> Result<()> {
    let hash = normalize_token_hash(&config.token_hash)?;
    let admin = ensure_admin_user(metadata, config, quota).await?;

    if let Some(existing) = metadata.get_token_by_hash(&hash).await? {
        if existing.user_id != admin.user_id {
            bail!(
                "admin token hash is already bound to another user (token id={})",
                existing.token_id
            );
        }
        if existing.revoked_at.is_some() {
            bail!(
                "admin token hash matches a revoked token (id={}); \
                 use a new token hash",
                existing.token_id
            );
        }
        let now = OffsetDateTime::now_utc();
        if let Some(expires_at) = existing.expires_at
            && expires_at <= now
        {
            bail!(
                "admin token hash matches an expired token (id={}, expired={}); \
                 use a new token hash",
                existing.token_id,
                expires_at
            );
        }
        metadata.set_bootstrap_token_id(existing.token_id).await?;
        tracing::debug!("Admin token already exists");
        return Ok(());
    }

    let now = OffsetDateTime::now_utc();
    if let Some(prev_id) = metadata.get_bootstrap_token_id().await? {
        metadata.revoke_token(prev_id, now).await?;
        tracing::info!(token_id = %prev_id, "Previous admin token revoked");
    }

    let token = TokenRow {
        token_id: Uuid::new_v4(),
        user_id: admin.user_id,
        token_hash: hash,
        expires_at: None,
        revoked_at: None,
        created_at: now,
        last_used_at: None,
        description: Some("bootstrap admin token".to_string()),
    };
    metadata.create_token(&token).await?;
    metadata.set_bootstrap_token_id(token.token_id).await?;
    tracing::info!(token_id = %token.token_id, "Admin token created");

    Ok(())
}

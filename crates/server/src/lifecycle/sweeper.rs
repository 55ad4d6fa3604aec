//! Background sweepers: trash retention and upload-session expiry.
//!
//! Each sweeper runs on a fixed interval and exits when the shutdown channel
//! flips to `true`. A running pass is never interrupted; per-item failures are
//! logged, counted and skipped.

use crate::error::ApiResult;
use crate::lifecycle::chunked::expire_session;
use crate::lifecycle::trash::{purge_folder, reclaim_file};
use crate::metrics::{SWEEP_DURATION, record_sweep_error};
use crate::state::AppState;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use trove_metadata::MetadataStore;
use trove_metadata::models::UserRow;
use trove_storage::ObjectStore;

/// Expired sessions handled per pass.
const SESSION_BATCH: u32 = 500;

/// Totals of one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub users: u64,
    pub files: u64,
    pub folders: u64,
    pub errors: u64,
}

/// Totals of one session pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSweepReport {
    pub expired: u64,
    pub deleted: u64,
    pub errors: u64,
}

/// Retention in days for a user, or `None` when trash is kept forever.
fn retention_days(user: &UserRow, default_days: u32) -> Option<i64> {
    let days = user.retention_days.unwrap_or(i64::from(default_days));
    (days > 0).then_some(days)
}

/// One retention pass over every user, paging by user id.
pub async fn run_retention_sweep(
    metadata: &dyn MetadataStore,
    storage: &dyn ObjectStore,
    default_days: u32,
    page_size: u32,
) -> ApiResult<RetentionReport> {
    let started = Instant::now();
    let now = OffsetDateTime::now_utc();
    let page_size = page_size.max(1);
    let mut report = RetentionReport::default();
    let mut after = None;

    loop {
        let users = metadata.list_users_page(after, page_size).await?;
        let Some(last) = users.last() else {
            break;
        };
        after = Some(last.user_id);

        for user in &users {
            let Some(days) = retention_days(user, default_days) else {
                continue;
            };
            report.users += 1;
            let cutoff = now - time::Duration::days(days);
            sweep_user(metadata, storage, user, cutoff, page_size, &mut report).await;
        }

        if users.len() < page_size as usize {
            break;
        }
    }

    SWEEP_DURATION.observe(started.elapsed().as_secs_f64());
    if report.files > 0 || report.folders > 0 || report.errors > 0 {
        tracing::info!(
            users = report.users,
            files = report.files,
            folders = report.folders,
            errors = report.errors,
            "Retention sweep completed"
        );
    }
    Ok(report)
}

async fn sweep_user(
    metadata: &dyn MetadataStore,
    storage: &dyn ObjectStore,
    user: &UserRow,
    cutoff: OffsetDateTime,
    page_size: u32,
    report: &mut RetentionReport,
) {
    loop {
        let files = match metadata
            .list_expired_trashed_files(user.user_id, cutoff, page_size)
            .await
        {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(user_id = %user.user_id, error = %e, "Failed to list expired trash");
                record_sweep_error("retention");
                report.errors += 1;
                return;
            }
        };
        if files.is_empty() {
            break;
        }

        let mut progressed = false;
        for file in &files {
            match reclaim_file(metadata, storage, file.file_id).await {
                Ok(Some(_)) => {
                    report.files += 1;
                    progressed = true;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(file_id = %file.file_id, error = %e, "Failed to reclaim expired file");
                    record_sweep_error("retention");
                    report.errors += 1;
                }
            }
        }
        if !progressed || files.len() < page_size as usize {
            break;
        }
    }

    let folders = match metadata
        .list_expired_trashed_folders(user.user_id, cutoff, page_size)
        .await
    {
        Ok(folders) => folders,
        Err(e) => {
            tracing::warn!(user_id = %user.user_id, error = %e, "Failed to list expired folders");
            record_sweep_error("retention");
            report.errors += 1;
            return;
        }
    };
    for folder in folders {
        match purge_folder(metadata, storage, folder.folder_id).await {
            Ok(purged) => {
                report.files += purged.files;
                report.folders += purged.folders;
            }
            Err(e) => {
                tracing::warn!(folder_id = %folder.folder_id, error = %e, "Failed to purge expired folder");
                record_sweep_error("retention");
                report.errors += 1;
            }
        }
    }
}

/// Expire overdue active sessions, then drop old terminal session rows.
pub async fn run_session_sweep(
    metadata: &dyn MetadataStore,
    retention: time::Duration,
) -> ApiResult<SessionSweepReport> {
    let started = Instant::now();
    let now = OffsetDateTime::now_utc();
    let mut report = SessionSweepReport::default();

    loop {
        let overdue = metadata
            .list_expired_active_sessions(now, SESSION_BATCH)
            .await?;
        if overdue.is_empty() {
            break;
        }
        let mut progressed = false;
        for session in &overdue {
            match expire_session(metadata, session).await {
                Ok(true) => {
                    report.expired += 1;
                    progressed = true;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(upload_id = %session.upload_id, error = %e, "Failed to expire session");
                    record_sweep_error("sessions");
                    report.errors += 1;
                }
            }
        }
        if !progressed || overdue.len() < SESSION_BATCH as usize {
            break;
        }
    }

    report.deleted = metadata
        .delete_terminal_sessions_before(now - retention)
        .await?;

    SWEEP_DURATION.observe(started.elapsed().as_secs_f64());
    if report.expired > 0 || report.deleted > 0 {
        tracing::info!(
            expired = report.expired,
            deleted = report.deleted,
            errors = report.errors,
            "Session sweep completed"
        );
    }
    Ok(report)
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Spawn the trash retention sweeper.
///
/// The first pass runs at startup, except in the test environment where it
/// would race with test setup.
pub fn spawn_retention_sweeper(
    state: AppState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(state.config.trash.cleanup_interval());
        if state.config.server.is_test() {
            interval.tick().await;
        }
        tracing::info!(
            interval_secs = state.config.trash.cleanup_interval().as_secs(),
            retention_days = state.config.trash.deleted_retention_days,
            "Retention sweeper started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::debug!("Retention sweeper shutting down");
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = run_retention_sweep(
                        state.metadata.as_ref(),
                        state.storage.as_ref(),
                        state.config.trash.deleted_retention_days,
                        state.config.trash.sweep_page_size,
                    )
                    .await
                    {
                        tracing::error!(error = %e, "Retention sweep failed");
                        record_sweep_error("retention");
                    }
                }
            }
        }
    })
}

/// Spawn the upload-session sweeper. It runs once at startup.
pub fn spawn_session_sweeper(
    state: AppState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(state.config.uploads.session_sweep_interval());
        tracing::info!(
            interval_secs = state.config.uploads.session_sweep_interval().as_secs(),
            "Session sweeper started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::debug!("Session sweeper shutting down");
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = run_session_sweep(
                        state.metadata.as_ref(),
                        state.config.uploads.session_retention(),
                    )
                    .await
                    {
                        tracing::error!(error = %e, "Session sweep failed");
                        record_sweep_error("sessions");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(retention_days: Option<i64>) -> UserRow {
        let now = OffsetDateTime::now_utc();
        UserRow {
            user_id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "!".to_string(),
            is_admin: false,
            storage_quota: 100,
            storage_used: 0,
            retention_days,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_retention_days_override() {
        assert_eq!(retention_days(&user(None), 30), Some(30));
        assert_eq!(retention_days(&user(Some(7)), 30), Some(7));
        assert_eq!(retention_days(&user(Some(0)), 30), None);
        assert_eq!(retention_days(&user(None), 0), None);
        assert_eq!(retention_days(&user(Some(-1)), 30), None);
    }
}

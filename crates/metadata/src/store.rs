//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{FileRepo, FolderRepo, TokenRepo, UploadRepo, UserRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    UserRepo + FileRepo + FolderRepo + UploadRepo + TokenRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) a SQLite store and apply the schema.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Path prefixes are matched with LIKE and must not fold case.
            .pragma("case_sensitive_like", "ON")
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers, which is what makes the
            // transactional read-modify-write paths below safe.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::{CascadeCount, Reclaim};
    use time::OffsetDateTime;
    use trove_core::path::descendant_pattern;
    use trove_core::upload::insert_chunk;
    use trove_core::{FileStatus, SessionStatus};
    use uuid::Uuid;

    /// Resolve why a guarded session update touched no rows.
    async fn session_state_error(
        conn: &mut sqlx::SqliteConnection,
        upload_id: Uuid,
        to: SessionStatus,
    ) -> MetadataResult<MetadataError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM upload_sessions WHERE upload_id = ?")
                .bind(upload_id)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(match status {
            None => MetadataError::NotFound(format!("upload session {upload_id} not found")),
            Some(from) => MetadataError::InvalidStateTransition {
                from,
                to: to.as_str().to_string(),
            },
        })
    }

    #[async_trait]
    impl UserRepo for SqliteStore {
        async fn create_user(&self, user: &UserRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO users (
                    user_id, username, email, password_hash, is_admin, storage_quota,
                    storage_used, retention_days, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(user.user_id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.is_admin)
            .bind(user.storage_quota)
            .bind(user.storage_used)
            .bind(user.retention_days)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, || {
                    format!("user '{}' or email '{}'", user.username, user.email)
                })
            })?;
            Ok(())
        }

        async fn get_user(&self, user_id: Uuid) -> MetadataResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_user_by_username(&self, username: &str) -> MetadataResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_users(&self) -> MetadataResult<Vec<UserRow>> {
            let rows = sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY username")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn list_users_page(
            &self,
            after: Option<Uuid>,
            limit: u32,
        ) -> MetadataResult<Vec<UserRow>> {
            let rows = match after {
                Some(after) => {
                    sqlx::query_as::<_, UserRow>(
                        "SELECT * FROM users WHERE user_id > ? ORDER BY user_id LIMIT ?",
                    )
                    .bind(after)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY user_id LIMIT ?")
                        .bind(limit as i64)
                        .fetch_all(&self.pool)
                        .await?
                }
            };
            Ok(rows)
        }

        async fn update_password(
            &self,
            user_id: Uuid,
            password_hash: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result =
                sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE user_id = ?")
                    .bind(password_hash)
                    .bind(updated_at)
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("user {user_id} not found")));
            }
            Ok(())
        }

        async fn set_quota(
            &self,
            user_id: Uuid,
            storage_quota: i64,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result =
                sqlx::query("UPDATE users SET storage_quota = ?, updated_at = ? WHERE user_id = ?")
                    .bind(storage_quota)
                    .bind(updated_at)
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("user {user_id} not found")));
            }
            Ok(())
        }

        async fn delete_user(&self, user_id: Uuid) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM users WHERE user_id = ?")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("user {user_id} not found")));
            }
            Ok(())
        }

        async fn try_reserve_quota(&self, user_id: Uuid, bytes: i64) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE users SET storage_used = storage_used + ?
                WHERE user_id = ? AND storage_used + ? <= storage_quota
                "#,
            )
            .bind(bytes)
            .bind(user_id)
            .bind(bytes)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn debit_quota(&self, user_id: Uuid, bytes: i64) -> MetadataResult<()> {
            sqlx::query(
                r#"
                UPDATE users SET storage_used =
                    CASE WHEN storage_used >= ? THEN storage_used - ? ELSE 0 END
                WHERE user_id = ?
                "#,
            )
            .bind(bytes)
            .bind(bytes)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn recalculate_usage(&self, user_id: Uuid) -> MetadataResult<i64> {
            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(
                r#"
                UPDATE users SET storage_used = (
                    SELECT COALESCE(SUM(file_size), 0) FROM files
                    WHERE files.user_id = users.user_id
                      AND upload_status IN ('pending', 'uploading', 'completed')
                )
                WHERE user_id = ?
                "#,
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("user {user_id} not found")));
            }
            let used: i64 = sqlx::query_scalar("SELECT storage_used FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(used)
        }
    }

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn create_file(&self, file: &FileRow) -> MetadataResult<()> {
            insert_file(&mut *self.pool.acquire().await?, file).await
        }

        async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE file_id = ?")
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_files_in_folder(
            &self,
            user_id: Uuid,
            logical_path: &str,
        ) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                r#"
                SELECT * FROM files
                WHERE user_id = ? AND logical_path = ? AND trashed_at IS NULL
                ORDER BY filename
                "#,
            )
            .bind(user_id)
            .bind(logical_path)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn file_name_exists(
            &self,
            user_id: Uuid,
            logical_path: &str,
            filename: &str,
        ) -> MetadataResult<bool> {
            let exists: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM files
                    WHERE user_id = ? AND logical_path = ? AND filename = ? AND trashed_at IS NULL
                )
                "#,
            )
            .bind(user_id)
            .bind(logical_path)
            .bind(filename)
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        }

        async fn has_files_under(&self, user_id: Uuid, path: &str) -> MetadataResult<bool> {
            let exists: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM files
                    WHERE user_id = ? AND trashed_at IS NULL
                      AND (logical_path = ? OR logical_path LIKE ? ESCAPE '\')
                )
                "#,
            )
            .bind(user_id)
            .bind(path)
            .bind(descendant_pattern(path))
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        }

        async fn list_descendant_file_paths(
            &self,
            user_id: Uuid,
            path: &str,
        ) -> MetadataResult<Vec<String>> {
            let rows: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT DISTINCT logical_path FROM files
                WHERE user_id = ? AND trashed_at IS NULL AND logical_path LIKE ? ESCAPE '\'
                ORDER BY logical_path
                "#,
            )
            .bind(user_id)
            .bind(descendant_pattern(path))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn find_completed_by_hash(
            &self,
            user_id: Uuid,
            hash: &str,
            exclude: Option<Uuid>,
        ) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>(
                r#"
                SELECT * FROM files
                WHERE user_id = ? AND hash = ? AND upload_status = 'completed'
                  AND (? IS NULL OR file_id != ?)
                ORDER BY created_at
                LIMIT 1
                "#,
            )
            .bind(user_id)
            .bind(hash)
            .bind(exclude)
            .bind(exclude)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn mark_uploading(
            &self,
            file_id: Uuid,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE files SET upload_status = ?, updated_at = ? WHERE file_id = ? AND upload_status = ?",
            )
            .bind(FileStatus::Uploading.as_str())
            .bind(updated_at)
            .bind(file_id)
            .bind(FileStatus::Pending.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn mark_completed(
            &self,
            file_id: Uuid,
            storage_path: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE files
                SET storage_path = ?, upload_status = ?, error_message = NULL,
                    temp_path = NULL, updated_at = ?
                WHERE file_id = ?
                "#,
            )
            .bind(storage_path)
            .bind(FileStatus::Completed.as_str())
            .bind(updated_at)
            .bind(file_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {file_id} not found")));
            }
            Ok(())
        }

        async fn mark_failed(
            &self,
            file_id: Uuid,
            error_message: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE files
                SET upload_status = ?, error_message = ?, temp_path = NULL, updated_at = ?
                WHERE file_id = ?
                "#,
            )
            .bind(FileStatus::Failed.as_str())
            .bind(error_message)
            .bind(updated_at)
            .bind(file_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {file_id} not found")));
            }
            Ok(())
        }

        async fn rename_file(
            &self,
            file_id: Uuid,
            filename: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE files SET filename = ?, updated_at = ? WHERE file_id = ? AND trashed_at IS NULL",
            )
            .bind(filename)
            .bind(updated_at)
            .bind(file_id)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_insert(e, || format!("file name '{filename}'")))?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {file_id} not found")));
            }
            Ok(())
        }

        async fn move_file(
            &self,
            file_id: Uuid,
            logical_path: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE files SET logical_path = ?, updated_at = ? WHERE file_id = ? AND trashed_at IS NULL",
            )
            .bind(logical_path)
            .bind(updated_at)
            .bind(file_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, || format!("file name in '{logical_path}'"))
            })?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {file_id} not found")));
            }
            Ok(())
        }

        async fn trash_file(&self, file_id: Uuid, trashed_at: OffsetDateTime) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE files
                SET trashed_at = ?, original_logical_path = logical_path, trashed_with = NULL,
                    updated_at = ?
                WHERE file_id = ? AND trashed_at IS NULL
                "#,
            )
            .bind(trashed_at)
            .bind(trashed_at)
            .bind(file_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {file_id} not found")));
            }
            Ok(())
        }

        async fn restore_file(
            &self,
            file_id: Uuid,
            logical_path: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE files
                SET logical_path = ?, trashed_at = NULL, original_logical_path = NULL,
                    trashed_with = NULL, updated_at = ?
                WHERE file_id = ? AND trashed_at IS NOT NULL
                "#,
            )
            .bind(logical_path)
            .bind(updated_at)
            .bind(file_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, || format!("file name in '{logical_path}'"))
            })?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "trashed file {file_id} not found"
                )));
            }
            Ok(())
        }

        async fn delete_file_and_count_refs(
            &self,
            file_id: Uuid,
        ) -> MetadataResult<Option<Reclaim>> {
            let mut tx = self.pool.begin().await?;

            let file = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE file_id = ?")
                .bind(file_id)
                .fetch_optional(&mut *tx)
                .await?;
            let Some(file) = file else {
                return Ok(None);
            };

            sqlx::query("DELETE FROM files WHERE file_id = ?")
                .bind(file_id)
                .execute(&mut *tx)
                .await?;

            let remaining_refs: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM files WHERE user_id = ? AND storage_path = ?",
            )
            .bind(file.user_id)
            .bind(&file.storage_path)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(Some(Reclaim {
                file,
                remaining_refs,
            }))
        }

        async fn list_trash_root_files(&self, user_id: Uuid) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                r#"
                SELECT * FROM files
                WHERE user_id = ? AND trashed_at IS NOT NULL AND trashed_with IS NULL
                ORDER BY trashed_at DESC
                "#,
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_trashed_files(
            &self,
            user_id: Option<Uuid>,
            limit: u32,
        ) -> MetadataResult<Vec<FileRow>> {
            let rows = match user_id {
                Some(id) => {
                    sqlx::query_as::<_, FileRow>(
                        "SELECT * FROM files WHERE user_id = ? AND trashed_at IS NOT NULL ORDER BY trashed_at LIMIT ?",
                    )
                    .bind(id)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_as::<_, FileRow>(
                        "SELECT * FROM files WHERE trashed_at IS NOT NULL ORDER BY trashed_at LIMIT ?",
                    )
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
                }
            };
            Ok(rows)
        }

        async fn list_files_trashed_with(&self, batch_id: Uuid) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE trashed_with = ? AND trashed_at IS NOT NULL",
            )
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_expired_trashed_files(
            &self,
            user_id: Uuid,
            cutoff: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                r#"
                SELECT * FROM files
                WHERE user_id = ? AND trashed_at IS NOT NULL AND trashed_at < ?
                ORDER BY trashed_at
                LIMIT ?
                "#,
            )
            .bind(user_id)
            .bind(cutoff)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_failed_files(&self, user_id: Uuid) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE user_id = ? AND upload_status = ? ORDER BY updated_at DESC",
            )
            .bind(user_id)
            .bind(FileStatus::Failed.as_str())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_storage_paths(&self, user_id: Uuid) -> MetadataResult<Vec<String>> {
            let rows: Vec<String> = sqlx::query_scalar(
                "SELECT DISTINCT storage_path FROM files WHERE user_id = ? AND upload_status = ?",
            )
            .bind(user_id)
            .bind(FileStatus::Completed.as_str())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn fail_unsettled_files(
            &self,
            error_message: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                r#"
                UPDATE files
                SET upload_status = ?, error_message = ?, temp_path = NULL, updated_at = ?
                WHERE upload_status IN (?, ?)
                "#,
            )
            .bind(FileStatus::Failed.as_str())
            .bind(error_message)
            .bind(updated_at)
            .bind(FileStatus::Pending.as_str())
            .bind(FileStatus::Uploading.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }
    }

    async fn insert_file(conn: &mut sqlx::SqliteConnection, file: &FileRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO files (
                file_id, user_id, storage_path, logical_path, filename, original_filename,
                file_size, mime_type, hash, upload_status, error_message, temp_path,
                trashed_at, original_logical_path, trashed_with, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.file_id)
        .bind(file.user_id)
        .bind(&file.storage_path)
        .bind(&file.logical_path)
        .bind(&file.filename)
        .bind(&file.original_filename)
        .bind(file.file_size)
        .bind(&file.mime_type)
        .bind(&file.hash)
        .bind(&file.upload_status)
        .bind(&file.error_message)
        .bind(&file.temp_path)
        .bind(file.trashed_at)
        .bind(&file.original_logical_path)
        .bind(file.trashed_with)
        .bind(file.created_at)
        .bind(file.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            MetadataError::from_insert(e, || {
                format!("file '{}' in '{}'", file.filename, file.logical_path)
            })
        })?;
        Ok(())
    }

    #[async_trait]
    impl FolderRepo for SqliteStore {
        async fn create_folder(&self, folder: &FolderRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO folders (
                    folder_id, user_id, folder_path, trashed_at, original_folder_path,
                    trashed_with, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(folder.folder_id)
            .bind(folder.user_id)
            .bind(&folder.folder_path)
            .bind(folder.trashed_at)
            .bind(&folder.original_folder_path)
            .bind(folder.trashed_with)
            .bind(folder.created_at)
            .bind(folder.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, || format!("folder '{}'", folder.folder_path))
            })?;
            Ok(())
        }

        async fn get_folder(&self, folder_id: Uuid) -> MetadataResult<Option<FolderRow>> {
            let row = sqlx::query_as::<_, FolderRow>("SELECT * FROM folders WHERE folder_id = ?")
                .bind(folder_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_folder_by_path(
            &self,
            user_id: Uuid,
            path: &str,
        ) -> MetadataResult<Option<FolderRow>> {
            let row = sqlx::query_as::<_, FolderRow>(
                "SELECT * FROM folders WHERE user_id = ? AND folder_path = ? AND trashed_at IS NULL",
            )
            .bind(user_id)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_descendant_folders(
            &self,
            user_id: Uuid,
            path: &str,
        ) -> MetadataResult<Vec<FolderRow>> {
            let rows = sqlx::query_as::<_, FolderRow>(
                r#"
                SELECT * FROM folders
                WHERE user_id = ? AND trashed_at IS NULL AND folder_path LIKE ? ESCAPE '\'
                ORDER BY folder_path
                "#,
            )
            .bind(user_id)
            .bind(descendant_pattern(path))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn rename_folder_cascade(
            &self,
            user_id: Uuid,
            old_path: &str,
            new_path: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<CascadeCount> {
            // substr() counts characters, not bytes.
            let tail_start = old_path.chars().count() as i64 + 1;
            let pattern = descendant_pattern(old_path);
            let conflict = || format!("folder '{new_path}'");

            let mut tx = self.pool.begin().await?;

            let root = sqlx::query(
                "UPDATE folders SET folder_path = ?, updated_at = ? WHERE user_id = ? AND folder_path = ? AND trashed_at IS NULL",
            )
            .bind(new_path)
            .bind(updated_at)
            .bind(user_id)
            .bind(old_path)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::from_insert(e, conflict))?;

            let descendants = sqlx::query(
                r#"
                UPDATE folders SET folder_path = ? || substr(folder_path, ?), updated_at = ?
                WHERE user_id = ? AND trashed_at IS NULL AND folder_path LIKE ? ESCAPE '\'
                "#,
            )
            .bind(new_path)
            .bind(tail_start)
            .bind(updated_at)
            .bind(user_id)
            .bind(&pattern)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::from_insert(e, conflict))?;

            let files = sqlx::query(
                r#"
                UPDATE files SET logical_path = ? || substr(logical_path, ?), updated_at = ?
                WHERE user_id = ? AND trashed_at IS NULL
                  AND (logical_path = ? OR logical_path LIKE ? ESCAPE '\')
                "#,
            )
            .bind(new_path)
            .bind(tail_start)
            .bind(updated_at)
            .bind(user_id)
            .bind(old_path)
            .bind(&pattern)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::from_insert(e, conflict))?;

            tx.commit().await?;
            Ok(CascadeCount {
                folders: root.rows_affected() + descendants.rows_affected(),
                files: files.rows_affected(),
            })
        }

        async fn delete_folder(&self, folder_id: Uuid) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM folders WHERE folder_id = ?")
                .bind(folder_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "folder {folder_id} not found"
                )));
            }
            Ok(())
        }

        async fn trash_folder_cascade(
            &self,
            folder_id: Uuid,
            trashed_at: OffsetDateTime,
        ) -> MetadataResult<CascadeCount> {
            let mut tx = self.pool.begin().await?;

            let root = sqlx::query_as::<_, FolderRow>(
                "SELECT * FROM folders WHERE folder_id = ? AND trashed_at IS NULL",
            )
            .bind(folder_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("folder {folder_id} not found")))?;
            let pattern = descendant_pattern(&root.folder_path);

            sqlx::query(
                r#"
                UPDATE folders
                SET trashed_at = ?, original_folder_path = folder_path, trashed_with = NULL,
                    updated_at = ?
                WHERE folder_id = ?
                "#,
            )
            .bind(trashed_at)
            .bind(trashed_at)
            .bind(folder_id)
            .execute(&mut *tx)
            .await?;

            let folders = sqlx::query(
                r#"
                UPDATE folders
                SET trashed_at = ?, original_folder_path = folder_path, trashed_with = ?,
                    updated_at = ?
                WHERE user_id = ? AND trashed_at IS NULL AND folder_path LIKE ? ESCAPE '\'
                "#,
            )
            .bind(trashed_at)
            .bind(folder_id)
            .bind(trashed_at)
            .bind(root.user_id)
            .bind(&pattern)
            .execute(&mut *tx)
            .await?;

            let files = sqlx::query(
                r#"
                UPDATE files
                SET trashed_at = ?, original_logical_path = logical_path, trashed_with = ?,
                    updated_at = ?
                WHERE user_id = ? AND trashed_at IS NULL
                  AND (logical_path = ? OR logical_path LIKE ? ESCAPE '\')
                "#,
            )
            .bind(trashed_at)
            .bind(folder_id)
            .bind(trashed_at)
            .bind(root.user_id)
            .bind(&root.folder_path)
            .bind(&pattern)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(CascadeCount {
                folders: folders.rows_affected() + 1,
                files: files.rows_affected(),
            })
        }

        async fn restore_folder_cascade(
            &self,
            folder_id: Uuid,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<CascadeCount> {
            let mut tx = self.pool.begin().await?;

            let root = sqlx::query_as::<_, FolderRow>(
                "SELECT * FROM folders WHERE folder_id = ? AND trashed_at IS NOT NULL AND trashed_with IS NULL",
            )
            .bind(folder_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                MetadataError::NotFound(format!("trashed folder {folder_id} not found"))
            })?;
            let original = root
                .original_folder_path
                .clone()
                .unwrap_or_else(|| root.folder_path.clone());
            let conflict = || format!("folder '{original}'");

            sqlx::query(
                r#"
                UPDATE folders
                SET folder_path = ?, trashed_at = NULL, original_folder_path = NULL,
                    updated_at = ?
                WHERE folder_id = ?
                "#,
            )
            .bind(&original)
            .bind(updated_at)
            .bind(folder_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::from_insert(e, conflict))?;

            let folders = sqlx::query(
                r#"
                UPDATE folders
                SET folder_path = COALESCE(original_folder_path, folder_path), trashed_at = NULL,
                    original_folder_path = NULL, trashed_with = NULL, updated_at = ?
                WHERE trashed_with = ?
                "#,
            )
            .bind(updated_at)
            .bind(folder_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::from_insert(e, conflict))?;

            let files = sqlx::query(
                r#"
                UPDATE files
                SET logical_path = COALESCE(original_logical_path, logical_path), trashed_at = NULL,
                    original_logical_path = NULL, trashed_with = NULL, updated_at = ?
                WHERE trashed_with = ?
                "#,
            )
            .bind(updated_at)
            .bind(folder_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::from_insert(e, conflict))?;

            tx.commit().await?;
            Ok(CascadeCount {
                folders: folders.rows_affected() + 1,
                files: files.rows_affected(),
            })
        }

        async fn purge_folder_batch(&self, folder_id: Uuid) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;
            let members = sqlx::query("DELETE FROM folders WHERE trashed_with = ?")
                .bind(folder_id)
                .execute(&mut *tx)
                .await?;
            let root = sqlx::query("DELETE FROM folders WHERE folder_id = ?")
                .bind(folder_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(members.rows_affected() + root.rows_affected())
        }

        async fn list_trash_root_folders(&self, user_id: Uuid) -> MetadataResult<Vec<FolderRow>> {
            self.list_trashed_root_folders_for(Some(user_id)).await
        }

        async fn list_trashed_root_folders_for(
            &self,
            user_id: Option<Uuid>,
        ) -> MetadataResult<Vec<FolderRow>> {
            let rows = match user_id {
                Some(id) => {
                    sqlx::query_as::<_, FolderRow>(
                        r#"
                        SELECT * FROM folders
                        WHERE user_id = ? AND trashed_at IS NOT NULL AND trashed_with IS NULL
                        ORDER BY trashed_at DESC
                        "#,
                    )
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_as::<_, FolderRow>(
                        r#"
                        SELECT * FROM folders
                        WHERE trashed_at IS NOT NULL AND trashed_with IS NULL
                        ORDER BY trashed_at DESC
                        "#,
                    )
                    .fetch_all(&self.pool)
                    .await?
                }
            };
            Ok(rows)
        }

        async fn list_expired_trashed_folders(
            &self,
            user_id: Uuid,
            cutoff: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<FolderRow>> {
            let rows = sqlx::query_as::<_, FolderRow>(
                r#"
                SELECT * FROM folders
                WHERE user_id = ? AND trashed_at IS NOT NULL AND trashed_with IS NULL
                  AND trashed_at < ?
                ORDER BY trashed_at
                LIMIT ?
                "#,
            )
            .bind(user_id)
            .bind(cutoff)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl UploadRepo for SqliteStore {
        async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO upload_sessions (
                    upload_id, user_id, filename, logical_path, total_size, chunk_size,
                    total_chunks, received_chunks, chunks_received, status, hash, mime_type,
                    temp_dir, created_at, updated_at, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session.upload_id)
            .bind(session.user_id)
            .bind(&session.filename)
            .bind(&session.logical_path)
            .bind(session.total_size)
            .bind(session.chunk_size)
            .bind(session.total_chunks)
            .bind(session.received_chunks)
            .bind(&session.chunks_received)
            .bind(&session.status)
            .bind(&session.hash)
            .bind(&session.mime_type)
            .bind(&session.temp_dir)
            .bind(session.created_at)
            .bind(session.updated_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, || format!("upload session {}", session.upload_id))
            })?;
            Ok(())
        }

        async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>> {
            let row = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn record_chunk(
            &self,
            upload_id: Uuid,
            chunk: u32,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<UploadSessionRow> {
            let mut tx = self.pool.begin().await?;

            // Writing first takes the database write lock before the read below.
            let touched = sqlx::query(
                "UPDATE upload_sessions SET updated_at = ? WHERE upload_id = ? AND status = 'active'",
            )
            .bind(updated_at)
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
            if touched.rows_affected() == 0 {
                return Err(session_state_error(&mut *tx, upload_id, SessionStatus::Active).await?);
            }

            let mut session = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_one(&mut *tx)
            .await?;

            if i64::from(chunk) >= session.total_chunks {
                return Err(MetadataError::Internal(format!(
                    "chunk {chunk} out of range for session {upload_id}"
                )));
            }

            let mut received = session.chunks()?;
            if insert_chunk(&mut received, chunk) {
                let json = serde_json::to_string(&received)
                    .map_err(|e| MetadataError::Internal(e.to_string()))?;
                sqlx::query(
                    "UPDATE upload_sessions SET chunks_received = ?, received_chunks = ? WHERE upload_id = ?",
                )
                .bind(&json)
                .bind(received.len() as i64)
                .bind(upload_id)
                .execute(&mut *tx)
                .await?;
                session.chunks_received = json;
                session.received_chunks = received.len() as i64;
            }

            tx.commit().await?;
            Ok(session)
        }

        async fn finish_session(
            &self,
            upload_id: Uuid,
            status: SessionStatus,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE upload_sessions SET status = ?, updated_at = ? WHERE upload_id = ? AND status = 'active'",
            )
            .bind(status.as_str())
            .bind(updated_at)
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn claim_session(
            &self,
            upload_id: Uuid,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE upload_sessions SET status = 'completing', updated_at = ? WHERE upload_id = ? AND status = 'active'",
            )
            .bind(updated_at)
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn release_session(
            &self,
            upload_id: Uuid,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE upload_sessions SET status = 'active', updated_at = ? WHERE upload_id = ? AND status = 'completing'",
            )
            .bind(updated_at)
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn release_claimed_sessions(&self, updated_at: OffsetDateTime) -> MetadataResult<u64> {
            let result = sqlx::query(
                "UPDATE upload_sessions SET status = 'active', updated_at = ? WHERE status = 'completing'",
            )
            .bind(updated_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }

        async fn commit_chunked_upload(
            &self,
            upload_id: Uuid,
            file: &FileRow,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(
                "UPDATE upload_sessions SET status = 'completed', updated_at = ? WHERE upload_id = ? AND status = 'completing'",
            )
            .bind(updated_at)
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(
                    session_state_error(&mut *tx, upload_id, SessionStatus::Completed).await?,
                );
            }

            let credited = sqlx::query(
                r#"
                UPDATE users SET storage_used = storage_used + ?
                WHERE user_id = ? AND storage_used + ? <= storage_quota
                "#,
            )
            .bind(file.file_size)
            .bind(file.user_id)
            .bind(file.file_size)
            .execute(&mut *tx)
            .await?;
            if credited.rows_affected() == 0 {
                // Dropping the transaction rolls the status change back.
                return Ok(false);
            }

            insert_file(&mut *tx, file).await?;

            tx.commit().await?;
            Ok(true)
        }

        async fn list_expired_active_sessions(
            &self,
            now: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows = sqlx::query_as::<_, UploadSessionRow>(
                r#"
                SELECT * FROM upload_sessions
                WHERE status = 'active' AND expires_at < ?
                ORDER BY expires_at
                LIMIT ?
                "#,
            )
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_user_sessions(
            &self,
            user_id: Uuid,
        ) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE user_id = ? ORDER BY created_at",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_terminal_sessions_before(
            &self,
            cutoff: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                "DELETE FROM upload_sessions WHERE status IN ('completed', 'cancelled', 'expired') AND updated_at < ?",
            )
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tokens (
                    token_id, user_id, token_hash, expires_at, revoked_at, created_at,
                    last_used_at, description
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(token.token_id)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(token.expires_at)
            .bind(token.revoked_at)
            .bind(token.created_at)
            .bind(token.last_used_at)
            .bind(&token.description)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_insert(e, || "token hash".to_string()))?;
            Ok(())
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET last_used_at = ? WHERE token_id = ?")
                .bind(used_at)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn revoke_token(
            &self,
            token_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET revoked_at = ? WHERE token_id = ? AND revoked_at IS NULL")
                .bind(revoked_at)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn revoke_user_tokens(
            &self,
            user_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                "UPDATE tokens SET revoked_at = ? WHERE user_id = ? AND revoked_at IS NULL",
            )
            .bind(revoked_at)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }

        async fn get_bootstrap_token_id(&self) -> MetadataResult<Option<Uuid>> {
            let value: Option<Option<String>> =
                sqlx::query_scalar("SELECT bootstrap_token_id FROM bootstrap_state WHERE id = 1")
                    .fetch_optional(&self.pool)
                    .await?;
            value
                .flatten()
                .filter(|id| !id.is_empty())
                .map(|id| {
                    Uuid::parse_str(&id).map_err(|e| {
                        MetadataError::Internal(format!(
                            "invalid bootstrap_token_id uuid '{id}': {e}"
                        ))
                    })
                })
                .transpose()
        }

        async fn set_bootstrap_token_id(&self, token_id: Uuid) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO bootstrap_state (id, bootstrap_token_id)
                VALUES (1, ?)
                ON CONFLICT(id) DO UPDATE
                SET bootstrap_token_id = excluded.bootstrap_token_id
                "#,
            )
            .bind(token_id.to_string())
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }
}

impl std::convert::From<std::io::Error> for crate::MetadataError {
    fn from(e: std::io::Error) -> Self {
        crate::MetadataError::Config(e.to_string())
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id BLOB PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0,
    storage_quota INTEGER NOT NULL CHECK (storage_quota >= 0),
    storage_used INTEGER NOT NULL DEFAULT 0 CHECK (storage_used >= 0),
    retention_days INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Explicit folders. Trashed rows keep their path; only live rows are unique.
CREATE TABLE IF NOT EXISTS folders (
    folder_id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    folder_path TEXT NOT NULL,
    trashed_at TEXT,
    original_folder_path TEXT,
    trashed_with BLOB REFERENCES folders(folder_id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_folders_live_path ON folders(user_id, folder_path) WHERE trashed_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_folders_trashed ON folders(user_id, trashed_at) WHERE trashed_at IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_folders_batch ON folders(trashed_with) WHERE trashed_with IS NOT NULL;

CREATE TABLE IF NOT EXISTS files (
    file_id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    storage_path TEXT NOT NULL,
    logical_path TEXT NOT NULL,
    filename TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    file_size INTEGER NOT NULL CHECK (file_size >= 0),
    mime_type TEXT NOT NULL,
    hash TEXT NOT NULL,
    upload_status TEXT NOT NULL,
    error_message TEXT,
    temp_path TEXT,
    trashed_at TEXT,
    original_logical_path TEXT,
    -- A batch member whose root folder is purged becomes its own trash root.
    trashed_with BLOB REFERENCES folders(folder_id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_files_live_name ON files(user_id, logical_path, filename) WHERE trashed_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_files_hash ON files(user_id, hash, upload_status);
CREATE INDEX IF NOT EXISTS idx_files_storage_path ON files(user_id, storage_path);
CREATE INDEX IF NOT EXISTS idx_files_trashed ON files(user_id, trashed_at) WHERE trashed_at IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_files_batch ON files(trashed_with) WHERE trashed_with IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_files_status ON files(user_id, upload_status);

CREATE TABLE IF NOT EXISTS upload_sessions (
    upload_id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    filename TEXT NOT NULL,
    logical_path TEXT NOT NULL,
    total_size INTEGER NOT NULL CHECK (total_size > 0),
    chunk_size INTEGER NOT NULL CHECK (chunk_size > 0),
    total_chunks INTEGER NOT NULL CHECK (total_chunks > 0),
    received_chunks INTEGER NOT NULL DEFAULT 0,
    chunks_received TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'active',
    hash TEXT,
    mime_type TEXT NOT NULL,
    temp_dir TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    CHECK (received_chunks >= 0 AND received_chunks <= total_chunks)
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_status ON upload_sessions(status, expires_at);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_updated ON upload_sessions(status, updated_at);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_user ON upload_sessions(user_id);

CREATE TABLE IF NOT EXISTS tokens (
    token_id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    token_hash TEXT NOT NULL UNIQUE,
    expires_at TEXT,
    revoked_at TEXT,
    created_at TEXT NOT NULL,
    last_used_at TEXT,
    description TEXT
);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(user_id);

-- Single-row marker for the configured admin token.
CREATE TABLE IF NOT EXISTS bootstrap_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    bootstrap_token_id TEXT
);
"#;

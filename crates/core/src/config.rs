//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Deployment environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    /// Test mode; background sweepers skip their startup run.
    Test,
}

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Deployment environment.
    #[serde(default)]
    pub env: Environment,
    /// Override for the local staging area. Defaults to the OS temp directory.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            env: Environment::default(),
            temp_dir: None,
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Root of all local staging: `{temp_dir or OS temp}/trove-uploads`.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(crate::TEMP_ROOT_NAME)
    }

    pub fn is_test(&self) -> bool {
        self.env == Environment::Test
    }
}

/// Upload ingest configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Hard cap on a streaming upload body, in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Chunk size advertised to resumable clients, in bytes.
    #[serde(default = "default_upload_chunk_size")]
    pub upload_chunk_size: u64,
    /// Lifetime of a resumable session from init, in seconds.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Days a terminal session row is kept before it is hard-deleted.
    #[serde(default = "default_session_retention_days")]
    pub session_retention_days: u32,
    /// Interval between upload-session sweeps, in seconds.
    #[serde(default = "default_session_sweep_interval_secs")]
    pub session_sweep_interval_secs: u64,
    /// Number of upload workers moving staged files into storage.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Capacity of the upload worker queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Size cap for the `folder` form field, in bytes.
    #[serde(default = "default_folder_field_limit")]
    pub folder_field_limit: usize,
}

fn default_max_upload_size() -> u64 {
    10 * GIB
}

fn default_upload_chunk_size() -> u64 {
    10 * MIB
}

fn default_session_timeout_secs() -> u64 {
    86400 // 24 hours
}

fn default_session_retention_days() -> u32 {
    7
}

fn default_session_sweep_interval_secs() -> u64 {
    900 // 15 minutes
}

fn default_worker_count() -> usize {
    3
}

fn default_queue_capacity() -> usize {
    100
}

fn default_folder_field_limit() -> usize {
    1024
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_size: default_max_upload_size(),
            upload_chunk_size: default_upload_chunk_size(),
            session_timeout_secs: default_session_timeout_secs(),
            session_retention_days: default_session_retention_days(),
            session_sweep_interval_secs: default_session_sweep_interval_secs(),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            folder_field_limit: default_folder_field_limit(),
        }
    }
}

impl UploadConfig {
    /// Get the session timeout as a Duration.
    pub fn session_timeout(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.session_timeout_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::days(i64::from(self.session_retention_days))
    }

    pub fn session_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_sweep_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_upload_size == 0 {
            return Err("uploads.max_upload_size must be greater than 0".to_string());
        }
        if self.upload_chunk_size == 0 {
            return Err("uploads.upload_chunk_size must be greater than 0".to_string());
        }
        if self.worker_count == 0 {
            return Err("uploads.worker_count must be at least 1".to_string());
        }
        if self.queue_capacity == 0 {
            // tokio's bounded channel panics on a zero capacity
            return Err("uploads.queue_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Quota configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Quota granted to newly created users, in bytes.
    #[serde(default = "default_user_quota")]
    pub default_user_quota: u64,
}

fn default_user_quota() -> u64 {
    10 * GIB
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_user_quota: default_user_quota(),
        }
    }
}

/// Trash retention configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrashConfig {
    /// Days a trashed item survives before the sweeper purges it. 0 disables purging.
    #[serde(default = "default_deleted_retention_days")]
    pub deleted_retention_days: u32,
    /// Minutes between retention sweeps. Values below 1 are raised to 1.
    #[serde(default = "default_deleted_cleanup_interval_min")]
    pub deleted_cleanup_interval_min: u64,
    /// Users loaded per page while sweeping.
    #[serde(default = "default_sweep_page_size")]
    pub sweep_page_size: u32,
}

fn default_deleted_retention_days() -> u32 {
    30
}

fn default_deleted_cleanup_interval_min() -> u64 {
    60
}

fn default_sweep_page_size() -> u32 {
    100
}

impl Default for TrashConfig {
    fn default() -> Self {
        Self {
            deleted_retention_days: default_deleted_retention_days(),
            deleted_cleanup_interval_min: default_deleted_cleanup_interval_min(),
            sweep_page_size: default_sweep_page_size(),
        }
    }
}

impl TrashConfig {
    /// Sweep interval, never shorter than one minute.
    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.deleted_cleanup_interval_min.max(1) * 60)
    }
}

/// Password and login-session configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Password hashing work factor (Argon2id iterations).
    #[serde(default = "default_password_hash_cost")]
    pub password_hash_cost: u32,
    /// Password hashing memory, in KiB.
    #[serde(default = "default_password_memory_kib")]
    pub password_memory_kib: u32,
    /// Lifetime of a login token, in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_password_hash_cost() -> u32 {
    2
}

fn default_password_memory_kib() -> u32 {
    19456
}

fn default_session_ttl_secs() -> u64 {
    7 * 86400
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password_hash_cost: default_password_hash_cost(),
            password_memory_kib: default_password_memory_kib(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl AuthConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.password_hash_cost == 0 {
            return Err("auth.password_hash_cost must be at least 1".to_string());
        }
        if self.password_memory_kib < 8 {
            return Err("auth.password_memory_kib must be at least 8".to_string());
        }
        Ok(())
    }
}

/// Bootstrap administrator configuration.
///
/// The admin account is created on first start. The token hash binds a bearer
/// token to it; if the hash changes between restarts the previous bootstrap
/// token is revoked.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_username")]
    pub username: String,
    #[serde(default = "default_admin_email")]
    pub email: String,
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_email() -> String {
    "admin@localhost".to_string()
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real token.
    pub fn for_testing() -> Self {
        Self {
            username: default_admin_username(),
            email: default_admin_email(),
            // SHA256 of "test-admin-token"
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs. Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("s3 config requires a bucket name".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err("s3 config requires both access_key_id and secret_access_key \
                         when either is set"
                        .to_string()),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub trash: TrashConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Admin bootstrap configuration (required).
    pub admin: AdminConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata, cheap
    /// password hashing and a dummy admin token.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                env: Environment::Test,
                ..Default::default()
            },
            uploads: UploadConfig::default(),
            quota: QuotaConfig::default(),
            trash: TrashConfig::default(),
            auth: AuthConfig {
                password_hash_cost: 1,
                password_memory_kib: 64,
                ..Default::default()
            },
            admin: AdminConfig::for_testing(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.uploads.validate()?;
        self.auth.validate()?;
        self.storage.validate()?;
        Ok(())
    }
}

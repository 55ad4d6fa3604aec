//! Server test utilities.

use super::fixtures::{BOUNDARY, form_body, multipart_body};
use super::storage::CountingStorage;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION, SET_COOKIE};
use axum::http::{Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use trove_core::config::{AppConfig, MetadataConfig, StorageConfig};
use trove_metadata::models::{FileRow, TokenRow, UserRow};
use trove_metadata::{MetadataStore, SqliteStore};
use trove_server::auth::{generate_token, hash_token};
use trove_server::lifecycle::WorkerPool;
use trove_server::password::hash_password;
use trove_server::{AppState, create_router};
use trove_storage::{FilesystemBackend, ObjectStore};
use uuid::Uuid;

/// Default quota for users created by tests (100 MiB).
pub const TEST_QUOTA: i64 = 100 * 1024 * 1024;

/// A user and a bearer token for it.
#[allow(dead_code)]
#[derive(Clone, Debug)]
pub struct TestUser {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub storage: Arc<CountingStorage>,
    pub pool: WorkerPool,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        // Create storage
        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let backend: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );
        let storage = Arc::new(CountingStorage::new(backend));

        // Create metadata
        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.server.temp_dir = Some(temp_dir.path().join("tmp"));
        config.storage = StorageConfig::Filesystem { path: storage_path };
        config.metadata = MetadataConfig::Sqlite { path: db_path };

        // Apply user modifications
        modifier(&mut config);

        let (pool, uploads) = WorkerPool::start(
            config.uploads.worker_count,
            config.uploads.queue_capacity,
            metadata.clone(),
            storage.clone(),
        );
        let state = AppState::new(config, storage.clone(), metadata, uploads);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            storage,
            pool,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Insert a user with an unusable password and issue it a token.
    pub async fn create_user(&self, username: &str, storage_quota: i64) -> TestUser {
        self.insert_user(username, "!".to_string(), false, storage_quota)
            .await
    }

    /// Insert an administrator and issue it a token.
    pub async fn create_admin(&self, username: &str) -> TestUser {
        self.insert_user(username, "!".to_string(), true, TEST_QUOTA)
            .await
    }

    /// Insert a user who can log in with `password`.
    pub async fn create_user_with_password(&self, username: &str, password: &str) -> TestUser {
        let hash = hash_password(&self.state.config.auth, password).expect("hash password");
        self.insert_user(username, hash, false, TEST_QUOTA).await
    }

    async fn insert_user(
        &self,
        username: &str,
        password_hash: String,
        is_admin: bool,
        storage_quota: i64,
    ) -> TestUser {
        let now = OffsetDateTime::now_utc();
        let user = UserRow {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash,
            is_admin,
            storage_quota,
            storage_used: 0,
            retention_days: None,
            created_at: now,
            updated_at: now,
        };
        self.metadata()
            .create_user(&user)
            .await
            .expect("Failed to create user");

        let token = generate_token();
        let row = TokenRow {
            token_id: Uuid::new_v4(),
            user_id: user.user_id,
            token_hash: hash_token(&token),
            expires_at: None,
            revoked_at: None,
            created_at: now,
            last_used_at: None,
            description: Some("test".to_string()),
        };
        self.metadata()
            .create_token(&row)
            .await
            .expect("Failed to create token");

        TestUser {
            user_id: user.user_id,
            username: username.to_string(),
            token,
        }
    }

    /// Current row of a user.
    pub async fn user(&self, user_id: Uuid) -> UserRow {
        self.metadata()
            .get_user(user_id)
            .await
            .unwrap()
            .expect("user exists")
    }

    /// Current row of a file.
    pub async fn file(&self, file_id: Uuid) -> Option<FileRow> {
        self.metadata().get_file(file_id).await.unwrap()
    }

    /// Non-trashed files of `user` in `folder`.
    pub async fn files_in(&self, user: &TestUser, folder: &str) -> Vec<FileRow> {
        self.metadata()
            .list_files_in_folder(user.user_id, folder)
            .await
            .unwrap()
    }

    /// The one non-trashed file named `filename` in `folder`.
    pub async fn file_named(&self, user: &TestUser, folder: &str, filename: &str) -> FileRow {
        self.files_in(user, folder)
            .await
            .into_iter()
            .find(|f| f.filename == filename)
            .unwrap_or_else(|| panic!("no file {filename} in {folder}"))
    }

    /// Wait until the worker pool has settled every queued upload.
    pub async fn wait_idle(&self) {
        tokio::time::timeout(std::time::Duration::from_secs(10), self.state.uploads.wait_idle())
            .await
            .expect("upload workers did not go idle");
    }

    /// Send a request through the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a request and decode the JSON response body.
    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.send(request).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Authenticated GET returning JSON.
    pub async fn get_json(&self, token: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        self.send_json(request).await
    }

    /// Authenticated JSON request.
    pub async fn json_request(
        &self,
        method: &str,
        token: &str,
        uri: &str,
        body: Value,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send_json(request).await
    }

    /// Authenticated url-encoded form POST.
    pub async fn post_form(
        &self,
        token: &str,
        uri: &str,
        fields: &[(&str, &str)],
    ) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form_body(fields)))
            .unwrap();
        self.send(request).await
    }

    /// Streaming multipart upload through the form endpoint.
    pub async fn upload(
        &self,
        token: &str,
        folder: Option<&str>,
        filename: &str,
        content: &[u8],
    ) -> Response<Body> {
        let body = multipart_body(folder, filename, content);
        let request = Request::builder()
            .method("POST")
            .uri("/files/upload")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header("content-length", body.len())
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    /// Upload, wait for the workers, and return the stored row.
    pub async fn upload_completed(
        &self,
        user: &TestUser,
        folder: &str,
        filename: &str,
        content: &[u8],
    ) -> FileRow {
        let response = self.upload(&user.token, Some(folder), filename, content).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        self.wait_idle().await;
        let file = self.file_named(user, folder, filename).await;
        assert_eq!(file.upload_status, "completed");
        file
    }
}

/// Decode the flash carried by a form redirect as `(kind, message)`.
#[allow(dead_code)]
pub fn flash_of(response: &Response<Body>) -> Option<(String, String)> {
    let cookie = response.headers().get(SET_COOKIE)?.to_str().ok()?;
    let value = cookie.strip_prefix("trove_flash=")?.split(';').next()?;
    let (kind, message) = value.split_once(':')?;
    let message = percent_decode_str(message).decode_utf8().ok()?.into_owned();
    Some((kind.to_string(), message))
}

/// Location header of a redirect.
#[allow(dead_code)]
pub fn location_of(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

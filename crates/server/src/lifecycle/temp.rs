//! Local staging area for upload bytes.
//!
//! Layout under the temp root:
//! - `streaming/` holds one named temp file per in-flight streaming upload.
//! - `{upload_id}/chunk_{i}` holds the chunks of a resumable session.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

const STREAMING_DIR: &str = "streaming";

/// Handle on the temp root. Cheap to clone.
#[derive(Clone, Debug)]
pub struct TempArea {
    root: PathBuf,
}

impl TempArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for streaming uploads.
    pub fn streaming_dir(&self) -> PathBuf {
        self.root.join(STREAMING_DIR)
    }

    /// Working directory of a resumable session.
    pub fn session_dir(&self, upload_id: Uuid) -> PathBuf {
        self.root.join(upload_id.to_string())
    }

    /// File holding chunk `index` inside a session directory.
    pub fn chunk_path(session_dir: &Path, index: u32) -> PathBuf {
        session_dir.join(format!("chunk_{index}"))
    }

    /// Create a staging file for a streaming upload.
    ///
    /// The file is removed when the handle drops unless it is persisted with
    /// `into_temp_path().keep()`, so an aborted request leaves nothing behind.
    pub async fn create_streaming_file(&self) -> io::Result<NamedTempFile> {
        let dir = self.streaming_dir();
        tokio::fs::create_dir_all(&dir).await?;
        tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix("upload-")
                .suffix(".part")
                .tempfile_in(dir)
        })
        .await
        .map_err(io::Error::other)?
    }

    /// Create the working directory of a new session.
    pub async fn create_session_dir(&self, upload_id: Uuid) -> io::Result<PathBuf> {
        let dir = self.session_dir(upload_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}

/// Remove a staged file. Failures are logged, never returned.
pub async fn remove_file_logged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}

/// Remove a session directory and everything in it. Failures are logged.
pub async fn remove_dir_logged(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp directory");
        }
    }
}

/// Schedule removal of a session directory without waiting for it.
pub fn spawn_remove_dir(path: PathBuf) {
    tokio::spawn(async move {
        remove_dir_logged(&path).await;
    });
}

//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use time::OffsetDateTime;
use trove_core::ContentHash;

/// A boxed stream of bytes for streaming reads and writes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Chunk size for streaming reads from local files (64 KiB).
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Longest extension carried over from the original filename into a backend key.
const MAX_KEY_EXTENSION_LEN: usize = 16;

/// Caller-supplied hints for a save.
#[derive(Clone, Debug, Default)]
pub struct SaveOptions {
    /// Name the user uploaded the file as. Only its extension reaches the key.
    pub original_filename: String,
    /// MIME type recorded with the object where the backend supports it.
    pub content_type: String,
}

impl SaveOptions {
    pub fn new(original_filename: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            original_filename: original_filename.into(),
            content_type: content_type.into(),
        }
    }

    /// Lowercased extension (with dot) safe to embed in a key, or empty.
    ///
    /// Only ASCII alphanumerics are allowed, so a hostile filename cannot inject
    /// separators into the backend key.
    pub fn key_extension(&self) -> String {
        let ext = trove_core::path::extension(&self.original_filename);
        let body = ext.trim_start_matches('.');
        if body.is_empty()
            || body.len() > MAX_KEY_EXTENSION_LEN
            || !body.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return String::new();
        }
        format!(".{}", body.to_ascii_lowercase())
    }
}

/// Result of a successful save.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedObject {
    /// Opaque backend key. Durable until `delete(path)` completes.
    pub path: String,
    /// Bytes written.
    pub size: u64,
    /// SHA-256 of the bytes written.
    pub hash: ContentHash,
}

/// Object metadata.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
}

/// Object store trait for the file lifecycle.
///
/// Keys are chosen by the backend on `save`; callers treat them as opaque.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Consume `stream` to EOF and persist it under a fresh backend-chosen key.
    async fn save(&self, stream: ByteStream, options: &SaveOptions) -> StorageResult<SavedObject>;

    /// Open an object for streaming reads. Missing keys fail with `NotFound`.
    async fn open(&self, path: &str) -> StorageResult<ByteStream>;

    /// Get object metadata. Missing keys fail with `NotFound`.
    async fn stat(&self, path: &str) -> StorageResult<ObjectMeta>;

    /// Delete an object. Absent keys succeed silently.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Check if an object exists.
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Get the backend name for logging/metrics.
    fn backend_name(&self) -> &'static str;

    /// Cheap liveness probe.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Stream a local file in [`STREAM_CHUNK_SIZE`] pieces.
pub fn file_stream(file: tokio::fs::File) -> ByteStream {
    use tokio::io::AsyncReadExt;

    let stream = async_stream::try_stream! {
        let mut file = file;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    };
    Box::pin(stream)
}

/// Wrap in-memory bytes as a single-item stream.
pub fn bytes_stream(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_key_extension_filters_unsafe_input() {
        assert_eq!(SaveOptions::new("photo.JPG", "").key_extension(), ".jpg");
        assert_eq!(SaveOptions::new("archive.tar.gz", "").key_extension(), ".gz");
        assert_eq!(SaveOptions::new("README", "").key_extension(), "");
        assert_eq!(SaveOptions::new(".env", "").key_extension(), "");
        assert_eq!(SaveOptions::new("x.a/b", "").key_extension(), "");
        assert_eq!(SaveOptions::new("x.p%2f", "").key_extension(), "");
        assert_eq!(
            SaveOptions::new(format!("x.{}", "a".repeat(17)), "").key_extension(),
            ""
        );
    }

    #[tokio::test]
    async fn test_file_stream_reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data = vec![7u8; STREAM_CHUNK_SIZE * 2 + 3];
        tokio::fs::write(&path, &data).await.unwrap();

        let file = tokio::fs::File::open(&path).await.unwrap();
        let mut stream = file_stream(file);
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(out, data);
    }
}

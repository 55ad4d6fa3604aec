//! Local filesystem storage backend.
//!
//! Objects live at `{root}/{h[0..2]}/{h[2..4]}/{hash}-{id}{ext}`. Writes go to a
//! staging file under `{root}/.staging`, are fsynced, then renamed into place, so a
//! key returned by `save` always names a complete object.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore, SaveOptions, SavedObject, file_stream};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use trove_core::ContentHash;
use uuid::Uuid;

/// Directory under the root that holds in-progress writes.
const STAGING_DIR: &str = ".staging";

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl std::fmt::Debug for FilesystemBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemBackend")
            .field("root", &self.root)
            .finish()
    }
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating the root if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(STAGING_DIR)).await?;
        Ok(Self { root })
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build the key for a freshly written object.
    fn object_key(hash: &ContentHash, ext: &str) -> String {
        let hex = hash.to_hex();
        let id = Uuid::new_v4().simple().to_string();
        format!("{}/{}/{}-{}{}", &hex[0..2], &hex[2..4], hex, &id[..12], ext)
    }

    /// Resolve a key under the root, with path traversal protection.
    ///
    /// Runs on the blocking pool because it may canonicalize paths.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains('\0') || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!("unsafe key: {key:?}")));
        }
        if !Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }
        if key == STAGING_DIR || key.starts_with(&format!("{STAGING_DIR}/")) {
            return Err(StorageError::InvalidKey(format!("reserved key: {key}")));
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize()?;

        // A symlink planted inside the root must not lead outside of it.
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!("symlink target missing: {key}"))
                    } else {
                        StorageError::Io(e)
                    }
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }

        Ok(path)
    }

    /// Stream into `staging`, hashing as we go.
    async fn write_staged(
        staging: &Path,
        mut stream: ByteStream,
    ) -> StorageResult<(u64, ContentHash)> {
        let mut file = fs::File::create(staging).await?;
        let mut hasher = ContentHash::hasher();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        let size = hasher.len();
        Ok((size, hasher.finalize()))
    }

    fn map_not_found(err: std::io::Error, key: &str) -> StorageError {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(err)
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self, stream), fields(backend = "filesystem"))]
    async fn save(&self, stream: ByteStream, options: &SaveOptions) -> StorageResult<SavedObject> {
        let staging = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}.tmp", Uuid::new_v4()));

        let (size, hash) = match Self::write_staged(&staging, stream).await {
            Ok(done) => done,
            Err(e) => {
                let _ = fs::remove_file(&staging).await;
                return Err(e);
            }
        };

        let key = Self::object_key(&hash, &options.key_extension());
        let final_path = self.root.join(&key);
        let placed = async {
            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&staging, &final_path).await
        }
        .await;
        if let Err(e) = placed {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::Io(e));
        }

        tracing::debug!(key = %key, size, hash = %hash, "Object saved");
        Ok(SavedObject {
            path: key,
            size,
            hash,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn open(&self, path: &str) -> StorageResult<ByteStream> {
        let full = self.key_path(path).await?;
        let file = fs::File::open(&full)
            .await
            .map_err(|e| Self::map_not_found(e, path))?;
        Ok(file_stream(file))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn stat(&self, path: &str) -> StorageResult<ObjectMeta> {
        let full = self.key_path(path).await?;
        let metadata = fs::metadata(&full)
            .await
            .map_err(|e| Self::map_not_found(e, path))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, path: &str) -> StorageResult<()> {
        let full = self.key_path(path).await?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;
        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                "storage root is not a directory",
            )));
        }

        // Prove the staging area is writable.
        let probe = self
            .root
            .join(STAGING_DIR)
            .join(format!(".health-{}", Uuid::new_v4()));
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::bytes_stream;
    use bytes::Bytes;
    use tempfile::tempdir;

    async fn read_all(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_save_and_open() {
        let temp = tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();

        let saved = backend
            .save(
                bytes_stream(Bytes::from_static(b"Hello, World!")),
                &SaveOptions::new("hello.txt", "text/plain"),
            )
            .await
            .unwrap();

        assert_eq!(saved.size, 13);
        assert_eq!(
            saved.hash.to_hex(),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
        assert!(saved.path.starts_with("df/fd/dffd6021"));
        assert!(saved.path.ends_with(".txt"));

        let data = read_all(backend.open(&saved.path).await.unwrap()).await;
        assert_eq!(data, b"Hello, World!");

        let meta = backend.stat(&saved.path).await.unwrap();
        assert_eq!(meta.size, 13);
        assert!(meta.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_identical_content_gets_distinct_keys() {
        let temp = tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();
        let opts = SaveOptions::new("x.bin", "application/octet-stream");

        let a = backend
            .save(bytes_stream(Bytes::from_static(b"same")), &opts)
            .await
            .unwrap();
        let b = backend
            .save(bytes_stream(Bytes::from_static(b"same")), &opts)
            .await
            .unwrap();

        assert_ne!(a.path, b.path);
        assert_eq!(a.hash, b.hash);

        backend.delete(&a.path).await.unwrap();
        assert!(!backend.exists(&a.path).await.unwrap());
        assert!(backend.exists(&b.path).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_empty_object() {
        let temp = tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();

        let saved = backend
            .save(
                Box::pin(futures::stream::empty::<StorageResult<Bytes>>()),
                &SaveOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(saved.size, 0);
        assert_eq!(backend.stat(&saved.path).await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_no_staging_file() {
        let temp = tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();

        let stream: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(StorageError::Io(std::io::Error::other("client went away"))),
        ]));
        let result = backend.save(stream, &SaveOptions::default()).await;
        assert!(result.is_err());

        let mut entries = fs::read_dir(temp.path().join(STAGING_DIR)).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp = tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();

        backend.delete("ab/cd/missing").await.unwrap();

        let saved = backend
            .save(bytes_stream(Bytes::from_static(b"x")), &SaveOptions::default())
            .await
            .unwrap();
        backend.delete(&saved.path).await.unwrap();
        backend.delete(&saved.path).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let temp = tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();

        assert!(matches!(
            backend.open("ab/cd/nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            backend.stat("ab/cd/nope").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let temp = tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path().join("store"))
            .await
            .unwrap();

        for key in ["../etc/passwd", "/etc/passwd", "a/../../x", ".staging/x.tmp", ""] {
            assert!(
                matches!(backend.stat(key).await, Err(StorageError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let temp = tempdir().unwrap();
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret"), b"secret").unwrap();

        let root = temp.path().join("store");
        let backend = FilesystemBackend::new(&root).await.unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        assert!(matches!(
            backend.open("link/secret").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_health_check() {
        let temp = tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();
        backend.health_check().await.unwrap();
    }
}

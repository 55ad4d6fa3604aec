//! Storage test utilities.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use trove_storage::{
    ByteStream, ObjectMeta, ObjectStore, SaveOptions, SavedObject, StorageError, StorageResult,
};

/// Wraps a backend and records what the lifecycle asked of it.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct CountingStorage {
    inner: Arc<dyn ObjectStore>,
    saves: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    fail_saves: AtomicBool,
}

#[allow(dead_code)]
impl CountingStorage {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            saves: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Keys passed to `delete`, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// How many times `delete` was called for `path`.
    pub fn delete_calls(&self, path: &str) -> usize {
        self.deleted.lock().unwrap().iter().filter(|p| *p == path).count()
    }

    /// Make every following save fail.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for CountingStorage {
    async fn save(&self, stream: ByteStream, options: &SaveOptions) -> StorageResult<SavedObject> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("injected save failure")));
        }
        let saved = self.inner.save(stream, options).await?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(saved)
    }

    async fn open(&self, path: &str) -> StorageResult<ByteStream> {
        self.inner.open(path).await
    }

    async fn stat(&self, path: &str) -> StorageResult<ObjectMeta> {
        self.inner.stat(path).await
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.deleted.lock().unwrap().push(path.to_string());
        self.inner.delete(path).await
    }

    fn backend_name(&self) -> &'static str {
        "counting"
    }
}

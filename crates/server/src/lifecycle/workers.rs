//! Upload worker pool.
//!
//! Streaming uploads are staged to a local temp file and handed to a fixed set
//! of workers through a bounded queue. Workers move the bytes into the backend
//! and settle the file row as `completed` or `failed`.

use crate::lifecycle::temp::remove_file_logged;
use crate::metrics::{QUEUE_DEPTH, WORKER_FAILURES};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use trove_core::truncate_error_message;
use trove_metadata::MetadataStore;
use trove_metadata::models::FileRow;
use trove_storage::{ObjectStore, SaveOptions, file_stream};
use uuid::Uuid;

/// A staged upload waiting to be written to the backend.
#[derive(Clone, Debug)]
pub struct UploadJob {
    pub file_id: Uuid,
    pub temp_path: PathBuf,
}

/// Sending half of the worker queue, plus a count of unfinished jobs.
#[derive(Clone)]
pub struct UploadQueue {
    sender: mpsc::Sender<UploadJob>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl UploadQueue {
    /// Enqueue without waiting. A full or closed queue hands the job back.
    pub fn try_enqueue(&self, job: UploadJob) -> Result<(), TrySendError<UploadJob>> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.sender.try_send(job) {
            Ok(()) => {
                QUEUE_DEPTH.inc();
                Ok(())
            }
            Err(e) => {
                self.finish_one();
                Err(e)
            }
        }
    }

    /// Jobs enqueued and not yet finished.
    pub fn pending_jobs(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every enqueued job has finished.
    pub async fn wait_idle(&self) {
        loop {
            // Register before checking so a wakeup between the two is not lost.
            let notified = self.idle.notified();
            if self.pending_jobs() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Fixed set of upload workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `count` workers consuming a queue of `capacity` jobs.
    pub fn start(
        count: usize,
        capacity: usize,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
    ) -> (Self, UploadQueue) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue = UploadQueue {
            sender,
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        };
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..count)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    receiver.clone(),
                    shutdown_rx.clone(),
                    queue.clone(),
                    metadata.clone(),
                    storage.clone(),
                ))
            })
            .collect();

        tracing::info!(workers = count, capacity, "Upload worker pool started");
        (
            Self {
                handles,
                shutdown_tx,
            },
            queue,
        )
    }

    /// Close the queue, let the workers drain it and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Upload worker terminated abnormally");
            }
        }
        tracing::info!("Upload worker pool stopped");
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<UploadJob>>>,
    mut shutdown_rx: watch::Receiver<bool>,
    queue: UploadQueue,
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
) {
    loop {
        let next = {
            let mut rx = receiver.lock().await;
            let received = tokio::select! {
                biased;
                job = rx.recv() => Some(job),
                _ = shutdown_rx.changed() => None,
            };
            match received {
                Some(job) => job,
                None => {
                    // Refuse new work; buffered jobs are still handed out.
                    rx.close();
                    rx.recv().await
                }
            }
        };
        let Some(job) = next else {
            tracing::debug!(worker, "Upload worker exiting");
            break;
        };

        QUEUE_DEPTH.dec();
        process_job(metadata.as_ref(), storage.as_ref(), &job).await;
        queue.finish_one();
    }
}

/// Move one staged upload into the backend and settle its row.
///
/// Never returns an error: storage failures become a `failed` row the user
/// can dismiss, and the temp file is removed on every path.
#[tracing::instrument(skip(metadata, storage, job), fields(file_id = %job.file_id))]
pub async fn process_job(metadata: &dyn MetadataStore, storage: &dyn ObjectStore, job: &UploadJob) {
    settle(metadata, storage, job).await;
    remove_file_logged(&job.temp_path).await;
}

async fn settle(metadata: &dyn MetadataStore, storage: &dyn ObjectStore, job: &UploadJob) {
    let file = match metadata.get_file(job.file_id).await {
        Ok(Some(file)) => file,
        Ok(None) => {
            tracing::debug!("File row disappeared before upload, dropping job");
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to load file row for upload");
            return;
        }
    };

    match metadata
        .mark_uploading(file.file_id, OffsetDateTime::now_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(status = %file.upload_status, "File is no longer pending, skipping");
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to mark file as uploading");
            return;
        }
    }

    // A concurrent upload of the same bytes may have completed since ingest.
    match metadata
        .find_completed_by_hash(file.user_id, &file.hash, Some(file.file_id))
        .await
    {
        Ok(Some(existing)) => {
            match metadata
                .mark_completed(
                    file.file_id,
                    &existing.storage_path,
                    OffsetDateTime::now_utc(),
                )
                .await
            {
                Ok(()) => {
                    crate::metrics::DEDUP_HITS.inc();
                    tracing::info!(
                        existing_file_id = %existing.file_id,
                        "Upload deduplicated against existing object"
                    );
                }
                Err(e) => fail(metadata, &file, &format!("Failed to record upload: {e}")).await,
            }
            return;
        }
        Ok(None) => {}
        Err(e) => {
            // Fall through to a plain save; dedup is an optimization here.
            tracing::warn!(error = %e, "Dedup lookup failed, storing a new object");
        }
    }

    let temp = match tokio::fs::File::open(&job.temp_path).await {
        Ok(temp) => temp,
        Err(e) => {
            fail(metadata, &file, &format!("Storage upload failed: {e}")).await;
            return;
        }
    };

    let options = SaveOptions::new(file.original_filename.clone(), file.mime_type.clone());
    let saved = match storage.save(file_stream(temp), &options).await {
        Ok(saved) => saved,
        Err(e) => {
            fail(metadata, &file, &format!("Storage upload failed: {e}")).await;
            return;
        }
    };

    if !saved.hash.matches_hex(&file.hash) {
        discard(storage, &saved.path).await;
        fail(
            metadata,
            &file,
            "Storage upload failed: staged bytes changed before upload",
        )
        .await;
        return;
    }

    if let Err(e) = metadata
        .mark_completed(file.file_id, &saved.path, OffsetDateTime::now_utc())
        .await
    {
        discard(storage, &saved.path).await;
        fail(metadata, &file, &format!("Failed to record upload: {e}")).await;
        return;
    }

    tracing::info!(
        storage_path = %saved.path,
        size = saved.size,
        backend = storage.backend_name(),
        "Upload stored"
    );
}

async fn fail(metadata: &dyn MetadataStore, file: &FileRow, message: &str) {
    WORKER_FAILURES.inc();
    tracing::warn!(error = %message, "Upload failed");
    if let Err(e) = metadata
        .mark_failed(
            file.file_id,
            &truncate_error_message(message),
            OffsetDateTime::now_utc(),
        )
        .await
    {
        tracing::error!(error = %e, "Failed to mark file as failed");
    }
}

async fn discard(storage: &dyn ObjectStore, path: &str) {
    if let Err(e) = storage.delete(path).await {
        tracing::warn!(storage_path = %path, error = %e, "Failed to delete orphaned object");
    }
}

//! Streaming multipart upload of a file that is still being written.
//!
//! # Lifecycle
//!
//! `NotStarted -> Uploading -> Finalizing -> Completed | Aborted`
//!
//! A monitor task polls the file size. Whenever at least one part's worth of
//! new bytes exists past the last upload boundary, exactly `part_size` bytes
//! are read at the boundary and uploaded as the next part. The multipart
//! upload is opened lazily with the first part. [`ChunkedUploader::finish`]
//! uploads the remainder as the last part and completes the upload; any
//! failure aborts it, so an upload is never left open. A completed object
//! whose size does not match the bytes read is deleted again. The first
//! result of `finish` is final: later calls return it unchanged.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use meetrec_common::{MeetrecError, MeetrecResult, UploadConfig};
use meetrec_storage::{CompletedPart, ObjectStore, UploadId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Upload lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    NotStarted,
    Uploading,
    Finalizing,
    Completed,
    Aborted,
}

/// A completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub key: String,
    pub parts: Vec<CompletedPart>,
    pub bytes_uploaded: u64,
    pub etag: String,
}

/// State visible outside the upload lane.
#[derive(Debug)]
struct Shared {
    state: Mutex<UploadState>,
    upload_id: Mutex<Option<UploadId>>,
    bytes_uploaded: AtomicU64,
    parts_uploaded: AtomicU32,
}

impl Shared {
    fn set_state(&self, state: UploadState) {
        *self.state.lock() = state;
    }
}

/// The upload lane. Only one holder at a time reads the file and uploads.
struct Worker {
    store: Arc<dyn ObjectStore>,
    key: String,
    path: PathBuf,
    part_size: u64,
    retry_attempts: u32,
    retry_backoff: Duration,
    shared: Arc<Shared>,
    upload_id: Option<UploadId>,
    parts: Vec<CompletedPart>,
    offset: u64,
    failure: Option<String>,
}

impl Worker {
    async fn file_len(&self) -> MeetrecResult<u64> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Upload every full part available; with `remainder`, also the tail.
    async fn upload_available(&mut self, remainder: bool) -> MeetrecResult<()> {
        let len = self.file_len().await?;
        while len.saturating_sub(self.offset) >= self.part_size {
            self.upload_next(self.part_size).await?;
        }
        if remainder && len > self.offset {
            self.upload_next(len - self.offset).await?;
        }
        Ok(())
    }

    async fn upload_next(&mut self, size: u64) -> MeetrecResult<()> {
        let data = read_range(&self.path, self.offset, size).await?;
        let upload_id = match &self.upload_id {
            Some(id) => id.clone(),
            None => {
                let id = self.store.create_multipart(&self.key).await?;
                tracing::info!(key = %self.key, upload_id = %id, "Multipart upload opened");
                *self.shared.upload_id.lock() = Some(id.clone());
                self.shared.set_state(UploadState::Uploading);
                self.upload_id = Some(id.clone());
                id
            }
        };

        let part_number = self.parts.len() as u32 + 1;
        let part = self.upload_part(&upload_id, part_number, data).await?;
        self.offset += part.size;
        self.shared.bytes_uploaded.store(self.offset, Ordering::SeqCst);
        self.shared.parts_uploaded.store(part_number, Ordering::SeqCst);
        tracing::debug!(key = %self.key, part_number, size = part.size, "Part uploaded");
        self.parts.push(part);
        Ok(())
    }

    async fn upload_part(
        &self,
        upload_id: &UploadId,
        part_number: u32,
        data: Bytes,
    ) -> MeetrecResult<CompletedPart> {
        let mut attempt = 0u32;
        loop {
            match self
                .store
                .upload_part(&self.key, upload_id, part_number, data.clone())
                .await
            {
                Ok(part) => return Ok(part),
                Err(e) if attempt < self.retry_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        key = %self.key,
                        part_number,
                        attempt,
                        error = %e,
                        "Part upload failed, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    return Err(MeetrecError::upload(format!(
                        "part {part_number} of {} failed: {e}",
                        self.key
                    )))
                }
            }
        }
    }

    async fn abort(&mut self) {
        if let Some(upload_id) = self.upload_id.take() {
            match self.store.abort_multipart(&self.key, &upload_id).await {
                Ok(()) => tracing::warn!(key = %self.key, upload_id = %upload_id, "Multipart upload aborted"),
                Err(e) => tracing::error!(
                    key = %self.key,
                    upload_id = %upload_id,
                    error = %e,
                    "Failed to abort multipart upload"
                ),
            }
        }
        *self.shared.upload_id.lock() = None;
        self.shared.set_state(UploadState::Aborted);
    }

    /// Remove a completed object that failed verification.
    async fn discard_object(&self) {
        match self.store.delete(&self.key).await {
            Ok(()) => tracing::warn!(key = %self.key, "Deleted unverified upload"),
            Err(e) => tracing::error!(key = %self.key, error = %e, "Failed to delete unverified upload"),
        }
    }
}

async fn read_range(path: &Path, offset: u64, len: u64) -> MeetrecResult<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Uploads a growing local file to `key` as it is written.
pub struct ChunkedUploader {
    key: String,
    join_timeout: Duration,
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    worker: Arc<tokio::sync::Mutex<Worker>>,
    monitor: Option<JoinHandle<()>>,
    finished: Option<Result<UploadSummary, String>>,
}

impl ChunkedUploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        key: impl Into<String>,
        path: impl Into<PathBuf>,
        config: &UploadConfig,
    ) -> Self {
        let key = key.into();
        let shared = Arc::new(Shared {
            state: Mutex::new(UploadState::NotStarted),
            upload_id: Mutex::new(None),
            bytes_uploaded: AtomicU64::new(0),
            parts_uploaded: AtomicU32::new(0),
        });
        let worker = Worker {
            store,
            key: key.clone(),
            path: path.into(),
            part_size: config.part_size_bytes.max(1),
            retry_attempts: config.part_retry_attempts,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            shared: Arc::clone(&shared),
            upload_id: None,
            parts: Vec::new(),
            offset: 0,
            failure: None,
        };
        Self {
            key,
            join_timeout: Duration::from_secs(config.join_timeout_secs),
            shared,
            stop: Arc::new(AtomicBool::new(false)),
            worker: Arc::new(tokio::sync::Mutex::new(worker)),
            monitor: None,
            finished: None,
        }
    }

    /// Start the background monitor polling every `poll_interval`.
    pub fn start(&mut self, poll_interval: Duration) {
        if self.monitor.is_some() {
            return;
        }
        let worker = Arc::clone(&self.worker);
        let stop = Arc::clone(&self.stop);
        let shared = Arc::clone(&self.shared);
        let key = self.key.clone();
        tracing::info!(key = %key, poll_ms = poll_interval.as_millis() as u64, "Upload monitor started");

        self.monitor = Some(tokio::spawn(async move {
            let mut last_log = Instant::now();
            while !stop.load(Ordering::SeqCst) {
                tokio::time::sleep(poll_interval).await;
                if stop.load(Ordering::SeqCst) {
                    break;
                }

                let mut worker = worker.lock().await;
                if let Err(e) = worker.upload_available(false).await {
                    tracing::error!(key = %key, error = %e, "Streaming upload failed");
                    worker.failure = Some(e.to_string());
                    break;
                }
                drop(worker);

                if last_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                    last_log = Instant::now();
                    tracing::info!(
                        key = %key,
                        parts = shared.parts_uploaded.load(Ordering::SeqCst),
                        bytes = shared.bytes_uploaded.load(Ordering::SeqCst),
                        "Upload progress"
                    );
                }
            }
        }));
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> UploadState {
        *self.shared.state.lock()
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.shared.bytes_uploaded.load(Ordering::SeqCst)
    }

    /// Shared counter of committed bytes, for progress reporting.
    pub fn bytes_uploaded_handle(&self) -> impl Fn() -> u64 + Send + Sync + 'static {
        let shared = Arc::clone(&self.shared);
        move || shared.bytes_uploaded.load(Ordering::SeqCst)
    }

    pub fn parts_uploaded(&self) -> u32 {
        self.shared.parts_uploaded.load(Ordering::SeqCst)
    }

    /// Id of the open multipart upload, if one was opened and not yet closed.
    pub fn upload_id(&self) -> Option<UploadId> {
        self.shared.upload_id.lock().clone()
    }

    /// Signal the monitor and wait for it, bounded by the join timeout. If it
    /// does not finish in time it is cancelled; an interrupted part is
    /// uploaded again from the same boundary.
    async fn stop_monitor(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(mut handle) = self.monitor.take() {
            match tokio::time::timeout(self.join_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(key = %self.key, error = %e, "Upload monitor panicked"),
                Err(_) => {
                    tracing::warn!(
                        key = %self.key,
                        timeout_secs = self.join_timeout.as_secs(),
                        "Upload monitor did not stop in time, cancelling it"
                    );
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }
    }

    /// Upload the remainder, complete the upload, and verify the object.
    ///
    /// Fails without opening an upload if nothing was ever written. Any
    /// other failure aborts the multipart upload.
    pub async fn finish(&mut self) -> MeetrecResult<UploadSummary> {
        if let Some(previous) = &self.finished {
            return previous.clone().map_err(MeetrecError::upload);
        }
        let result = self.finish_once().await;
        self.finished = Some(match &result {
            Ok(summary) => Ok(summary.clone()),
            Err(e) => Err(e.to_string()),
        });
        result
    }

    async fn finish_once(&mut self) -> MeetrecResult<UploadSummary> {
        self.stop_monitor().await;
        self.shared.set_state(UploadState::Finalizing);

        let mut worker = self.worker.lock().await;
        if let Some(failure) = worker.failure.take() {
            worker.abort().await;
            return Err(MeetrecError::upload(failure));
        }

        if let Err(e) = worker.upload_available(true).await {
            worker.abort().await;
            return Err(e);
        }

        let Some(upload_id) = worker.upload_id.clone() else {
            self.shared.set_state(UploadState::Aborted);
            return Err(MeetrecError::upload(format!(
                "nothing was written to {}",
                worker.path.display()
            )));
        };

        let mut parts = worker.parts.clone();
        parts.sort_by_key(|p| p.part_number);
        let info = match worker
            .store
            .complete_multipart(&worker.key, &upload_id, &parts)
            .await
        {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(key = %worker.key, error = %e, "Completing multipart upload failed");
                worker.abort().await;
                return Err(MeetrecError::upload(format!("completion failed: {e}")));
            }
        };
        worker.upload_id = None;
        *self.shared.upload_id.lock() = None;

        match worker.store.head(&worker.key).await {
            Ok(Some(head)) if head.size == worker.offset => {}
            Ok(Some(head)) => {
                worker.discard_object().await;
                self.shared.set_state(UploadState::Aborted);
                return Err(MeetrecError::upload(format!(
                    "{} is {} bytes after upload, expected {}",
                    worker.key, head.size, worker.offset
                )));
            }
            Ok(None) => {
                self.shared.set_state(UploadState::Aborted);
                return Err(MeetrecError::upload(format!(
                    "{} missing after completion",
                    worker.key
                )));
            }
            Err(e) => {
                self.shared.set_state(UploadState::Aborted);
                return Err(e);
            }
        }

        self.shared.set_state(UploadState::Completed);
        tracing::info!(
            key = %worker.key,
            parts = parts.len(),
            bytes = worker.offset,
            "Multipart upload completed"
        );
        Ok(UploadSummary {
            key: worker.key.clone(),
            parts,
            bytes_uploaded: worker.offset,
            etag: info.etag,
        })
    }

    /// Stop the monitor and abort any open upload. A finished upload is left
    /// as it is.
    pub async fn abort(&mut self) {
        if self.finished.is_some() {
            return;
        }
        self.stop_monitor().await;
        self.worker.lock().await.abort().await;
    }
}

impl Drop for ChunkedUploader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

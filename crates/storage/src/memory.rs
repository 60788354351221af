//! In-memory object store with fault injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use meetrec_common::{MeetrecError, MeetrecResult};
use parking_lot::Mutex;

use crate::etag::etag_of;
use crate::store::{validate_key, validate_part_order, CompletedPart, ObjectInfo, ObjectStore, UploadId};

#[derive(Debug)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Bytes>,
    uploads: HashMap<UploadId, PendingUpload>,
    /// Part numbers in the order they were uploaded.
    part_log: Vec<u32>,
}

/// Number of calls made per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create_multipart: u64,
    pub upload_part: u64,
    pub complete_multipart: u64,
    pub abort_multipart: u64,
    pub head: u64,
    pub get: u64,
    pub put: u64,
    pub delete: u64,
}

#[derive(Debug, Default)]
struct Counters {
    create_multipart: AtomicU64,
    upload_part: AtomicU64,
    complete_multipart: AtomicU64,
    abort_multipart: AtomicU64,
    head: AtomicU64,
    get: AtomicU64,
    put: AtomicU64,
    delete: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Object store held in memory.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<State>,
    counters: Counters,
    /// Part number -> remaining failures.
    failing_parts: Mutex<HashMap<u32, u32>>,
    fail_completion: AtomicBool,
    fail_puts: AtomicBool,
    truncate_completed: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upload of `part_number` fails.
    pub fn fail_part(&self, part_number: u32) {
        self.failing_parts.lock().insert(part_number, u32::MAX);
    }

    /// The next `times` uploads of `part_number` fail.
    pub fn fail_part_times(&self, part_number: u32, times: u32) {
        self.failing_parts.lock().insert(part_number, times);
    }

    /// Make `complete_multipart` fail.
    pub fn fail_completion(&self, fail: bool) {
        self.fail_completion.store(fail, Ordering::SeqCst);
    }

    /// Store completed uploads one byte short, like a store that lost data.
    pub fn truncate_completed(&self, truncate: bool) {
        self.truncate_completed.store(truncate, Ordering::SeqCst);
    }

    /// Make `put` fail.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            create_multipart: c.create_multipart.load(Ordering::Relaxed),
            upload_part: c.upload_part.load(Ordering::Relaxed),
            complete_multipart: c.complete_multipart.load(Ordering::Relaxed),
            abort_multipart: c.abort_multipart.load(Ordering::Relaxed),
            head: c.head.load(Ordering::Relaxed),
            get: c.get.load(Ordering::Relaxed),
            put: c.put.load(Ordering::Relaxed),
            delete: c.delete.load(Ordering::Relaxed),
        }
    }

    /// Multipart uploads neither completed nor aborted.
    pub fn open_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    /// Part numbers of successful part uploads, in upload order.
    pub fn uploaded_part_numbers(&self) -> Vec<u32> {
        self.state.lock().part_log.clone()
    }

    /// Contents of `key`, if stored.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state.lock().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }

    fn should_fail_part(&self, part_number: u32) -> bool {
        let mut failing = self.failing_parts.lock();
        match failing.get_mut(&part_number) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                true
            }
            _ => false,
        }
    }
}

fn info(key: &str, data: &Bytes) -> ObjectInfo {
    ObjectInfo {
        key: key.to_string(),
        size: data.len() as u64,
        etag: etag_of(data),
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_multipart(&self, key: &str) -> MeetrecResult<UploadId> {
        bump(&self.counters.create_multipart);
        validate_key(key)?;
        let upload_id = UploadId::generate();
        self.state.lock().uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        data: Bytes,
    ) -> MeetrecResult<CompletedPart> {
        bump(&self.counters.upload_part);
        if part_number == 0 {
            return Err(MeetrecError::storage("part numbers start at 1"));
        }
        if self.should_fail_part(part_number) {
            return Err(MeetrecError::storage(format!(
                "injected failure for part {part_number}"
            )));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| MeetrecError::storage(format!("unknown upload {upload_id}")))?;
        let part = CompletedPart {
            part_number,
            etag: etag_of(&data),
            size: data.len() as u64,
        };
        upload.parts.insert(part_number, data);
        state.part_log.push(part_number);
        Ok(part)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> MeetrecResult<ObjectInfo> {
        bump(&self.counters.complete_multipart);
        if self.fail_completion.load(Ordering::SeqCst) {
            return Err(MeetrecError::storage("injected completion failure"));
        }
        validate_part_order(parts)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let upload = state
            .uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| MeetrecError::storage(format!("unknown upload {upload_id}")))?;

        let mut assembled = BytesMut::new();
        for part in parts {
            let data = upload.parts.get(&part.part_number).ok_or_else(|| {
                MeetrecError::storage(format!("part {} was never uploaded", part.part_number))
            })?;
            if etag_of(data) != part.etag {
                return Err(MeetrecError::storage(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            assembled.extend_from_slice(data);
        }

        if self.truncate_completed.load(Ordering::SeqCst) {
            let len = assembled.len().saturating_sub(1);
            assembled.truncate(len);
        }
        let data = assembled.freeze();
        state.uploads.remove(upload_id);
        state.objects.insert(key.to_string(), data.clone());
        Ok(info(key, &data))
    }

    async fn abort_multipart(&self, key: &str, upload_id: &UploadId) -> MeetrecResult<()> {
        bump(&self.counters.abort_multipart);
        let mut state = self.state.lock();
        let owned = state
            .uploads
            .get(upload_id)
            .is_some_and(|upload| upload.key == key);
        if !owned {
            return Err(MeetrecError::storage(format!("unknown upload {upload_id}")));
        }
        state.uploads.remove(upload_id);
        Ok(())
    }

    async fn head(&self, key: &str) -> MeetrecResult<Option<ObjectInfo>> {
        bump(&self.counters.head);
        Ok(self.state.lock().objects.get(key).map(|data| info(key, data)))
    }

    async fn get(&self, key: &str) -> MeetrecResult<Bytes> {
        bump(&self.counters.get);
        self.state
            .lock()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| MeetrecError::object_not_found(key))
    }

    async fn get_range(&self, key: &str, offset: u64, len: u64) -> MeetrecResult<Bytes> {
        bump(&self.counters.get);
        let data = self
            .state
            .lock()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| MeetrecError::object_not_found(key))?;
        let total = data.len() as u64;
        let start = offset.min(total) as usize;
        let end = offset.saturating_add(len).min(total) as usize;
        Ok(data.slice(start..end))
    }

    async fn put(&self, key: &str, data: Bytes) -> MeetrecResult<ObjectInfo> {
        bump(&self.counters.put);
        validate_key(key)?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(MeetrecError::storage(format!("injected put failure for {key}")));
        }
        let info = info(key, &data);
        self.state.lock().objects.insert(key.to_string(), data);
        Ok(info)
    }

    async fn delete(&self, key: &str) -> MeetrecResult<()> {
        bump(&self.counters.delete);
        self.state.lock().objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> MeetrecResult<Vec<ObjectInfo>> {
        Ok(self
            .state
            .lock()
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, data)| info(key, data))
            .collect())
    }
}

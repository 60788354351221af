//! Directory-backed object store.
//!
//! Objects live at `<root>/<key>`. Multipart uploads are staged under
//! `<root>/.multipart/<upload id>/` and concatenated on completion, then
//! moved into place with a rename so readers never see a partial object.
//!
//! Objects are never read whole to answer `head` or `list`: sizes come from
//! file metadata and etags are remembered when an object is written. An
//! object changed behind the store's back is hashed again in small reads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use meetrec_common::{MeetrecError, MeetrecResult};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::etag::{etag_of, Fnv1a};
use crate::store::{validate_key, validate_part_order, CompletedPart, ObjectInfo, ObjectStore, UploadId};

const STAGING_DIR: &str = ".multipart";
const KEY_FILE: &str = "key";
const HASH_BUFFER_BYTES: usize = 64 * 1024;

/// Etag of an object as last written, valid while size and mtime match.
#[derive(Debug, Clone)]
struct CachedEtag {
    size: u64,
    modified: Option<SystemTime>,
    etag: String,
}

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    etags: Arc<Mutex<HashMap<String, CachedEtag>>>,
}

impl FsObjectStore {
    /// Open (and create) a store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> MeetrecResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self {
            root,
            etags: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of `key`.
    pub fn object_path(&self, key: &str) -> MeetrecResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn staging_path(&self, upload_id: &UploadId) -> MeetrecResult<PathBuf> {
        let id = upload_id.as_str();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(MeetrecError::storage(format!("invalid upload id: {id:?}")));
        }
        Ok(self.root.join(STAGING_DIR).join(id))
    }

    fn part_path(staging: &Path, part_number: u32) -> PathBuf {
        staging.join(format!("part-{part_number:05}"))
    }

    /// Staging directory of an open upload for `key`.
    async fn open_upload(&self, key: &str, upload_id: &UploadId) -> MeetrecResult<PathBuf> {
        let staging = self.staging_path(upload_id)?;
        let owner = tokio::fs::read_to_string(staging.join(KEY_FILE))
            .await
            .map_err(|_| MeetrecError::storage(format!("unknown upload {upload_id}")))?;
        if owner != key {
            return Err(MeetrecError::storage(format!(
                "upload {upload_id} belongs to {owner}, not {key}"
            )));
        }
        Ok(staging)
    }

    /// Fresh scratch file inside the store, on the same filesystem as every
    /// object so a rename moves it into place.
    fn scratch_path(&self) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(format!("put-{}", UploadId::generate()))
    }

    /// Rename `scratch` over the object at `path`.
    async fn move_into_place(&self, scratch: &Path, path: &Path) -> MeetrecResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(scratch, path).await?;
        Ok(())
    }

    /// Record the etag of a freshly written object and describe it.
    async fn remember(&self, key: &str, path: &Path, etag: String) -> MeetrecResult<ObjectInfo> {
        let meta = tokio::fs::metadata(path).await?;
        self.etags.lock().insert(
            key.to_string(),
            CachedEtag {
                size: meta.len(),
                modified: meta.modified().ok(),
                etag: etag.clone(),
            },
        );
        Ok(ObjectInfo {
            key: key.to_string(),
            size: meta.len(),
            etag,
        })
    }

    async fn info_at(&self, key: &str, path: &Path) -> MeetrecResult<ObjectInfo> {
        let meta = tokio::fs::metadata(path).await?;
        let size = meta.len();
        let modified = meta.modified().ok();
        let cached = self
            .etags
            .lock()
            .get(key)
            .filter(|c| c.size == size && c.modified == modified)
            .map(|c| c.etag.clone());

        let etag = match cached {
            Some(etag) => etag,
            None => {
                let etag = hash_file(path).await?;
                self.etags.lock().insert(
                    key.to_string(),
                    CachedEtag {
                        size,
                        modified,
                        etag: etag.clone(),
                    },
                );
                etag
            }
        };
        Ok(ObjectInfo {
            key: key.to_string(),
            size,
            etag,
        })
    }

    /// Remove empty directories between `path` and the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for FsObjectStore {
    async fn create_multipart(&self, key: &str) -> MeetrecResult<UploadId> {
        validate_key(key)?;
        let upload_id = UploadId::generate();
        let staging = self.staging_path(&upload_id)?;
        tokio::fs::create_dir_all(&staging).await?;
        tokio::fs::write(staging.join(KEY_FILE), key).await?;
        tracing::debug!(key, upload_id = %upload_id, "Multipart upload created");
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        data: Bytes,
    ) -> MeetrecResult<CompletedPart> {
        if part_number == 0 {
            return Err(MeetrecError::storage("part numbers start at 1"));
        }
        let staging = self.open_upload(key, upload_id).await?;
        tokio::fs::write(Self::part_path(&staging, part_number), &data).await?;
        Ok(CompletedPart {
            part_number,
            etag: etag_of(&data),
            size: data.len() as u64,
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> MeetrecResult<ObjectInfo> {
        validate_part_order(parts)?;
        let staging = self.open_upload(key, upload_id).await?;
        let assembled = staging.join("assembled");

        let mut out = tokio::fs::File::create(&assembled).await?;
        let mut hasher = Fnv1a::new();
        let mut size = 0u64;
        for part in parts {
            let data = tokio::fs::read(Self::part_path(&staging, part.part_number))
                .await
                .map_err(|_| {
                    MeetrecError::storage(format!("part {} was never uploaded", part.part_number))
                })?;
            if etag_of(&data) != part.etag {
                return Err(MeetrecError::storage(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            hasher.update(&data);
            size += data.len() as u64;
            out.write_all(&data).await?;
        }
        out.flush().await?;
        drop(out);

        let path = self.object_path(key)?;
        self.move_into_place(&assembled, &path).await?;
        tokio::fs::remove_dir_all(&staging).await?;

        tracing::debug!(key, upload_id = %upload_id, parts = parts.len(), size, "Multipart upload completed");
        self.remember(key, &path, hasher.hex()).await
    }

    async fn abort_multipart(&self, key: &str, upload_id: &UploadId) -> MeetrecResult<()> {
        let staging = self.open_upload(key, upload_id).await?;
        tokio::fs::remove_dir_all(&staging).await?;
        tracing::debug!(key, upload_id = %upload_id, "Multipart upload aborted");
        Ok(())
    }

    async fn head(&self, key: &str) -> MeetrecResult<Option<ObjectInfo>> {
        let path = self.object_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => self.info_at(key, &path).await.map(Some),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> MeetrecResult<Bytes> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MeetrecError::object_not_found(key))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_range(&self, key: &str, offset: u64, len: u64) -> MeetrecResult<Bytes> {
        let path = self.object_path(key)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MeetrecError::object_not_found(key))
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.take(len).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn put(&self, key: &str, data: Bytes) -> MeetrecResult<ObjectInfo> {
        let path = self.object_path(key)?;
        let scratch = self.scratch_path();
        tokio::fs::write(&scratch, &data).await?;
        self.move_into_place(&scratch, &path).await?;
        self.remember(key, &path, etag_of(&data)).await
    }

    async fn download_to(&self, key: &str, path: &Path) -> MeetrecResult<u64> {
        let source = self.object_path(key)?;
        match tokio::fs::copy(&source, path).await {
            Ok(copied) => Ok(copied),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !source.exists() => {
                Err(MeetrecError::object_not_found(key))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upload_from(&self, key: &str, path: &Path) -> MeetrecResult<ObjectInfo> {
        let target = self.object_path(key)?;
        let etag = match hash_file(path).await {
            Ok(etag) => etag,
            Err(MeetrecError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MeetrecError::FileNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e),
        };
        let scratch = self.scratch_path();
        tokio::fs::copy(path, &scratch).await?;
        self.move_into_place(&scratch, &target).await?;
        self.remember(key, &target, etag).await
    }

    async fn delete(&self, key: &str) -> MeetrecResult<()> {
        let path = self.object_path(key)?;
        self.etags.lock().remove(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_parents(&path).await;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> MeetrecResult<Vec<ObjectInfo>> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if dir == self.root && entry.file_name() == STAGING_DIR {
                        continue;
                    }
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    found.push(self.info_at(&key, &path).await?);
                }
            }
        }
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }
}

/// FNV-1a etag of a file, read in small pieces.
async fn hash_file(path: &Path) -> MeetrecResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Fnv1a::new();
    let mut buf = vec![0u8; HASH_BUFFER_BYTES];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_head_delete() {
        let (_dir, store) = store();
        let info = store.put("a/b.txt", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(store.get("a/b.txt").await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(store.head("a/b.txt").await.unwrap(), Some(info));

        store.delete("a/b.txt").await.unwrap();
        assert!(store.head("a/b.txt").await.unwrap().is_none());
        assert!(!store.root().join("a").exists());
        store.delete("a/b.txt").await.unwrap();
        assert!(matches!(
            store.get("a/b.txt").await,
            Err(MeetrecError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_multipart_concatenates_in_order() {
        let (_dir, store) = store();
        let id = store.create_multipart("v/raw.avi").await.unwrap();
        let p2 = store
            .upload_part("v/raw.avi", &id, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();
        let p1 = store
            .upload_part("v/raw.avi", &id, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();

        let info = store.complete_multipart("v/raw.avi", &id, &[p1, p2]).await.unwrap();
        assert_eq!(info.size, 11);
        assert_eq!(info.etag, etag_of(b"hello world"));
        assert_eq!(store.get("v/raw.avi").await.unwrap(), Bytes::from_static(b"hello world"));
        assert!(!store.root().join(STAGING_DIR).join(id.as_str()).exists());
    }

    #[tokio::test]
    async fn test_abort_discards_parts() {
        let (_dir, store) = store();
        let id = store.create_multipart("k").await.unwrap();
        store.upload_part("k", &id, 1, Bytes::from_static(b"x")).await.unwrap();
        store.abort_multipart("k", &id).await.unwrap();
        assert!(store.head("k").await.unwrap().is_none());
        assert!(store.upload_part("k", &id, 2, Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_list_skips_staging() {
        let (_dir, store) = store();
        store.put("rec/1/a", Bytes::from_static(b"1")).await.unwrap();
        store.put("rec/2/b", Bytes::from_static(b"2")).await.unwrap();
        store.put("other", Bytes::from_static(b"3")).await.unwrap();
        let _pending = store.create_multipart("rec/3/c").await.unwrap();

        let keys: Vec<_> = store
            .list("rec/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["rec/1/a", "rec/2/b"]);

        assert_eq!(store.delete_prefix("rec/").await.unwrap(), 2);
        assert_eq!(store.list("").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ranged_read() {
        let (_dir, store) = store();
        store.put("r", Bytes::from_static(b"0123456789")).await.unwrap();
        assert_eq!(store.get_range("r", 3, 4).await.unwrap(), Bytes::from_static(b"3456"));
        assert_eq!(store.get_range("r", 8, 100).await.unwrap(), Bytes::from_static(b"89"));
        assert!(matches!(
            store.get_range("missing", 0, 1).await,
            Err(MeetrecError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_head_tracks_files_changed_outside_the_store() {
        let (_dir, store) = store();
        store.put("h", Bytes::from_static(b"first")).await.unwrap();
        let before = store.head("h").await.unwrap().unwrap();
        assert_eq!(before.etag, etag_of(b"first"));

        std::fs::write(store.object_path("h").unwrap(), b"second version").unwrap();
        let after = store.head("h").await.unwrap().unwrap();
        assert_eq!(after.size, 14);
        assert_eq!(after.etag, etag_of(b"second version"));
    }

    #[tokio::test]
    async fn test_upload_and_download_files() {
        let (dir, store) = store();
        let local = dir.path().join("local.bin");
        tokio::fs::write(&local, b"payload").await.unwrap();
        store.upload_from("x/y", &local).await.unwrap();

        let back = dir.path().join("back.bin");
        assert_eq!(store.download_to("x/y", &back).await.unwrap(), 7);
        assert_eq!(tokio::fs::read(&back).await.unwrap(), b"payload");

        let missing = dir.path().join("missing");
        assert!(matches!(
            store.upload_from("x/z", &missing).await,
            Err(MeetrecError::FileNotFound { .. })
        ));
    }
}

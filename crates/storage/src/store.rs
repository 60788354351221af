//! The object storage interface.

use std::path::Path;

use bytes::Bytes;
use meetrec_common::{MeetrecError, MeetrecResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Largest piece the file helpers move in one request. Files bigger than
/// this are uploaded as multipart uploads.
pub const TRANSFER_CHUNK_BYTES: u64 = 8 * 1024 * 1024;

/// Identifier of an open multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UploadId(String);

impl UploadId {
    /// A fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UploadId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A part the store has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// 1-based.
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: String,
}

/// Durable object storage with S3-style multipart uploads.
///
/// Part numbers start at 1. `complete_multipart` takes the parts in
/// ascending order with no gaps or duplicates; anything else is rejected
/// and the upload stays open so the caller can abort it.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open a multipart upload that will produce `key`.
    async fn create_multipart(&self, key: &str) -> MeetrecResult<UploadId>;

    /// Store one part.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        data: Bytes,
    ) -> MeetrecResult<CompletedPart>;

    /// Concatenate `parts` into the object and close the upload.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> MeetrecResult<ObjectInfo>;

    /// Discard an upload and every part stored for it.
    async fn abort_multipart(&self, key: &str, upload_id: &UploadId) -> MeetrecResult<()>;

    /// Metadata of `key`, or `None` if it does not exist.
    async fn head(&self, key: &str) -> MeetrecResult<Option<ObjectInfo>>;

    async fn get(&self, key: &str) -> MeetrecResult<Bytes>;

    /// Up to `len` bytes of `key` starting at `offset`. Empty past the end.
    async fn get_range(&self, key: &str, offset: u64, len: u64) -> MeetrecResult<Bytes>;

    async fn put(&self, key: &str, data: Bytes) -> MeetrecResult<ObjectInfo>;

    /// Remove `key`. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> MeetrecResult<()>;

    /// Objects whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> MeetrecResult<Vec<ObjectInfo>>;

    /// Download `key` into a local file in ranged pieces, returning its size.
    async fn download_to(&self, key: &str, path: &Path) -> MeetrecResult<u64> {
        let info = self
            .head(key)
            .await?
            .ok_or_else(|| MeetrecError::object_not_found(key))?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut offset = 0u64;
        while offset < info.size {
            let len = (info.size - offset).min(TRANSFER_CHUNK_BYTES);
            let chunk = self.get_range(key, offset, len).await?;
            if chunk.is_empty() {
                return Err(MeetrecError::storage(format!(
                    "{key} ended after {offset} bytes, expected {}",
                    info.size
                )));
            }
            file.write_all(&chunk).await?;
            offset += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(offset)
    }

    /// Upload a local file as `key`.
    async fn upload_from(&self, key: &str, path: &Path) -> MeetrecResult<ObjectInfo> {
        self.upload_file_in_parts(key, path, TRANSFER_CHUNK_BYTES).await
    }

    /// Upload a local file as `key`, one `put` when it fits in `part_size`
    /// and a multipart upload of `part_size` pieces otherwise. A failed
    /// multipart upload is aborted.
    async fn upload_file_in_parts(
        &self,
        key: &str,
        path: &Path,
        part_size: u64,
    ) -> MeetrecResult<ObjectInfo> {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MeetrecError::FileNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let part_size = part_size.max(1);
        if size <= part_size {
            let data = tokio::fs::read(path).await?;
            return self.put(key, Bytes::from(data)).await;
        }

        let upload_id = self.create_multipart(key).await?;
        let result: MeetrecResult<ObjectInfo> = async {
            let mut file = tokio::fs::File::open(path).await?;
            let mut parts = Vec::new();
            loop {
                let mut buf = Vec::with_capacity(part_size as usize);
                let read = (&mut file).take(part_size).read_to_end(&mut buf).await?;
                if read == 0 {
                    break;
                }
                let part_number = parts.len() as u32 + 1;
                parts.push(
                    self.upload_part(key, &upload_id, part_number, Bytes::from(buf))
                        .await?,
                );
            }
            self.complete_multipart(key, &upload_id, &parts).await
        }
        .await;

        if result.is_err() {
            if let Err(e) = self.abort_multipart(key, &upload_id).await {
                tracing::warn!(key, upload_id = %upload_id, error = %e, "Failed to abort file upload");
            }
        }
        result
    }

    /// Delete every object under `prefix`, returning how many were removed.
    ///
    /// `prefix` is matched literally: end it with `/` to stay inside one
    /// directory.
    async fn delete_prefix(&self, prefix: &str) -> MeetrecResult<usize> {
        let objects = self.list(prefix).await?;
        for object in &objects {
            self.delete(&object.key).await?;
        }
        Ok(objects.len())
    }
}

/// Check that `parts` are 1..=n in order.
pub(crate) fn validate_part_order(parts: &[CompletedPart]) -> MeetrecResult<()> {
    if parts.is_empty() {
        return Err(MeetrecError::storage("cannot complete an upload with no parts"));
    }
    for (i, part) in parts.iter().enumerate() {
        let expected = i as u32 + 1;
        if part.part_number != expected {
            return Err(MeetrecError::storage(format!(
                "part list out of order: expected part {expected}, found {}",
                part.part_number
            )));
        }
    }
    Ok(())
}

/// Reject keys that are empty, absolute, or escape the store.
pub(crate) fn validate_key(key: &str) -> MeetrecResult<()> {
    if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
        return Err(MeetrecError::storage(format!("invalid object key: {key:?}")));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == ".." || segment.starts_with(".multipart"))
    {
        return Err(MeetrecError::storage(format!("invalid object key: {key:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(n: u32) -> CompletedPart {
        CompletedPart {
            part_number: n,
            etag: String::new(),
            size: 1,
        }
    }

    #[test]
    fn test_part_order_validation() {
        assert!(validate_part_order(&[part(1), part(2), part(3)]).is_ok());
        assert!(validate_part_order(&[]).is_err());
        assert!(validate_part_order(&[part(2), part(1)]).is_err());
        assert!(validate_part_order(&[part(1), part(3)]).is_err());
        assert!(validate_part_order(&[part(1), part(1)]).is_err());
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key("recordings/m1/recording_m1.mp4").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key(".multipart/x").is_err());
    }

    #[test]
    fn test_upload_ids_are_unique() {
        assert_ne!(UploadId::generate(), UploadId::generate());
    }
}

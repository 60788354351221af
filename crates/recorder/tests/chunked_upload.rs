use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use meetrec_common::UploadConfig;
use meetrec_recorder::{ChunkedUploader, UploadState};
use meetrec_storage::MemoryObjectStore;
use tokio::io::AsyncWriteExt;

const PART: u64 = 1024;
const KEY: &str = "recordings_temp/s1/raw_video_s1.avi";

fn upload_config() -> UploadConfig {
    UploadConfig {
        part_size_bytes: PART,
        poll_interval_ms: 10,
        join_timeout_secs: 5,
        retry_backoff_ms: 1,
        ..UploadConfig::default()
    }
}

async fn grow(path: &Path, increments: &[usize]) -> Vec<u8> {
    let mut file = tokio::fs::File::create(path).await.unwrap();
    let mut written = Vec::new();
    for (i, len) in increments.iter().enumerate() {
        let chunk = vec![i as u8 + 1; *len];
        file.write_all(&chunk).await.unwrap();
        file.flush().await.unwrap();
        written.extend_from_slice(&chunk);
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    written
}

#[tokio::test]
async fn part_sized_growth_uploads_ordered_parts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.avi");
    let store = Arc::new(MemoryObjectStore::new());
    let mut uploader = ChunkedUploader::new(store.clone(), KEY, path.clone(), &upload_config());
    uploader.start(Duration::from_millis(10));

    let written = grow(&path, &[PART as usize; 4]).await;
    let summary = uploader.finish().await.unwrap();

    let numbers: Vec<u32> = summary.parts.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert!(summary.parts.iter().all(|p| p.size == PART));
    assert_eq!(summary.bytes_uploaded, 4 * PART);
    assert_eq!(store.uploaded_part_numbers(), vec![1, 2, 3, 4]);
    assert_eq!(store.object(KEY).unwrap().as_ref(), written.as_slice());
    assert_eq!(uploader.state(), UploadState::Completed);
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn remainder_becomes_the_last_part() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.avi");
    let store = Arc::new(MemoryObjectStore::new());
    let mut uploader = ChunkedUploader::new(store.clone(), KEY, path.clone(), &upload_config());
    uploader.start(Duration::from_millis(10));

    let written = grow(&path, &[1500, 1000]).await;
    let summary = uploader.finish().await.unwrap();

    let sizes: Vec<u64> = summary.parts.iter().map(|p| p.size).collect();
    assert_eq!(sizes, vec![PART, PART, 2500 - 2 * PART]);
    assert_eq!(store.object(KEY).unwrap().len(), written.len());
}

#[tokio::test]
async fn failed_part_aborts_without_completion() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.avi");
    let store = Arc::new(MemoryObjectStore::new());
    store.fail_part(2);
    let mut uploader = ChunkedUploader::new(store.clone(), KEY, path.clone(), &upload_config());
    uploader.start(Duration::from_millis(10));

    grow(&path, &[PART as usize; 3]).await;
    assert!(uploader.finish().await.is_err());

    let calls = store.calls();
    assert_eq!(calls.complete_multipart, 0);
    assert_eq!(calls.abort_multipart, 1);
    assert_eq!(store.open_uploads(), 0);
    assert!(store.object(KEY).is_none());
    assert_eq!(uploader.state(), UploadState::Aborted);
}

#[tokio::test]
async fn transient_part_failure_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.avi");
    let store = Arc::new(MemoryObjectStore::new());
    store.fail_part_times(1, 2);
    let config = UploadConfig {
        part_retry_attempts: 2,
        ..upload_config()
    };
    let mut uploader = ChunkedUploader::new(store.clone(), KEY, path.clone(), &config);
    uploader.start(Duration::from_millis(10));

    grow(&path, &[PART as usize * 2]).await;
    let summary = uploader.finish().await.unwrap();

    assert_eq!(summary.parts.len(), 2);
    assert_eq!(store.calls().upload_part, 4);
}

#[tokio::test]
async fn completion_failure_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.avi");
    let store = Arc::new(MemoryObjectStore::new());
    store.fail_completion(true);
    let mut uploader = ChunkedUploader::new(store.clone(), KEY, path.clone(), &upload_config());

    grow(&path, &[100]).await;
    assert!(uploader.finish().await.is_err());
    assert_eq!(store.calls().abort_multipart, 1);
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn nothing_written_opens_no_upload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never-created.avi");
    let store = Arc::new(MemoryObjectStore::new());
    let mut uploader = ChunkedUploader::new(store.clone(), KEY, path, &upload_config());
    uploader.start(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(uploader.finish().await.is_err());
    assert_eq!(store.calls().create_multipart, 0);
    assert_eq!(uploader.state(), UploadState::Aborted);
}

#[tokio::test]
async fn short_object_after_completion_is_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.avi");
    let store = Arc::new(MemoryObjectStore::new());
    store.truncate_completed(true);
    let mut uploader = ChunkedUploader::new(store.clone(), KEY, path.clone(), &upload_config());

    grow(&path, &[1500]).await;
    let err = uploader.finish().await.unwrap_err();

    assert!(err.to_string().contains("expected 1500"), "{err}");
    assert_eq!(store.calls().complete_multipart, 1);
    assert!(store.object(KEY).is_none());
    assert_eq!(uploader.state(), UploadState::Aborted);
    assert!(uploader.finish().await.is_err());
    assert_eq!(store.calls().complete_multipart, 1);
}

#[tokio::test]
async fn second_finish_returns_the_first_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.avi");
    let store = Arc::new(MemoryObjectStore::new());
    let mut uploader = ChunkedUploader::new(store.clone(), KEY, path.clone(), &upload_config());
    uploader.start(Duration::from_millis(10));

    grow(&path, &[PART as usize, 200]).await;
    let first = uploader.finish().await.unwrap();
    let second = uploader.finish().await.unwrap();
    uploader.abort().await;

    assert_eq!(first, second);
    assert_eq!(uploader.state(), UploadState::Completed);
    assert_eq!(store.calls().complete_multipart, 1);
    assert_eq!(store.calls().abort_multipart, 0);
    assert_eq!(store.object(KEY).unwrap().len(), PART as usize + 200);
}

mod common;

use std::sync::Arc;

use bytes::Bytes;
use meetrec_common::MeetrecError;
use meetrec_encoder::encode_wav;
use meetrec_media_model::RecordingKeys;
use meetrec_recorder::Finalizer;
use meetrec_storage::{MemoryObjectStore, ObjectStore};

use common::{backend, FakeContainer};

async fn seeded_store(keys: &RecordingKeys) -> Arc<MemoryObjectStore> {
    let store = Arc::new(MemoryObjectStore::new());
    store
        .put(&keys.raw_video, Bytes::from(vec![7u8; 240]))
        .await
        .unwrap();
    let wav = encode_wav(&vec![0i16; 48000 * 2], 48000, 2).unwrap();
    store.put(&keys.raw_audio, Bytes::from(wav)).await.unwrap();
    store
}

#[tokio::test]
async fn finalize_publishes_and_cleans_up() {
    let keys = RecordingKeys::for_session("f1", "recordings_temp", "recordings");
    let store = seeded_store(&keys).await;
    let finalizer = Finalizer::new(store.clone(), backend(), 24);

    let report = finalizer.finalize("f1", &keys).await.unwrap();

    assert_eq!(report.final_key, keys.final_video);
    assert!(!report.already_finalized);
    assert_eq!(report.intermediates_deleted, 2);
    assert!(store.object(&keys.raw_video).is_none());
    assert!(store.object(&keys.raw_audio).is_none());

    let body = store.object(&keys.final_video).unwrap();
    assert_eq!(report.final_size, body.len() as u64);
    let container: FakeContainer = serde_json::from_slice(&body).unwrap();
    assert_eq!(container.fps, 24);
    assert!((container.audio_secs() - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn second_finalize_is_a_no_op() {
    let keys = RecordingKeys::for_session("f2", "recordings_temp", "recordings");
    let store = seeded_store(&keys).await;
    let encoder = backend();
    let finalizer = Finalizer::new(store.clone(), encoder.clone(), 24);

    let first = finalizer.finalize("f2", &keys).await.unwrap();
    let second = finalizer.finalize("f2", &keys).await.unwrap();

    assert!(second.already_finalized);
    assert_eq!(second.final_key, first.final_key);
    assert_eq!(second.final_size, first.final_size);
    assert_eq!(*encoder.mux_calls.lock(), 1);
    assert!(finalizer.is_finalized().await);
}

#[tokio::test]
async fn missing_intermediate_fails_without_output() {
    let keys = RecordingKeys::for_session("f3", "recordings_temp", "recordings");
    let store = Arc::new(MemoryObjectStore::new());
    let finalizer = Finalizer::new(store.clone(), backend(), 24);

    let err = finalizer.finalize("f3", &keys).await.unwrap_err();

    assert!(matches!(err, MeetrecError::ObjectNotFound { .. }));
    assert!(store.object(&keys.final_video).is_none());
    assert!(!finalizer.is_finalized().await);
}

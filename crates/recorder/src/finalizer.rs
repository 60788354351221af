//! Produces the deliverable from a session's intermediates.
//!
//! # Steps
//!
//! 1. Download the raw video and the rendered audio into a fresh temporary
//!    directory.
//! 2. Probe the encoder again and mux both into the final container.
//! 3. Check that the output is non-empty, upload it to the final key and
//!    confirm it with a head probe.
//! 4. Delete the intermediate objects. Failures here are logged only.
//!
//! The temporary directory is removed on every path.

use std::sync::Arc;

use meetrec_common::{MeetrecError, MeetrecResult};
use meetrec_encoder::{EncoderBackend, EncoderProfile, MuxJob};
use meetrec_media_model::RecordingKeys;
use meetrec_storage::ObjectStore;
use serde::Serialize;
use tokio::sync::Mutex;

/// Result of finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizeReport {
    pub session_id: String,
    pub final_key: String,
    pub final_size: u64,
    pub profile: EncoderProfile,
    /// Intermediate objects that were deleted afterwards.
    pub intermediates_deleted: usize,
    /// This call found the session already finalized and did nothing.
    pub already_finalized: bool,
}

/// Muxes and publishes one session. Finalizing twice is a no-op.
pub struct Finalizer {
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn EncoderBackend>,
    fps: u32,
    done: Mutex<Option<FinalizeReport>>,
}

impl Finalizer {
    pub fn new(store: Arc<dyn ObjectStore>, backend: Arc<dyn EncoderBackend>, fps: u32) -> Self {
        Self {
            store,
            backend,
            fps,
            done: Mutex::new(None),
        }
    }

    pub async fn is_finalized(&self) -> bool {
        self.done.lock().await.is_some()
    }

    pub async fn finalize(&self, session_id: &str, keys: &RecordingKeys) -> MeetrecResult<FinalizeReport> {
        let mut done = self.done.lock().await;
        if let Some(prior) = done.as_ref() {
            tracing::info!(session_id, final_key = %prior.final_key, "Session already finalized");
            return Ok(FinalizeReport {
                already_finalized: true,
                ..prior.clone()
            });
        }

        let report = self.run(session_id, keys).await?;
        *done = Some(report.clone());
        Ok(report)
    }

    async fn run(&self, session_id: &str, keys: &RecordingKeys) -> MeetrecResult<FinalizeReport> {
        let workdir = tempfile::Builder::new()
            .prefix(&format!("meetrec-finalize-{session_id}-"))
            .tempdir()
            .map_err(|e| MeetrecError::finalize(format!("Failed to create temp dir: {e}")))?;

        let video = workdir.path().join("raw_video.avi");
        let audio = workdir.path().join("raw_audio.wav");
        let output = workdir.path().join("final.mp4");

        let video_bytes = self.store.download_to(&keys.raw_video, &video).await?;
        let audio_bytes = self.store.download_to(&keys.raw_audio, &audio).await?;
        tracing::info!(session_id, video_bytes, audio_bytes, "Intermediates downloaded");

        let profile = self.backend.probe().await;
        let job = MuxJob {
            video,
            audio,
            output: output.clone(),
            fps: self.fps,
        };
        self.backend.mux(&job, profile).await?;

        let local_size = match tokio::fs::metadata(&output).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        if local_size == 0 {
            return Err(MeetrecError::finalize(format!(
                "mux produced no output for session {session_id}"
            )));
        }

        self.store.upload_from(&keys.final_video, &output).await?;
        let final_size = match self.store.head(&keys.final_video).await? {
            Some(info) if info.size == local_size => info.size,
            Some(info) => {
                return Err(MeetrecError::finalize(format!(
                    "{} is {} bytes in storage, expected {local_size}",
                    keys.final_video, info.size
                )))
            }
            None => {
                return Err(MeetrecError::finalize(format!(
                    "{} missing after upload",
                    keys.final_video
                )))
            }
        };
        tracing::info!(session_id, key = %keys.final_video, final_size, "Final recording uploaded");

        let mut intermediates_deleted = 0;
        for key in [&keys.raw_video, &keys.raw_audio] {
            match self.store.delete(key).await {
                Ok(()) => intermediates_deleted += 1,
                Err(e) => tracing::warn!(key = %key, error = %e, "Failed to delete intermediate"),
            }
        }

        Ok(FinalizeReport {
            session_id: session_id.to_string(),
            final_key: keys.final_video.clone(),
            final_size,
            profile,
            intermediates_deleted,
            already_finalized: false,
        })
    }
}

//! One recording, from the first transport frame to the final object.
//!
//! # Pipeline
//!
//! 1. **Record**: the transport feeds a [`CaptureSender`]; an ingest task
//!    moves everything into the session's [`FrameIngestBuffer`].
//! 2. **Stop**: intake is drained and closed, pending audio is flushed and
//!    the recording duration is fixed as the latest of the last frame, the
//!    end of the last audio chunk, the clock, and the minimum duration.
//! 3. **Encode**: slots are fed to the encoder while the growing output is
//!    uploaded in parts; the audio track is rendered on a blocking thread at
//!    the same time.
//! 4. **Finalize**: the rendered audio is stored next to the raw video and
//!    both are muxed into the deliverable.
//!
//! The completion callback runs exactly once, whatever the outcome.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use meetrec_common::{
    validate_prefixes, AppConfig, MeetrecError, MeetrecResult, RecordingClock, RecordingDefaults,
    UploadConfig,
};
use meetrec_encoder::{encode_wav, EncoderBackend, RawVideoSpec};
use meetrec_media_model::{RecordingKeys, RecordingOutcome, RecordingStats, SessionPhase};
use meetrec_storage::ObjectStore;
use meetrec_sync_engine::{AudioMixer, FrameIndex, FrameIngestBuffer, SlotPolicy};
use parking_lot::Mutex;
use serde::Serialize;

use crate::finalizer::Finalizer;
use crate::intake::{open_intake, CaptureSender, IntakeTask};
use crate::pipe::EncoderPipe;
use crate::uploader::ChunkedUploader;

/// Invoked once per session with its outcome.
pub type CompletionCallback = Arc<dyn Fn(&RecordingOutcome) + Send + Sync>;

type ProgressFn = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Settings for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: String,
    pub recording: RecordingDefaults,
    pub upload: UploadConfig,
    pub temp_prefix: String,
    pub final_prefix: String,
    pub encoder_close_timeout: Duration,
    pub slot_policy: SlotPolicy,
}

impl SessionConfig {
    pub fn from_app_config(session_id: impl Into<String>, config: &AppConfig) -> Self {
        Self {
            session_id: session_id.into(),
            recording: config.recording.clone(),
            upload: config.upload.clone(),
            temp_prefix: config.storage.temp_prefix.clone(),
            final_prefix: config.storage.final_prefix.clone(),
            encoder_close_timeout: Duration::from_secs(config.encoder.close_timeout_secs),
            slot_policy: SlotPolicy::default(),
        }
    }

    pub fn validate(&self) -> MeetrecResult<()> {
        let id = &self.session_id;
        if id.is_empty() || id.contains('/') || id.contains("..") {
            return Err(MeetrecError::session(format!("invalid session id {id:?}")));
        }
        let rec = &self.recording;
        if rec.fps == 0 || rec.width == 0 || rec.height == 0 {
            return Err(MeetrecError::config("fps and dimensions must be positive"));
        }
        if rec.width % 2 != 0 || rec.height % 2 != 0 {
            return Err(MeetrecError::config("dimensions must be even"));
        }
        if rec.audio_sample_rate == 0 || rec.audio_channels != 2 {
            return Err(MeetrecError::config(
                "audio must be stereo with a positive sample rate",
            ));
        }
        validate_prefixes(&self.temp_prefix, &self.final_prefix)
    }

    fn raw_video_spec(&self) -> RawVideoSpec {
        RawVideoSpec {
            width: self.recording.width,
            height: self.recording.height,
            fps: self.recording.fps,
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub phase: SessionPhase,
    pub started_at: String,
    pub elapsed_secs: f64,
    pub frames_buffered: usize,
    /// Capture time of the most recent real frame.
    pub last_frame_secs: Option<f64>,
    /// A real frame arrived within the hold window.
    pub video_live: bool,
    pub audio_chunks: usize,
    pub inputs_dropped: u64,
    pub bytes_uploaded: u64,
}

/// A single recording.
pub struct RecordingSession {
    config: SessionConfig,
    keys: RecordingKeys,
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn EncoderBackend>,
    callback: Option<CompletionCallback>,
    ingest: Arc<FrameIngestBuffer>,
    sender: CaptureSender,
    intake: Mutex<Option<IntakeTask>>,
    phase: Mutex<SessionPhase>,
    cancel: AtomicBool,
    upload_progress: Mutex<Option<ProgressFn>>,
    finalizer: Finalizer,
    outcome: tokio::sync::Mutex<Option<RecordingOutcome>>,
}

impl fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSession")
            .field("session_id", &self.config.session_id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl RecordingSession {
    /// Start recording now. Must be called inside a tokio runtime.
    pub fn start(
        config: SessionConfig,
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn EncoderBackend>,
        callback: Option<CompletionCallback>,
    ) -> MeetrecResult<Arc<Self>> {
        config.validate()?;
        let keys = RecordingKeys::for_session(
            &config.session_id,
            &config.temp_prefix,
            &config.final_prefix,
        );
        let ingest = Arc::new(FrameIngestBuffer::new(RecordingClock::start(), &config.recording));
        let (sender, intake) = open_intake(Arc::clone(&ingest), config.recording.intake_queue_capacity);
        let finalizer = Finalizer::new(Arc::clone(&store), Arc::clone(&backend), config.recording.fps);

        tracing::info!(
            session_id = %config.session_id,
            fps = config.recording.fps,
            size = %config.raw_video_spec().size_arg(),
            encoder = backend.name(),
            "Recording started"
        );

        Ok(Arc::new(Self {
            config,
            keys,
            store,
            backend,
            callback,
            ingest,
            sender,
            intake: Mutex::new(Some(intake)),
            phase: Mutex::new(SessionPhase::Recording),
            cancel: AtomicBool::new(false),
            upload_progress: Mutex::new(None),
            finalizer,
            outcome: tokio::sync::Mutex::new(None),
        }))
    }

    pub fn id(&self) -> &str {
        &self.config.session_id
    }

    pub fn keys(&self) -> &RecordingKeys {
        &self.keys
    }

    /// Handle for the transport.
    pub fn sender(&self) -> CaptureSender {
        self.sender.clone()
    }

    /// Direct access to the buffer, bypassing the intake queue.
    pub fn ingest(&self) -> &Arc<FrameIngestBuffer> {
        &self.ingest
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    /// Abandon the recording. The encoder feed stops at the next slot and
    /// the session fails.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> SessionStatus {
        let bytes_uploaded = self
            .upload_progress
            .lock()
            .as_ref()
            .map(|progress| progress())
            .unwrap_or(0);
        let elapsed_secs = self.ingest.clock().elapsed_secs();
        let last_frame_secs = self
            .ingest
            .latest_real_frame()
            .map(|frame| frame.timestamp_secs);
        let video_live = last_frame_secs.is_some_and(|ts| {
            elapsed_secs - ts <= self.config.recording.hold_last_frame_secs
        });
        SessionStatus {
            session_id: self.config.session_id.clone(),
            phase: self.phase(),
            started_at: self.ingest.clock().epoch_wall().to_string(),
            elapsed_secs,
            frames_buffered: self.ingest.frame_count(),
            last_frame_secs,
            video_live,
            audio_chunks: self.ingest.audio_chunk_count(),
            inputs_dropped: self.sender.dropped(),
            bytes_uploaded,
        }
    }

    fn set_phase(&self, phase: SessionPhase) {
        let mut current = self.phase.lock();
        tracing::debug!(session_id = %self.config.session_id, from = ?*current, to = ?phase, "Phase change");
        *current = phase;
    }

    /// Stop capture and produce the deliverable.
    ///
    /// Calling this again returns the first outcome without doing any work.
    pub async fn stop_and_finalize(&self) -> RecordingOutcome {
        let mut slot = self.outcome.lock().await;
        if let Some(outcome) = slot.as_ref() {
            return outcome.clone();
        }

        let intake = self.intake.lock().take();
        if let Some(intake) = intake {
            let processed = intake.shutdown().await;
            tracing::debug!(session_id = %self.config.session_id, processed, "Intake closed");
        }

        let mut stats = RecordingStats::default();
        let outcome = match self.run(&mut stats).await {
            Ok(final_key) => {
                self.set_phase(SessionPhase::Completed);
                tracing::info!(
                    session_id = %self.config.session_id,
                    final_key = %final_key,
                    duration_secs = stats.duration_secs,
                    "Recording completed"
                );
                RecordingOutcome::completed(self.config.session_id.clone(), final_key, stats)
            }
            Err(e) => {
                self.set_phase(SessionPhase::Failed);
                tracing::error!(session_id = %self.config.session_id, error = %e, "Recording failed");
                let prefix = self.keys.temp_prefix();
                match self.store.delete_prefix(&prefix).await {
                    Ok(0) => {}
                    Ok(deleted) => tracing::info!(deleted, prefix = %prefix, "Removed intermediates"),
                    Err(e) => tracing::warn!(prefix = %prefix, error = %e, "Failed to remove intermediates"),
                }
                RecordingOutcome::failed(self.config.session_id.clone(), e.to_string(), stats)
            }
        };

        if let Some(callback) = &self.callback {
            callback(&outcome);
        }
        *slot = Some(outcome.clone());
        outcome
    }

    async fn run(&self, stats: &mut RecordingStats) -> MeetrecResult<String> {
        let session_id = self.config.session_id.as_str();
        let rec = &self.config.recording;

        let elapsed = self.ingest.clock().elapsed_secs();
        self.ingest.stop();
        let ingest_stats = self.ingest.stats();
        let duration = self
            .ingest
            .max_video_timestamp()
            .max(self.ingest.max_audio_end_secs())
            .max(elapsed)
            .max(rec.min_duration_secs);

        let frames = self.ingest.take_frames();
        let chunks = self.ingest.take_audio_chunks();
        stats.duration_secs = duration;
        stats.frames_captured = ingest_stats.frames_accepted;
        stats.frames_dropped =
            ingest_stats.frames_rejected + ingest_stats.frames_over_capacity + self.sender.dropped();
        stats.audio_chunks = chunks.len() as u64;

        let index = FrameIndex::build(&frames, rec.fps, self.config.slot_policy)
            .with_hold_secs(rec.hold_last_frame_secs);
        drop(frames);
        tracing::info!(
            session_id,
            duration_secs = duration,
            frames = stats.frames_captured,
            indexed_slots = index.indexed_slots(),
            audio_chunks = stats.audio_chunks,
            "Capture stopped"
        );
        self.set_phase(SessionPhase::Encoding);

        let workdir = tempfile::Builder::new()
            .prefix(&format!("meetrec-{session_id}-"))
            .tempdir()
            .map_err(|e| MeetrecError::session(format!("Failed to create work dir: {e}")))?;
        let raw_video = workdir.path().join("raw_video.avi");

        let spec = self.config.raw_video_spec();
        let profile = self.backend.probe().await;
        let input = self.backend.start(&spec, profile, &raw_video).await?;

        let mut uploader = ChunkedUploader::new(
            Arc::clone(&self.store),
            self.keys.raw_video.clone(),
            raw_video.clone(),
            &self.config.upload,
        );
        uploader.start(Duration::from_millis(self.config.upload.poll_interval_ms));
        let progress: ProgressFn = Arc::new(uploader.bytes_uploaded_handle());
        *self.upload_progress.lock() = Some(Arc::clone(&progress));

        let mixer = AudioMixer::new(rec.audio_sample_rate, rec.audio_channels);
        let render = tokio::task::spawn_blocking(move || mixer.render(&chunks, duration));

        let pipe = EncoderPipe::new(spec, self.config.encoder_close_timeout);
        let feed = pipe
            .run(input, &index, duration, &self.cancel, || progress())
            .await;
        stats.slots_written = feed.slots_written;
        stats.placeholder_slots = feed.placeholder_slots;
        stats.held_slots = feed.held_slots;

        if feed.cancelled {
            uploader.abort().await;
            return Err(MeetrecError::session("recording cancelled"));
        }
        if !feed.exit.success {
            tracing::warn!(
                session_id,
                timed_out = feed.exit.timed_out,
                "Encoder did not exit cleanly, finalizing its output anyway"
            );
        }

        let upload = uploader.finish().await?;
        stats.parts_uploaded = upload.parts.len() as u32;
        stats.bytes_uploaded = upload.bytes_uploaded;

        let mixed = render
            .await
            .map_err(|e| MeetrecError::audio(format!("Audio render task failed: {e}")))?;
        stats.audio_clipped_fraction = mixed.report.clipped_fraction;
        let wav = encode_wav(&mixed.samples, mixed.sample_rate, mixed.channels)?;
        self.store.put(&self.keys.raw_audio, Bytes::from(wav)).await?;
        drop(workdir);

        self.set_phase(SessionPhase::Finalizing);
        let report = self.finalizer.finalize(session_id, &self.keys).await?;
        Ok(report.final_key)
    }
}

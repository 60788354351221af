//! Capture intake: the transport-facing side of a session.
//!
//! Transport callbacks must never block, so every call stamps its data on
//! the recording clock and `try_send`s it into a bounded channel. When the
//! channel is full the message is dropped and counted. One ingest task per
//! session drains the channel into the [`FrameIngestBuffer`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use meetrec_common::RecordingClock;
use meetrec_media_model::{AudioFrame, AudioSource, FrameSource, VideoFrame};
use meetrec_sync_engine::FrameIngestBuffer;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// One unit of transport input.
#[derive(Debug)]
pub enum CaptureMessage {
    Video {
        frame: VideoFrame,
        source: FrameSource,
        timestamp_secs: f64,
    },
    Audio {
        samples: Vec<i16>,
        participant_id: String,
        track_id: Option<String>,
        source: AudioSource,
        arrival_secs: f64,
    },
    ReleaseTrack {
        participant_id: String,
        source: AudioSource,
        track_id: Option<String>,
    },
}

/// Cloneable handle the transport feeds. No call ever blocks or fails.
#[derive(Clone)]
pub struct CaptureSender {
    tx: mpsc::Sender<CaptureMessage>,
    clock: RecordingClock,
    dropped: Arc<AtomicU64>,
}

impl CaptureSender {
    pub fn add_video_frame(&self, frame: VideoFrame, source: FrameSource) {
        let timestamp_secs = self.clock.elapsed_secs();
        self.send(CaptureMessage::Video {
            frame,
            source,
            timestamp_secs,
        });
    }

    /// Interleaved stereo i16 samples.
    pub fn add_audio_samples(
        &self,
        samples: Vec<i16>,
        participant_id: &str,
        track_id: Option<&str>,
        source: AudioSource,
    ) {
        let arrival_secs = self.clock.elapsed_secs();
        self.send(CaptureMessage::Audio {
            samples,
            participant_id: participant_id.to_string(),
            track_id: track_id.map(str::to_string),
            source,
            arrival_secs,
        });
    }

    /// A transport audio frame in any layout; converted to stereo i16 here.
    pub fn add_audio_frame(
        &self,
        frame: &AudioFrame,
        participant_id: &str,
        track_id: Option<&str>,
        source: AudioSource,
    ) {
        if let Some(samples) = frame.to_stereo_i16() {
            self.add_audio_samples(samples, participant_id, track_id, source);
        }
    }

    pub fn release_audio_track(&self, participant_id: &str, source: AudioSource, track_id: Option<&str>) {
        self.send(CaptureMessage::ReleaseTrack {
            participant_id: participant_id.to_string(),
            source,
            track_id: track_id.map(str::to_string),
        });
    }

    /// Messages dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the session still accepts input.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send(&self, message: CaptureMessage) {
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 100 == 0 {
                    tracing::warn!(dropped, "Capture queue full, dropping input");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// The draining half of an intake channel.
pub(crate) struct IntakeTask {
    stop: Arc<Notify>,
    handle: JoinHandle<u64>,
}

impl IntakeTask {
    /// Close the channel, ingest everything already queued, and return the
    /// number of messages processed.
    pub(crate) async fn shutdown(self) -> u64 {
        self.stop.notify_one();
        match self.handle.await {
            Ok(processed) => processed,
            Err(e) => {
                tracing::warn!(error = %e, "Ingest task join failed");
                0
            }
        }
    }
}

/// Open a bounded intake channel feeding `ingest`.
pub(crate) fn open_intake(
    ingest: Arc<FrameIngestBuffer>,
    capacity: usize,
) -> (CaptureSender, IntakeTask) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = CaptureSender {
        tx,
        clock: ingest.clock().clone(),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    let stop = Arc::new(Notify::new());
    let handle = tokio::spawn(run_ingest(rx, ingest, Arc::clone(&stop)));
    (sender, IntakeTask { stop, handle })
}

async fn run_ingest(
    mut rx: mpsc::Receiver<CaptureMessage>,
    ingest: Arc<FrameIngestBuffer>,
    stop: Arc<Notify>,
) -> u64 {
    let mut processed = 0u64;
    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => {
                    apply(&ingest, message);
                    processed += 1;
                }
                None => break,
            },
            _ = stop.notified() => {
                rx.close();
                while let Ok(message) = rx.try_recv() {
                    apply(&ingest, message);
                    processed += 1;
                }
                break;
            }
        }
    }
    tracing::debug!(processed, "Ingest task finished");
    processed
}

fn apply(ingest: &FrameIngestBuffer, message: CaptureMessage) {
    match message {
        CaptureMessage::Video {
            frame,
            source,
            timestamp_secs,
        } => {
            ingest.add_video_frame_at(frame, source, timestamp_secs);
        }
        CaptureMessage::Audio {
            samples,
            participant_id,
            track_id,
            source,
            arrival_secs,
        } => {
            ingest.add_audio_samples_at(
                &samples,
                &participant_id,
                track_id.as_deref(),
                source,
                arrival_secs,
            );
        }
        CaptureMessage::ReleaseTrack {
            participant_id,
            source,
            track_id,
        } => {
            ingest.release_audio_track(&participant_id, source, track_id.as_deref());
        }
    }
}

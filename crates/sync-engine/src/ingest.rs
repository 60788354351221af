//! Thread-safe capture stores.
//!
//! Every transport callback lands here. Frames and audio have separate locks
//! so a burst of video never stalls audio ingest, and neither ever waits on
//! storage or the encoder.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use meetrec_common::{RecordingClock, RecordingDefaults};
use meetrec_media_model::{
    AudioChunk, AudioFrame, AudioSource, FrameSource, TimestampedFrame, TrackKey, VideoFrame,
};
use parking_lot::Mutex;
use serde::Serialize;

use crate::mixer::{AudioChunker, TrackAdmission};

/// Ingest counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub frames_accepted: u64,
    /// Malformed or empty frames.
    pub frames_rejected: u64,
    /// Frames refused because the frame store was full.
    pub frames_over_capacity: u64,
    pub audio_samples_accepted: u64,
    /// Malformed sample batches.
    pub audio_batches_rejected: u64,
    /// Batches from a second concurrent track for an occupied key.
    pub duplicate_track_batches: u64,
}

/// Append-only stores for one recording.
pub struct FrameIngestBuffer {
    clock: RecordingClock,
    active: AtomicBool,
    channels: u16,
    max_buffered_frames: Option<usize>,

    frames: Mutex<Vec<TimestampedFrame>>,
    latest_real: Mutex<Option<TimestampedFrame>>,
    audio: Mutex<AudioChunker>,

    frames_accepted: AtomicU64,
    frames_rejected: AtomicU64,
    frames_over_capacity: AtomicU64,
    audio_samples_accepted: AtomicU64,
    audio_batches_rejected: AtomicU64,
    duplicate_track_batches: AtomicU64,
}

impl FrameIngestBuffer {
    /// An active buffer stamping against `clock`.
    pub fn new(clock: RecordingClock, config: &RecordingDefaults) -> Self {
        Self {
            clock,
            active: AtomicBool::new(true),
            channels: config.audio_channels.max(1),
            max_buffered_frames: config.max_buffered_frames,
            frames: Mutex::new(Vec::new()),
            latest_real: Mutex::new(None),
            audio: Mutex::new(AudioChunker::new(
                config.audio_sample_rate,
                config.audio_channels,
                config.audio_flush_samples(),
            )),
            frames_accepted: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            frames_over_capacity: AtomicU64::new(0),
            audio_samples_accepted: AtomicU64::new(0),
            audio_batches_rejected: AtomicU64::new(0),
            duplicate_track_batches: AtomicU64::new(0),
        }
    }

    pub fn clock(&self) -> &RecordingClock {
        &self.clock
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Append a frame stamped now.
    pub fn add_video_frame(&self, frame: VideoFrame, source: FrameSource) -> bool {
        let timestamp = self.clock.elapsed_secs();
        self.add_video_frame_at(frame, source, timestamp)
    }

    /// Append a frame captured at `timestamp_secs` on the recording clock.
    ///
    /// Returns whether the frame was stored. Malformed frames, frames beyond
    /// the store bound, and frames arriving after stop are dropped.
    pub fn add_video_frame_at(&self, frame: VideoFrame, source: FrameSource, timestamp_secs: f64) -> bool {
        if !self.is_active() {
            return false;
        }
        if let Err(e) = frame.validate() {
            self.frames_rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, ?source, "Dropping malformed video frame");
            return false;
        }

        let frame = TimestampedFrame::new(frame, timestamp_secs, source);
        {
            let mut frames = self.frames.lock();
            if let Some(limit) = self.max_buffered_frames {
                if frames.len() >= limit {
                    let dropped = self.frames_over_capacity.fetch_add(1, Ordering::Relaxed);
                    if dropped == 0 {
                        tracing::warn!(limit, "Frame store full, dropping new frames");
                    }
                    return false;
                }
            }
            frames.push(frame.clone());
        }
        self.frames_accepted.fetch_add(1, Ordering::Relaxed);

        if source.is_real() {
            *self.latest_real.lock() = Some(frame);
        }
        true
    }

    /// Append interleaved samples that arrived now.
    pub fn add_audio_samples(
        &self,
        samples: &[i16],
        participant_id: &str,
        track_id: Option<&str>,
        source: AudioSource,
    ) -> bool {
        let arrival = self.clock.elapsed_secs();
        self.add_audio_samples_at(samples, participant_id, track_id, source, arrival)
    }

    /// Append interleaved samples that arrived at `arrival_secs`.
    pub fn add_audio_samples_at(
        &self,
        samples: &[i16],
        participant_id: &str,
        track_id: Option<&str>,
        source: AudioSource,
        arrival_secs: f64,
    ) -> bool {
        if !self.is_active() {
            return false;
        }
        if samples.is_empty() {
            return false;
        }
        if samples.len() % self.channels as usize != 0 {
            self.audio_batches_rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                participant_id,
                len = samples.len(),
                channels = self.channels,
                "Dropping audio batch that is not whole frames"
            );
            return false;
        }

        let key = TrackKey::new(participant_id, source);
        match self.audio.lock().push(key, track_id, samples, arrival_secs) {
            TrackAdmission::Accepted => {
                self.audio_samples_accepted
                    .fetch_add(samples.len() as u64, Ordering::Relaxed);
                true
            }
            TrackAdmission::Duplicate => {
                self.duplicate_track_batches.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Convert a transport frame to stereo i16 and append it.
    pub fn add_audio_frame(
        &self,
        frame: &AudioFrame,
        participant_id: &str,
        track_id: Option<&str>,
        source: AudioSource,
    ) -> bool {
        match frame.to_stereo_i16() {
            Some(samples) => self.add_audio_samples(&samples, participant_id, track_id, source),
            None => {
                if !frame.samples.is_empty() {
                    self.audio_batches_rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(participant_id, channels = frame.channels, "Dropping malformed audio frame");
                }
                false
            }
        }
    }

    /// The track is gone: flush its partial buffer and free its key.
    pub fn release_audio_track(&self, participant_id: &str, source: AudioSource, track_id: Option<&str>) -> bool {
        let key = TrackKey::new(participant_id, source);
        self.audio.lock().release(&key, track_id)
    }

    /// Most recent real frame, for live preview.
    pub fn latest_real_frame(&self) -> Option<TimestampedFrame> {
        self.latest_real.lock().clone()
    }

    /// Stop accepting input and flush every partial audio buffer.
    ///
    /// Returns `false` if the buffer was already stopped.
    pub fn stop(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        let mut audio = self.audio.lock();
        audio.flush_all();
        tracing::debug!(
            frames = self.frames.lock().len(),
            audio_chunks = audio.chunk_count(),
            "Ingest stopped"
        );
        true
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn audio_chunk_count(&self) -> usize {
        self.audio.lock().chunk_count()
    }

    /// Latest frame timestamp, or zero without frames.
    pub fn max_video_timestamp(&self) -> f64 {
        self.frames
            .lock()
            .iter()
            .map(|f| f.timestamp_secs)
            .fold(0.0, f64::max)
    }

    /// Latest end of any flushed audio chunk, or zero without audio.
    pub fn max_audio_end_secs(&self) -> f64 {
        self.audio.lock().max_chunk_end_secs()
    }

    /// Move the captured frames out.
    pub fn take_frames(&self) -> Vec<TimestampedFrame> {
        std::mem::take(&mut *self.frames.lock())
    }

    /// Move the flushed audio chunks out.
    pub fn take_audio_chunks(&self) -> Vec<AudioChunk> {
        self.audio.lock().take_chunks()
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            frames_accepted: self.frames_accepted.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_over_capacity: self.frames_over_capacity.load(Ordering::Relaxed),
            audio_samples_accepted: self.audio_samples_accepted.load(Ordering::Relaxed),
            audio_batches_rejected: self.audio_batches_rejected.load(Ordering::Relaxed),
            duplicate_track_batches: self.duplicate_track_batches.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meetrec_media_model::AudioSamples;

    fn buffer_with(config: RecordingDefaults) -> FrameIngestBuffer {
        FrameIngestBuffer::new(RecordingClock::start(), &config)
    }

    fn buffer() -> FrameIngestBuffer {
        buffer_with(RecordingDefaults::default())
    }

    #[test]
    fn test_frames_are_stamped_and_stored() {
        let ingest = buffer();
        assert!(ingest.add_video_frame(VideoFrame::solid(2, 2, [1; 3]), FrameSource::Camera));
        assert!(ingest.add_video_frame_at(VideoFrame::solid(2, 2, [2; 3]), FrameSource::Screen, 3.5));
        assert_eq!(ingest.frame_count(), 2);
        assert_eq!(ingest.max_video_timestamp(), 3.5);
        assert_eq!(ingest.latest_real_frame().unwrap().frame.data[0], 2);
    }

    #[test]
    fn test_malformed_frames_are_counted() {
        let ingest = buffer();
        let bad = VideoFrame {
            width: 4,
            height: 4,
            data: bytes::Bytes::from_static(&[0u8; 5]),
        };
        assert!(!ingest.add_video_frame(bad, FrameSource::Camera));
        assert_eq!(ingest.stats().frames_rejected, 1);
        assert_eq!(ingest.frame_count(), 0);
    }

    #[test]
    fn test_placeholder_frames_do_not_update_preview() {
        let ingest = buffer();
        ingest.add_video_frame_at(VideoFrame::solid(1, 1, [0; 3]), FrameSource::Placeholder, 0.0);
        assert!(ingest.latest_real_frame().is_none());
    }

    #[test]
    fn test_frame_store_bound() {
        let config = RecordingDefaults {
            max_buffered_frames: Some(2),
            ..RecordingDefaults::default()
        };
        let ingest = buffer_with(config);
        for i in 0..4 {
            ingest.add_video_frame_at(VideoFrame::solid(1, 1, [i; 3]), FrameSource::Camera, i as f64);
        }
        assert_eq!(ingest.frame_count(), 2);
        assert_eq!(ingest.stats().frames_over_capacity, 2);
        // Earliest frames are kept.
        assert_eq!(ingest.max_video_timestamp(), 1.0);
    }

    #[test]
    fn test_ingest_after_stop_is_ignored() {
        let ingest = buffer();
        assert!(ingest.stop());
        assert!(!ingest.stop());
        assert!(!ingest.add_video_frame(VideoFrame::solid(1, 1, [0; 3]), FrameSource::Camera));
        assert!(!ingest.add_audio_samples(&[0, 0], "a", None, AudioSource::Microphone));
    }

    #[test]
    fn test_stop_flushes_partial_audio() {
        let ingest = buffer();
        ingest.add_audio_samples_at(&[100; 9600 + 480], "a", Some("t"), AudioSource::Microphone, 0.0);
        assert_eq!(ingest.audio_chunk_count(), 1);
        ingest.stop();
        assert!((ingest.max_audio_end_secs() - 0.105).abs() < 1e-9);
        let chunks = ingest.take_audio_chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].samples.len(), 480);
        assert_eq!(ingest.audio_chunk_count(), 0);
    }

    #[test]
    fn test_odd_audio_batch_rejected() {
        let ingest = buffer();
        assert!(!ingest.add_audio_samples(&[1, 2, 3], "a", None, AudioSource::Microphone));
        assert_eq!(ingest.stats().audio_batches_rejected, 1);
    }

    #[test]
    fn test_duplicate_track_counted() {
        let ingest = buffer();
        assert!(ingest.add_audio_samples(&[1, 1], "a", Some("t1"), AudioSource::Microphone));
        assert!(!ingest.add_audio_samples(&[1, 1], "a", Some("t2"), AudioSource::Microphone));
        assert!(ingest.add_audio_samples(&[1, 1], "a", Some("t3"), AudioSource::ScreenAudio));
        assert_eq!(ingest.stats().duplicate_track_batches, 1);

        assert!(ingest.release_audio_track("a", AudioSource::Microphone, Some("t1")));
        assert!(ingest.add_audio_samples(&[1, 1], "a", Some("t2"), AudioSource::Microphone));
    }

    #[test]
    fn test_audio_frame_conversion() {
        let ingest = buffer();
        let frame = AudioFrame {
            sample_rate: 48000,
            channels: 1,
            samples: AudioSamples::F32(vec![0.5; 4800]),
        };
        assert!(ingest.add_audio_frame(&frame, "a", None, AudioSource::Microphone));
        assert_eq!(ingest.stats().audio_samples_accepted, 9600);
        assert_eq!(ingest.audio_chunk_count(), 1);
    }
}

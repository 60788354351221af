//! Shared fixtures: a fake encoder backend and small test configs.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use meetrec_common::{AppConfig, MeetrecError, MeetrecResult};
use meetrec_encoder::{
    decode_wav, EncoderBackend, EncoderExit, EncoderInput, EncoderProfile, MuxJob, RawVideoSpec,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// What the fake mux writes as its "container".
#[derive(Debug, Serialize, Deserialize)]
pub struct FakeContainer {
    pub video_frames: u64,
    pub fps: u32,
    pub audio_samples: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl FakeContainer {
    pub fn video_secs(&self) -> f64 {
        self.video_frames as f64 / self.fps as f64
    }

    pub fn audio_secs(&self) -> f64 {
        self.audio_samples as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Writes raw frames straight to the output file; the mux step describes
/// its inputs as JSON.
#[derive(Default)]
pub struct FakeEncoder {
    spec: Mutex<Option<RawVideoSpec>>,
    fail_start: bool,
    pub mux_calls: Mutex<u32>,
}

impl FakeEncoder {
    /// A backend whose encoder never starts.
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }
}

struct FakeInput {
    file: tokio::fs::File,
}

#[async_trait::async_trait]
impl EncoderInput for FakeInput {
    async fn feed(&mut self, frame: &[u8]) -> MeetrecResult<()> {
        self.file.write_all(frame).await?;
        Ok(())
    }

    async fn close(mut self: Box<Self>, _timeout: Duration) -> MeetrecResult<EncoderExit> {
        self.file.flush().await?;
        Ok(EncoderExit {
            success: true,
            ..EncoderExit::default()
        })
    }
}

#[async_trait::async_trait]
impl EncoderBackend for FakeEncoder {
    fn name(&self) -> &str {
        "fake"
    }

    async fn probe(&self) -> EncoderProfile {
        EncoderProfile::Software
    }

    async fn start(
        &self,
        spec: &RawVideoSpec,
        _profile: EncoderProfile,
        output: &Path,
    ) -> MeetrecResult<Box<dyn EncoderInput>> {
        if self.fail_start {
            return Err(MeetrecError::encoder("encoder missing"));
        }
        *self.spec.lock() = Some(*spec);
        let file = tokio::fs::File::create(output).await?;
        Ok(Box::new(FakeInput { file }))
    }

    async fn mux(&self, job: &MuxJob, _profile: EncoderProfile) -> MeetrecResult<()> {
        *self.mux_calls.lock() += 1;
        // Without a prior start every byte counts as a frame.
        let spec = *self.spec.lock();
        let frame_len = spec.map(|s| s.frame_len() as u64).unwrap_or(1);
        let video_len = tokio::fs::metadata(&job.video).await?.len();
        let wav = tokio::fs::read(&job.audio).await?;
        let (samples, sample_rate, channels) = decode_wav(&wav)?;
        let container = FakeContainer {
            video_frames: video_len / frame_len,
            fps: job.fps,
            audio_samples: samples.len() as u64,
            sample_rate,
            channels,
        };
        tokio::fs::write(&job.output, serde_json::to_vec(&container)?).await?;
        Ok(())
    }
}

/// Small frames, small parts, fast polling.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.recording.width = 32;
    config.recording.height = 24;
    config.upload.part_size_bytes = 64 * 1024;
    config.upload.poll_interval_ms = 10;
    config.upload.join_timeout_secs = 5;
    config.encoder.close_timeout_secs = 5;
    config
}

pub fn backend() -> Arc<FakeEncoder> {
    Arc::new(FakeEncoder::default())
}

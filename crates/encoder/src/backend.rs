//! The encoder seam.
//!
//! Synchronization logic only ever talks to these traits, so the ffmpeg
//! process can be swapped for another encoder, or for a fake in tests.

use std::path::Path;
use std::time::Duration;

use meetrec_common::MeetrecResult;

use crate::args::{MuxJob, RawVideoSpec};
use crate::profile::EncoderProfile;

/// How an encoder process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderExit {
    pub success: bool,
    /// The process did not exit within the close timeout.
    pub timed_out: bool,
    /// Last lines of the encoder's diagnostics.
    pub stderr_tail: String,
}

/// A running encoder accepting raw frames.
#[async_trait::async_trait]
pub trait EncoderInput: Send {
    /// Write one raw frame. An error means the encoder is gone and no more
    /// frames will be accepted.
    async fn feed(&mut self, frame: &[u8]) -> MeetrecResult<()>;

    /// Close the input and wait up to `timeout` for the encoder to exit.
    async fn close(self: Box<Self>, timeout: Duration) -> MeetrecResult<EncoderExit>;
}

/// Factory for encoder processes.
#[async_trait::async_trait]
pub trait EncoderBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Best profile available on this host. Never fails: falls back to software.
    async fn probe(&self) -> EncoderProfile;

    /// Start encoding raw frames of `spec` into `output`.
    async fn start(
        &self,
        spec: &RawVideoSpec,
        profile: EncoderProfile,
        output: &Path,
    ) -> MeetrecResult<Box<dyn EncoderInput>>;

    /// Merge video and audio into the deliverable.
    async fn mux(&self, job: &MuxJob, profile: EncoderProfile) -> MeetrecResult<()>;
}

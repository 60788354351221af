//! meetrec Recorder
//!
//! Orchestrates one recording from the first transport frame to the final
//! object in storage:
//! - **Intake:** bounded, non-blocking channel from the transport
//! - **EncoderPipe:** feeds synchronized frames to the encoder in slot order
//! - **ChunkedUploader:** streams the growing encoder output into storage
//! - **Finalizer:** muxes video and audio into the deliverable
//! - **SessionRegistry:** tracks concurrent recordings by session id

pub mod finalizer;
pub mod intake;
pub mod pipe;
pub mod registry;
pub mod session;
pub mod uploader;

pub use finalizer::{FinalizeReport, Finalizer};
pub use intake::{CaptureMessage, CaptureSender};
pub use pipe::{EncoderPipe, FeedReport};
pub use registry::SessionRegistry;
pub use session::{CompletionCallback, RecordingSession, SessionConfig, SessionStatus};
pub use uploader::{ChunkedUploader, UploadState, UploadSummary};

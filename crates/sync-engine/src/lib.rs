//! meetrec Sync Engine
//!
//! Turns the irregular stream of frames and audio delivered by a live
//! transport into inputs an encoder can consume:
//! - **Ingest:** thread-safe append-only stores for frames and audio chunks
//! - **Synchronization:** map fixed-rate output slots to captured frames
//! - **Mixing:** render per-participant chunks into one stereo track
//! - **Canvas:** letterbox frames to the output resolution
//!
//! No I/O happens here; the recorder crate drives these types.

pub mod canvas;
pub mod ingest;
pub mod mixer;
pub mod synchronizer;

pub use canvas::{fit_to_canvas, placeholder_frame};
pub use ingest::{FrameIngestBuffer, IngestStats};
pub use mixer::{AgcAction, AudioChunker, AudioMixer, MixReport, MixedAudio, TrackAdmission};
pub use synchronizer::{FrameIndex, SlotFrame, SlotPolicy};

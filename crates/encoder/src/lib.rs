//! meetrec Encoder
//!
//! Everything that touches the external encoder process:
//! - the [`EncoderBackend`] / [`EncoderInput`] seam the recorder drives
//! - the ffmpeg implementation with hardware profile probing
//! - argument builders for raw-frame encoding and final muxing
//! - WAV encoding of the mixed audio track

pub mod args;
pub mod backend;
pub mod ffmpeg;
pub mod profile;
pub mod wav;

pub use args::{MuxJob, RawVideoSpec};
pub use backend::{EncoderBackend, EncoderExit, EncoderInput};
pub use ffmpeg::{command_exists, FfmpegEncoder};
pub use profile::EncoderProfile;
pub use wav::{decode_wav, encode_wav};

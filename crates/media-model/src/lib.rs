//! meetrec Media Model
//!
//! Defines the data contracts shared by the recording pipeline:
//! - **Frames:** RGB24 video frames stamped with seconds since recording start
//! - **Audio:** transport audio frames and the flushed stereo chunks the mixer renders
//! - **Keys:** deterministic object-storage keys derived from a session id
//! - **Reports:** the outcome reported upward once a recording finishes
//!
//! All timestamps are seconds on the session's monotonic clock, never
//! wall-clock time.

pub mod audio;
pub mod frame;
pub mod keys;
pub mod report;

pub use audio::*;
pub use frame::*;
pub use keys::*;
pub use report::*;

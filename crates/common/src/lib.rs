//! meetrec Common Utilities
//!
//! Shared infrastructure for all meetrec crates:
//! - Error types and result aliases
//! - The monotonic recording clock every stream is stamped against
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;

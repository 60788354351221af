//! Error types shared across meetrec crates.

use std::path::PathBuf;

/// Top-level error type for meetrec operations.
#[derive(Debug, thiserror::Error)]
pub enum MeetrecError {
    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Synchronization error: {message}")]
    Sync { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Upload error: {message}")]
    Upload { message: String },

    #[error("Finalize error: {message}")]
    Finalize { message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Recording already active for session {session_id}")]
    AlreadyActive { session_id: String },

    #[error("No active recording for session {session_id}")]
    SessionNotFound { session_id: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using MeetrecError.
pub type MeetrecResult<T> = Result<T, MeetrecError>;

impl MeetrecError {
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
        }
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::Upload {
            message: msg.into(),
        }
    }

    pub fn finalize(msg: impl Into<String>) -> Self {
        Self::Finalize {
            message: msg.into(),
        }
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn object_not_found(key: impl Into<String>) -> Self {
        Self::ObjectNotFound { key: key.into() }
    }
}

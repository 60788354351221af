//! The outcome of a recording, reported upward exactly once.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Accepting frames and audio from the transport.
    Recording,
    /// Capture stopped; frames are being fed to the encoder and uploaded.
    Encoding,
    /// Muxing and uploading the deliverable.
    Finalizing,
    /// The deliverable is in storage and intermediates are gone.
    Completed,
    /// The recording was abandoned.
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Failed)
    }
}

/// Final status of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

/// Counters gathered over a session, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingStats {
    pub duration_secs: f64,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub slots_written: u64,
    pub placeholder_slots: u64,
    /// Slots that repeated an earlier frame across a short gap.
    #[serde(default)]
    pub held_slots: u64,
    pub audio_chunks: u64,
    pub parts_uploaded: u32,
    pub bytes_uploaded: u64,
    pub audio_clipped_fraction: f64,
}

/// What the metadata store is told when a recording ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingOutcome {
    pub session_id: String,
    pub status: OutcomeStatus,
    /// Key of the deliverable, when one was produced.
    pub final_key: Option<String>,
    pub error: Option<String>,
    pub stats: RecordingStats,
}

impl RecordingOutcome {
    pub fn completed(session_id: impl Into<String>, final_key: String, stats: RecordingStats) -> Self {
        Self {
            session_id: session_id.into(),
            status: OutcomeStatus::Completed,
            final_key: Some(final_key),
            error: None,
            stats,
        }
    }

    pub fn failed(session_id: impl Into<String>, error: impl Into<String>, stats: RecordingStats) -> Self {
        Self {
            session_id: session_id.into(),
            status: OutcomeStatus::Failed,
            final_key: None,
            error: Some(error.into()),
            stats,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_with_snake_case_status() {
        let outcome = RecordingOutcome::failed("s1", "encoder missing", RecordingStats::default());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "encoder missing");
        assert!(json["final_key"].is_null());
    }

    #[test]
    fn terminal_phases() {
        assert!(SessionPhase::Completed.is_terminal());
        assert!(SessionPhase::Failed.is_terminal());
        assert!(!SessionPhase::Encoding.is_terminal());
    }
}

//! Deterministic object-storage keys for a recording session.

use serde::{Deserialize, Serialize};

/// Every object key a session touches, derived from its id alone so that a
/// restarted process can find (and clean up) a session's objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingKeys {
    /// Prefix holding all intermediates of the session.
    pub temp_dir: String,
    /// Intermediate encoder output, uploaded in parts while encoding.
    pub raw_video: String,
    /// Rendered mixed audio track.
    pub raw_audio: String,
    /// The deliverable.
    pub final_video: String,
}

impl RecordingKeys {
    pub fn for_session(session_id: &str, temp_prefix: &str, final_prefix: &str) -> Self {
        let temp_dir = join_key(temp_prefix, session_id);
        Self {
            raw_video: format!("{temp_dir}/raw_video_{session_id}.avi"),
            raw_audio: format!("{temp_dir}/raw_audio_{session_id}.wav"),
            final_video: format!(
                "{}/recording_{session_id}.mp4",
                join_key(final_prefix, session_id)
            ),
            temp_dir,
        }
    }

    /// `temp_dir` with a trailing `/`, for prefix operations that must not
    /// match sibling sessions such as `m10` when cleaning up `m1`.
    pub fn temp_prefix(&self) -> String {
        format!("{}/", self.temp_dir)
    }
}

fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_derived_from_session_id() {
        let keys = RecordingKeys::for_session("m42", "recordings_temp/", "recordings");
        assert_eq!(keys.temp_dir, "recordings_temp/m42");
        assert_eq!(keys.raw_video, "recordings_temp/m42/raw_video_m42.avi");
        assert_eq!(keys.raw_audio, "recordings_temp/m42/raw_audio_m42.wav");
        assert_eq!(keys.final_video, "recordings/m42/recording_m42.mp4");
    }

    #[test]
    fn final_key_lives_outside_temp_prefix() {
        let keys = RecordingKeys::for_session("x", "tmp", "out");
        assert!(!keys.final_video.starts_with(&keys.temp_dir));
    }

    #[test]
    fn temp_prefix_does_not_cover_sibling_sessions() {
        let m1 = RecordingKeys::for_session("m1", "recordings_temp", "recordings");
        let m10 = RecordingKeys::for_session("m10", "recordings_temp", "recordings");
        assert_eq!(m1.temp_prefix(), "recordings_temp/m1/");
        assert!(m1.raw_video.starts_with(&m1.temp_prefix()));
        assert!(m10.temp_dir.starts_with(&m1.temp_dir));
        assert!(!m10.raw_audio.starts_with(&m1.temp_prefix()));
    }

    #[test]
    fn empty_prefix_is_allowed() {
        let keys = RecordingKeys::for_session("x", "", "");
        assert_eq!(keys.raw_video, "x/raw_video_x.avi");
        assert_eq!(keys.final_video, "x/recording_x.mp4");
    }
}

//! Audio as delivered by the transport, and the chunks the mixer consumes.

use serde::{Deserialize, Serialize};

/// Kind of audio track a participant publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSource {
    Microphone,
    ScreenAudio,
}

impl AudioSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AudioSource::Microphone => "microphone",
            AudioSource::ScreenAudio => "screen_audio",
        }
    }

    /// Classify a track by its published name. Names mentioning a screen,
    /// desktop, system or share are treated as screen audio.
    pub fn from_track_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if ["screen", "desktop", "system", "share"]
            .iter()
            .any(|keyword| lower.contains(keyword))
        {
            AudioSource::ScreenAudio
        } else {
            AudioSource::Microphone
        }
    }
}

/// Key of one rolling audio buffer: at most one live track per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey {
    pub participant_id: String,
    pub source: AudioSource,
}

impl TrackKey {
    pub fn new(participant_id: impl Into<String>, source: AudioSource) -> Self {
        Self {
            participant_id: participant_id.into(),
            source,
        }
    }
}

impl std::fmt::Display for TrackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.participant_id, self.source.as_str())
    }
}

/// A flushed run of interleaved stereo samples from one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Seconds since recording start of the first sample.
    pub start_secs: f64,
    /// Interleaved stereo i16 samples.
    pub samples: Vec<i16>,
    pub participant_id: String,
    pub source: AudioSource,
}

impl AudioChunk {
    /// Duration in seconds at the given layout.
    pub fn duration_secs(&self, sample_rate: u32, channels: u16) -> f64 {
        let per_second = sample_rate as f64 * channels.max(1) as f64;
        if per_second <= 0.0 {
            return 0.0;
        }
        self.samples.len() as f64 / per_second
    }

    pub fn end_secs(&self, sample_rate: u32, channels: u16) -> f64 {
        self.start_secs + self.duration_secs(sample_rate, channels)
    }
}

/// Sample payload of a transport audio frame.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSamples {
    I16(Vec<i16>),
    F32(Vec<f32>),
}

impl AudioSamples {
    pub fn len(&self) -> usize {
        match self {
            AudioSamples::I16(s) => s.len(),
            AudioSamples::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One audio frame as the transport hands it over.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: AudioSamples,
}

impl AudioFrame {
    /// Convert to interleaved stereo i16.
    ///
    /// Mono is duplicated to both channels, stereo passes through and wider
    /// layouts keep their first two channels. Float samples are clamped to
    /// `[-1, 1]` before scaling. Returns `None` for empty or malformed frames.
    pub fn to_stereo_i16(&self) -> Option<Vec<i16>> {
        if self.samples.is_empty() || self.channels == 0 {
            return None;
        }
        let pcm: Vec<i16> = match &self.samples {
            AudioSamples::I16(s) => s.clone(),
            AudioSamples::F32(s) => s
                .iter()
                .map(|v| (v.clamp(-1.0, 1.0) * 32767.0) as i16)
                .collect(),
        };

        let channels = self.channels as usize;
        if pcm.len() % channels != 0 {
            return None;
        }

        let stereo = match channels {
            1 => pcm.iter().flat_map(|&s| [s, s]).collect(),
            2 => pcm,
            _ => pcm
                .chunks_exact(channels)
                .flat_map(|frame| [frame[0], frame[1]])
                .collect(),
        };
        Some(stereo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_is_duplicated() {
        let frame = AudioFrame {
            sample_rate: 48000,
            channels: 1,
            samples: AudioSamples::I16(vec![1, -2, 3]),
        };
        assert_eq!(frame.to_stereo_i16(), Some(vec![1, 1, -2, -2, 3, 3]));
    }

    #[test]
    fn test_surround_keeps_front_pair() {
        let frame = AudioFrame {
            sample_rate: 48000,
            channels: 4,
            samples: AudioSamples::I16(vec![1, 2, 3, 4, 5, 6, 7, 8]),
        };
        assert_eq!(frame.to_stereo_i16(), Some(vec![1, 2, 5, 6]));
    }

    #[test]
    fn test_float_is_clamped_and_scaled() {
        let frame = AudioFrame {
            sample_rate: 48000,
            channels: 2,
            samples: AudioSamples::F32(vec![2.0, -0.5]),
        };
        assert_eq!(frame.to_stereo_i16(), Some(vec![32767, -16383]));
    }

    #[test]
    fn test_empty_frame_converts_to_nothing() {
        let frame = AudioFrame {
            sample_rate: 48000,
            channels: 2,
            samples: AudioSamples::I16(Vec::new()),
        };
        assert_eq!(frame.to_stereo_i16(), None);
    }

    #[test]
    fn test_track_name_classification() {
        assert_eq!(AudioSource::from_track_name("Desktop Audio"), AudioSource::ScreenAudio);
        assert_eq!(AudioSource::from_track_name("mic-1"), AudioSource::Microphone);
        assert_eq!(TrackKey::new("alice", AudioSource::Microphone).to_string(), "alice_microphone");
    }

    #[test]
    fn test_chunk_duration() {
        let chunk = AudioChunk {
            start_secs: 1.0,
            samples: vec![0; 9600],
            participant_id: "a".into(),
            source: AudioSource::Microphone,
        };
        assert!((chunk.duration_secs(48000, 2) - 0.1).abs() < 1e-12);
        assert!((chunk.end_secs(48000, 2) - 1.1).abs() < 1e-12);
    }
}

//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MeetrecError, MeetrecResult};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Durable storage layout.
    pub storage: StorageConfig,

    /// Capture and synchronization settings.
    pub recording: RecordingDefaults,

    /// Chunked upload settings.
    pub upload: UploadConfig,

    /// External encoder settings.
    pub encoder: EncoderConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Where recordings are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for the filesystem object store.
    pub root_dir: PathBuf,

    /// Key prefix for intermediate objects (raw video, raw audio).
    pub temp_prefix: String,

    /// Key prefix for finalized recordings.
    pub final_prefix: String,
}

/// Capture and synchronization parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Output frame rate R. Used for slot indexing, the encoder feed and the
    /// final container timebase.
    pub fps: u32,

    /// Fixed encoder input width.
    pub width: u32,

    /// Fixed encoder input height.
    pub height: u32,

    /// Audio sample rate of the rendered track.
    pub audio_sample_rate: u32,

    /// Channels of the rendered track.
    pub audio_channels: u16,

    /// Per-(participant, source) audio flush size in milliseconds.
    pub audio_flush_ms: u32,

    /// Shortest recording that will be rendered (seconds).
    pub min_duration_secs: f64,

    /// Capacity of the per-session capture intake queue.
    pub intake_queue_capacity: usize,

    /// Upper bound on buffered video frames; `None` keeps every frame.
    pub max_buffered_frames: Option<usize>,

    /// How long the most recent frame keeps filling empty slots after it
    /// (seconds). Older gaps get the placeholder frame.
    pub hold_last_frame_secs: f64,
}

/// Multipart upload of the intermediate video.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Bytes per uploaded part (the last part may be smaller).
    pub part_size_bytes: u64,

    /// How often the local file size is polled.
    pub poll_interval_ms: u64,

    /// Extra attempts for a failed part before the session is aborted.
    pub part_retry_attempts: u32,

    /// Delay between part retries, multiplied by the attempt number.
    pub retry_backoff_ms: u64,

    /// How long stop waits for the monitor task to finish its in-flight part.
    pub join_timeout_secs: u64,
}

/// External encoder process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Path or name of the ffmpeg binary.
    pub ffmpeg_path: String,

    /// Try the hardware profile when the probe reports one.
    pub prefer_hardware: bool,

    /// Upper bound for the hardware probe.
    pub probe_timeout_secs: u64,

    /// How long to wait for the encoder to exit after its input is closed.
    pub close_timeout_secs: u64,

    /// x264 preset for the software profile.
    pub software_preset: String,

    /// x264 CRF for the software profile.
    pub software_crf: u32,

    /// Constant bitrate for the hardware profile (ffmpeg syntax, e.g. "2M").
    pub hardware_bitrate: String,

    /// AAC bitrate of the final container.
    pub audio_bitrate: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "meetrec_recorder=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            recording: RecordingDefaults::default(),
            upload: UploadConfig::default(),
            encoder: EncoderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: dirs_default_store(),
            temp_prefix: "recordings_temp".to_string(),
            final_prefix: "recordings".to_string(),
        }
    }
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            fps: 24,
            width: 1280,
            height: 720,
            audio_sample_rate: 48000,
            audio_channels: 2,
            audio_flush_ms: 100,
            min_duration_secs: 1.0,
            intake_queue_capacity: 1024,
            max_buffered_frames: None,
            hold_last_frame_secs: 2.0,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size_bytes: 5 * 1024 * 1024,
            poll_interval_ms: 500,
            part_retry_attempts: 0,
            retry_backoff_ms: 500,
            join_timeout_secs: 60,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            prefer_hardware: true,
            probe_timeout_secs: 5,
            close_timeout_secs: 60,
            software_preset: "medium".to_string(),
            software_crf: 21,
            hardware_bitrate: "2M".to_string(),
            audio_bitrate: "192k".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl RecordingDefaults {
    /// Interleaved samples per flushed audio chunk.
    pub fn audio_flush_samples(&self) -> usize {
        let frames = self.audio_sample_rate as u64 * self.audio_flush_ms as u64 / 1000;
        (frames as usize).max(1) * self.audio_channels as usize
    }

    /// Duration of one output frame in seconds.
    pub fn frame_interval_secs(&self) -> f64 {
        1.0 / self.fps.max(1) as f64
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load and validate config from an explicit path.
    pub fn load_from(path: &Path) -> MeetrecResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Reject settings that would produce an unplayable or drifting output.
    pub fn validate(&self) -> MeetrecResult<()> {
        validate_prefixes(&self.storage.temp_prefix, &self.storage.final_prefix)?;
        let rec = &self.recording;
        if rec.fps == 0 {
            return Err(MeetrecError::config("recording.fps must be positive"));
        }
        if rec.width == 0 || rec.height == 0 {
            return Err(MeetrecError::config("recording dimensions must be positive"));
        }
        if rec.width % 2 != 0 || rec.height % 2 != 0 {
            return Err(MeetrecError::config(
                "recording dimensions must be even for yuv420p output",
            ));
        }
        if rec.audio_sample_rate == 0 {
            return Err(MeetrecError::config("audio sample rate must be positive"));
        }
        if rec.audio_channels != 2 {
            return Err(MeetrecError::config(format!(
                "the audio track is stereo, got {} channels",
                rec.audio_channels
            )));
        }
        if !rec.hold_last_frame_secs.is_finite() || rec.hold_last_frame_secs < 0.0 {
            return Err(MeetrecError::config(
                "recording.hold_last_frame_secs must be zero or positive",
            ));
        }
        if rec.intake_queue_capacity == 0 {
            return Err(MeetrecError::config("intake queue capacity must be positive"));
        }
        if self.upload.part_size_bytes == 0 {
            return Err(MeetrecError::config("upload.part_size_bytes must be positive"));
        }
        if self.upload.poll_interval_ms == 0 {
            return Err(MeetrecError::config("upload.poll_interval_ms must be positive"));
        }
        Ok(())
    }
}

/// Temp and final prefixes must be distinct directories, otherwise cleaning
/// one session's intermediates can reach into finished recordings.
pub fn validate_prefixes(temp_prefix: &str, final_prefix: &str) -> MeetrecResult<()> {
    let temp = temp_prefix.trim_matches('/');
    let fin = final_prefix.trim_matches('/');
    if temp.is_empty() || fin.is_empty() {
        return Err(MeetrecError::config(
            "storage temp and final prefixes must not be empty",
        ));
    }
    if temp == fin {
        return Err(MeetrecError::config(format!(
            "storage temp and final prefixes must differ, both are {temp:?}"
        )));
    }
    Ok(())
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("meetrec").join("config.json")
}

/// Default object store directory.
fn dirs_default_store() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("meetrec").join("store")
}

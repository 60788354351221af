//! ffmpeg argument builders.

use std::path::{Path, PathBuf};

use meetrec_common::EncoderConfig;

use crate::profile::EncoderProfile;

const HARDWARE_PRESET: &str = "p5";
const HARDWARE_MAXRATE: &str = "2.5M";
const HARDWARE_BUFSIZE: &str = "15M";
const AUDIO_SAMPLE_RATE: &str = "48000";
const AUDIO_CHANNELS: &str = "2";

/// Raw frame input contract of the encoder: packed rgb24 at a fixed size and rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawVideoSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl RawVideoSpec {
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn size_arg(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Inputs and output of the final mux.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxJob {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub output: PathBuf,
    /// Output frame rate and container timebase.
    pub fps: u32,
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn video_codec_args(profile: EncoderProfile, config: &EncoderConfig) -> Vec<String> {
    match profile {
        EncoderProfile::Hardware => strings(&[
            "-c:v",
            profile.codec(),
            "-preset",
            HARDWARE_PRESET,
            "-rc",
            "cbr",
            "-b:v",
            &config.hardware_bitrate,
            "-maxrate",
            HARDWARE_MAXRATE,
            "-bufsize",
            HARDWARE_BUFSIZE,
        ]),
        EncoderProfile::Software => strings(&[
            "-c:v",
            profile.codec(),
            "-preset",
            &config.software_preset,
            "-crf",
            &config.software_crf.to_string(),
        ]),
    }
}

/// Arguments for encoding raw frames from stdin into an AVI at `output`.
pub fn encode_args(
    spec: &RawVideoSpec,
    profile: EncoderProfile,
    config: &EncoderConfig,
    output: &Path,
) -> Vec<String> {
    let fps = spec.fps.to_string();
    let mut args = strings(&[
        "-y",
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
        "-s",
        &spec.size_arg(),
        "-r",
        &fps,
        "-i",
        "-",
    ]);
    args.extend(video_codec_args(profile, config));
    args.extend(strings(&["-r", &fps, "-pix_fmt", "yuv420p", "-f", "avi"]));
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Arguments for muxing video and audio into a constant frame rate mp4.
pub fn mux_args(job: &MuxJob, profile: EncoderProfile, config: &EncoderConfig) -> Vec<String> {
    let fps = job.fps.to_string();
    let mut args = strings(&["-y", "-hide_banner", "-loglevel", "error", "-i"]);
    args.push(job.video.to_string_lossy().into_owned());
    args.push("-i".to_string());
    args.push(job.audio.to_string_lossy().into_owned());
    args.extend(strings(&["-map", "0:v:0", "-map", "1:a:0"]));
    args.extend(video_codec_args(profile, config));
    args.extend(strings(&[
        "-pix_fmt",
        "yuv420p",
        "-r",
        &fps,
        "-fps_mode",
        "cfr",
        "-c:a",
        "aac",
        "-b:a",
        &config.audio_bitrate,
        "-ar",
        AUDIO_SAMPLE_RATE,
        "-ac",
        AUDIO_CHANNELS,
        "-af",
        "asetpts=PTS-STARTPTS",
        "-video_track_timescale",
        &fps,
        "-movflags",
        "+faststart",
        "-max_interleave_delta",
        "0",
    ]));
    args.push(job.output.to_string_lossy().into_owned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> RawVideoSpec {
        RawVideoSpec {
            width: 1280,
            height: 720,
            fps: 24,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_software_encode_args() {
        let args = encode_args(
            &spec(),
            EncoderProfile::Software,
            &EncoderConfig::default(),
            Path::new("/tmp/out.avi"),
        );
        assert_eq!(value_after(&args, "-f"), Some("rawvideo"));
        assert_eq!(value_after(&args, "-pix_fmt"), Some("rgb24"));
        assert_eq!(value_after(&args, "-s"), Some("1280x720"));
        assert_eq!(value_after(&args, "-i"), Some("-"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-preset"), Some("medium"));
        assert_eq!(value_after(&args, "-crf"), Some("21"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.avi"));
    }

    #[test]
    fn test_hardware_encode_args() {
        let args = encode_args(
            &spec(),
            EncoderProfile::Hardware,
            &EncoderConfig::default(),
            Path::new("out.avi"),
        );
        assert_eq!(value_after(&args, "-c:v"), Some("h264_nvenc"));
        assert_eq!(value_after(&args, "-rc"), Some("cbr"));
        assert_eq!(value_after(&args, "-b:v"), Some("2M"));
        assert!(!args.iter().any(|a| a == "-crf"));
    }

    #[test]
    fn test_mux_args_pin_timebase() {
        let job = MuxJob {
            video: PathBuf::from("v.avi"),
            audio: PathBuf::from("a.wav"),
            output: PathBuf::from("out.mp4"),
            fps: 24,
        };
        let args = mux_args(&job, EncoderProfile::Software, &EncoderConfig::default());
        assert_eq!(value_after(&args, "-fps_mode"), Some("cfr"));
        assert_eq!(value_after(&args, "-video_track_timescale"), Some("24"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-b:a"), Some("192k"));
        assert_eq!(value_after(&args, "-ar"), Some("48000"));
        assert_eq!(value_after(&args, "-movflags"), Some("+faststart"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }
}

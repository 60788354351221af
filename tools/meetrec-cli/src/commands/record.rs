//! Record a synthetic meeting end to end.
//!
//! Frames are a moving test pattern delivered at the output rate; every
//! participant contributes a sine tone in 20 ms stereo batches. Ctrl+C stops
//! the recording early.

use std::f64::consts::TAU;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use meetrec_common::AppConfig;
use meetrec_encoder::FfmpegEncoder;
use meetrec_media_model::{AudioSource, FrameSource, VideoFrame};
use meetrec_recorder::SessionRegistry;
use meetrec_storage::FsObjectStore;

const SOURCE_WIDTH: u32 = 640;
const SOURCE_HEIGHT: u32 = 360;
const AUDIO_BATCH_MS: u64 = 20;
const TONE_AMPLITUDE: f64 = 6000.0;

pub async fn run(
    mut config: AppConfig,
    session: String,
    duration: f64,
    participants: usize,
    store: Option<PathBuf>,
    fps: Option<u32>,
) -> anyhow::Result<()> {
    if !(duration.is_finite() && duration > 0.0) {
        anyhow::bail!("duration must be a positive number of seconds");
    }
    if let Some(root) = store {
        config.storage.root_dir = root;
    }
    if let Some(fps) = fps {
        config.recording.fps = fps;
    }
    config.validate()?;

    let encoder = FfmpegEncoder::new(config.encoder.clone());
    if !encoder.is_available() {
        anyhow::bail!(
            "ffmpeg not found at '{}'; run `meetrec check`",
            config.encoder.ffmpeg_path
        );
    }
    let store = FsObjectStore::open(&config.storage.root_dir)?;

    println!("Starting synthetic recording: {session}");
    println!("  Store: {}", config.storage.root_dir.display());
    println!("  Duration: {duration:.1}s");
    println!("  Participants: {participants}");
    println!(
        "  Output: {}x{} @ {}fps",
        config.recording.width, config.recording.height, config.recording.fps
    );
    println!();
    println!("Press Ctrl+C to stop early...");
    println!();

    let sample_rate = config.recording.audio_sample_rate;
    let fps = config.recording.fps;
    let registry = SessionRegistry::new(Arc::new(store), Arc::new(encoder), config);
    let sender = registry.start(&session)?;

    let mut tones: Vec<Tone> = (0..participants)
        .map(|i| Tone::new(220.0 * (i + 1) as f64, sample_rate))
        .collect();
    let batch_frames = (sample_rate as u64 * AUDIO_BATCH_MS / 1000) as usize;

    let mut video_tick = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    let mut audio_tick = tokio::time::interval(Duration::from_millis(AUDIO_BATCH_MS));
    let deadline = tokio::time::sleep(Duration::from_secs_f64(duration));
    tokio::pin!(deadline);

    let mut frame_index = 0u64;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping early");
                break;
            }
            _ = video_tick.tick() => {
                sender.add_video_frame(test_pattern(SOURCE_WIDTH, SOURCE_HEIGHT, frame_index), FrameSource::Camera);
                frame_index += 1;
            }
            _ = audio_tick.tick() => {
                for (i, tone) in tones.iter_mut().enumerate() {
                    let participant = format!("participant-{}", i + 1);
                    sender.add_audio_samples(tone.next_batch(batch_frames), &participant, Some("mic"), AudioSource::Microphone);
                }
            }
        }
    }

    if sender.dropped() > 0 {
        println!("Warning: {} inputs dropped by a full queue", sender.dropped());
    }
    println!("Encoding and uploading...");

    let outcome = registry.stop(&session)?.await?;
    if !outcome.is_completed() {
        anyhow::bail!(
            "Recording failed: {}",
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let stats = &outcome.stats;
    println!();
    println!("Recording complete:");
    println!("  Duration: {:.2}s", stats.duration_secs);
    println!(
        "  Frames: {} captured, {} slots written ({} held, {} placeholders)",
        stats.frames_captured, stats.slots_written, stats.held_slots, stats.placeholder_slots
    );
    println!("  Audio chunks: {}", stats.audio_chunks);
    println!(
        "  Upload: {} parts, {} bytes",
        stats.parts_uploaded, stats.bytes_uploaded
    );
    if let Some(key) = &outcome.final_key {
        println!("  Final key: {key}");
    }
    Ok(())
}

/// A bright bar sweeping across a dark background, one step per frame.
fn test_pattern(width: u32, height: u32, index: u64) -> VideoFrame {
    let bar_width = (width / 16).max(1);
    let bar_start = (index * 8 % width as u64) as u32;
    let shade = (index % 200) as u8 + 40;

    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        let row = (y * 60 / height.max(1)) as u8;
        for x in 0..width {
            let in_bar = (x + width - bar_start) % width < bar_width;
            if in_bar {
                data.extend_from_slice(&[240, 240, shade]);
            } else {
                data.extend_from_slice(&[row, 20, 40]);
            }
        }
    }
    VideoFrame {
        width,
        height,
        data: data.into(),
    }
}

/// Stereo sine generator with continuous phase.
struct Tone {
    step: f64,
    phase: f64,
}

impl Tone {
    fn new(frequency: f64, sample_rate: u32) -> Self {
        Self {
            step: TAU * frequency / sample_rate.max(1) as f64,
            phase: 0.0,
        }
    }

    fn next_batch(&mut self, frames: usize) -> Vec<i16> {
        let mut samples = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            let value = (self.phase.sin() * TONE_AMPLITUDE) as i16;
            samples.push(value);
            samples.push(value);
            self.phase = (self.phase + self.step) % TAU;
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_valid_rgb24() {
        let frame = test_pattern(64, 36, 17);
        assert!(frame.validate().is_ok());
        assert_ne!(test_pattern(64, 36, 0).data, test_pattern(64, 36, 1).data);
    }

    #[test]
    fn tone_is_interleaved_stereo() {
        let mut tone = Tone::new(440.0, 48000);
        let batch = tone.next_batch(960);
        assert_eq!(batch.len(), 1920);
        assert!(batch.chunks(2).all(|lr| lr[0] == lr[1]));
        assert!(batch.iter().all(|s| (s.abs() as f64) <= TONE_AMPLITUDE));
    }
}

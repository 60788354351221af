//! Check encoder availability.

use meetrec_common::AppConfig;
use meetrec_encoder::{EncoderBackend, FfmpegEncoder};

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("meetrec System Check");
    println!("{}", "=".repeat(50));

    let encoder = FfmpegEncoder::new(config.encoder.clone());
    let binary = &config.encoder.ffmpeg_path;
    if !encoder.is_available() {
        println!("[FAIL] ffmpeg: '{binary}' not found");
        println!();
        println!("Install ffmpeg or set encoder.ffmpeg_path in the config file.");
        return Ok(());
    }
    println!("[OK] ffmpeg: {binary}");

    let profile = encoder.probe().await;
    if profile.is_hardware() {
        println!("[OK] Encoder profile: {profile} (hardware)");
    } else if config.encoder.prefer_hardware {
        println!("[WARN] Encoder profile: {profile} (no hardware encoder found)");
    } else {
        println!("[OK] Encoder profile: {profile} (hardware disabled in config)");
    }

    println!(
        "     Output: {}x{} @ {}fps, audio {} Hz x{}",
        config.recording.width,
        config.recording.height,
        config.recording.fps,
        config.recording.audio_sample_rate,
        config.recording.audio_channels
    );
    println!("     Store: {}", config.storage.root_dir.display());

    println!();
    println!("meetrec is ready.");
    Ok(())
}

//! Audio chunking and mixing.
//!
//! Audio arrives in small transport frames per participant track. The
//! [`AudioChunker`] groups it into fixed-size chunks stamped on the
//! recording clock, and the [`AudioMixer`] renders all chunks into one
//! stereo track once capture has stopped.
//!
//! # Render
//!
//! 1. **Accumulate** every chunk at its start offset into a float buffer,
//!    counting how many chunks wrote each sample.
//! 2. **Normalize** overlapped samples by `sqrt(count)`.
//! 3. **AGC**: one global pass. Peaks above 28000 are compressed above a
//!    knee, peaks above 20000 are scaled down to 18000, and peaks below 8000
//!    are lifted to 18000.
//! 4. **Clip** to the i16 range.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use meetrec_common::DriftMeasurement;
use meetrec_media_model::{AudioChunk, TrackKey};
use serde::Serialize;

/// Peak above which the mix is compressed.
const AGC_COMPRESS_PEAK: f64 = 28000.0;
/// Knee of the compressor.
const AGC_KNEE: f64 = 20000.0;
const AGC_RATIO: f64 = 0.7;
/// Peak below which the mix is boosted.
const AGC_BOOST_PEAK: f64 = 8000.0;
/// Peak a boosted or attenuated mix is scaled to.
const AGC_TARGET_PEAK: f64 = 18000.0;
/// Fractional offsets at or below this are written without interpolation.
const INTERPOLATION_THRESHOLD: f64 = 0.01;
/// Offsets this close to a frame boundary are float noise, not real offsets.
const OFFSET_SNAP_FRAMES: f64 = 1e-6;
const DRIFT_WARN_MS: f64 = 100.0;

/// Whether a track was admitted into its (participant, source) buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackAdmission {
    Accepted,
    /// Another track already feeds this key.
    Duplicate,
}

#[derive(Debug)]
struct RollingBuffer {
    samples: Vec<i16>,
    /// Arrival time of the first samples.
    origin_secs: f64,
    /// Samples already emitted as chunks.
    emitted: usize,
    drift_warned: bool,
}

impl RollingBuffer {
    /// Start time of the next chunk: first arrival plus everything emitted.
    fn running_start_secs(&self, per_second: f64) -> f64 {
        self.origin_secs + self.emitted as f64 / per_second
    }
}

/// Per-(participant, source) rolling buffers that emit fixed-size chunks.
#[derive(Debug)]
pub struct AudioChunker {
    sample_rate: u32,
    channels: u16,
    flush_samples: usize,
    buffers: HashMap<TrackKey, RollingBuffer>,
    active_tracks: HashMap<TrackKey, String>,
    chunks: Vec<AudioChunk>,
}

impl AudioChunker {
    /// `flush_samples` counts interleaved samples, not frames.
    pub fn new(sample_rate: u32, channels: u16, flush_samples: usize) -> Self {
        let channels = channels.max(1);
        let flush_samples = flush_samples.max(channels as usize);
        Self {
            sample_rate: sample_rate.max(1),
            channels,
            flush_samples,
            buffers: HashMap::new(),
            active_tracks: HashMap::new(),
            chunks: Vec::new(),
        }
    }

    /// Append samples that arrived at `arrival_secs`.
    ///
    /// With a `track_id`, the first track seen for a key owns it until
    /// released; samples from any other track for the same key are refused.
    pub fn push(
        &mut self,
        key: TrackKey,
        track_id: Option<&str>,
        samples: &[i16],
        arrival_secs: f64,
    ) -> TrackAdmission {
        if let Some(track_id) = track_id {
            match self.active_tracks.get(&key) {
                Some(owner) if owner != track_id => {
                    tracing::debug!(
                        key = %key,
                        owner = %owner,
                        track_id,
                        "Ignoring duplicate audio track"
                    );
                    return TrackAdmission::Duplicate;
                }
                Some(_) => {}
                None => {
                    tracing::info!(key = %key, track_id, "Audio track admitted");
                    self.active_tracks.insert(key.clone(), track_id.to_string());
                }
            }
        }

        if samples.is_empty() {
            return TrackAdmission::Accepted;
        }

        let flush_samples = self.flush_samples;
        let per_second = self.sample_rate as f64 * self.channels as f64;

        let buffer = self
            .buffers
            .entry(key.clone())
            .or_insert_with(|| RollingBuffer {
                samples: Vec::new(),
                origin_secs: arrival_secs.max(0.0),
                emitted: 0,
                drift_warned: false,
            });
        buffer.samples.extend_from_slice(samples);

        while buffer.samples.len() >= flush_samples {
            let chunk_samples: Vec<i16> = buffer.samples.drain(..flush_samples).collect();
            self.chunks.push(AudioChunk {
                start_secs: buffer.running_start_secs(per_second),
                samples: chunk_samples,
                participant_id: key.participant_id.clone(),
                source: key.source,
            });
            buffer.emitted += flush_samples;

            let drift = DriftMeasurement {
                expected_secs: buffer.running_start_secs(per_second),
                observed_secs: arrival_secs - buffer.samples.len() as f64 / per_second,
            };
            if !buffer.drift_warned && drift.exceeds_threshold_ms(DRIFT_WARN_MS) {
                buffer.drift_warned = true;
                tracing::warn!(
                    key = %key,
                    drift_ms = drift.drift_ms(),
                    "Audio running timestamp drifted from arrival time"
                );
            }
        }

        TrackAdmission::Accepted
    }

    /// Flush the key's partial buffer and free it for a new track.
    ///
    /// Returns `false` when `track_id` does not own the key.
    pub fn release(&mut self, key: &TrackKey, track_id: Option<&str>) -> bool {
        if let (Some(track_id), Some(owner)) = (track_id, self.active_tracks.get(key)) {
            if owner != track_id {
                return false;
            }
        }
        self.active_tracks.remove(key);
        if let Some(buffer) = self.buffers.remove(key) {
            self.emit_partial(key, buffer);
        }
        tracing::info!(key = %key, "Audio track released");
        true
    }

    /// Flush every partial buffer regardless of size.
    pub fn flush_all(&mut self) {
        let mut buffers: Vec<(TrackKey, RollingBuffer)> = self.buffers.drain().collect();
        buffers.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, buffer) in buffers {
            self.emit_partial(&key, buffer);
        }
        self.active_tracks.clear();
    }

    fn emit_partial(&mut self, key: &TrackKey, buffer: RollingBuffer) {
        if buffer.samples.is_empty() {
            return;
        }
        let per_second = self.sample_rate as f64 * self.channels as f64;
        self.chunks.push(AudioChunk {
            start_secs: buffer.running_start_secs(per_second),
            samples: buffer.samples,
            participant_id: key.participant_id.clone(),
            source: key.source,
        });
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Samples currently held in partial buffers.
    pub fn pending_samples(&self) -> usize {
        self.buffers.values().map(|b| b.samples.len()).sum()
    }

    /// Latest end time of any emitted chunk.
    pub fn max_chunk_end_secs(&self) -> f64 {
        self.chunks
            .iter()
            .map(|c| c.end_secs(self.sample_rate, self.channels))
            .fold(0.0, f64::max)
    }

    pub fn take_chunks(&mut self) -> Vec<AudioChunk> {
        std::mem::take(&mut self.chunks)
    }
}

/// Gain decision of the AGC pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgcAction {
    /// Nothing to do, or the mix was silent.
    Untouched,
    /// Soft-knee compression above the knee.
    Compressed { knee: f64, ratio: f64 },
    /// Linear gain above one.
    Boosted { gain: f64 },
    /// Linear gain below one for a mix that is loud but under the
    /// compression threshold.
    Attenuated { gain: f64 },
}

/// Diagnostics of one render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixReport {
    pub chunks_applied: usize,
    pub chunks_skipped: usize,
    pub participants: BTreeSet<String>,
    pub chunks_per_source: BTreeMap<String, usize>,
    pub max_overlap: u32,
    /// Fraction of samples written by more than one chunk.
    pub overlap_fraction: f64,
    pub peak_before_agc: f64,
    pub peak_after_agc: f64,
    pub agc: AgcAction,
    pub clipped_fraction: f64,
    /// The track is silence, either because no audio arrived or it was all zero.
    pub silent: bool,
}

impl MixReport {
    fn empty() -> Self {
        Self {
            chunks_applied: 0,
            chunks_skipped: 0,
            participants: BTreeSet::new(),
            chunks_per_source: BTreeMap::new(),
            max_overlap: 0,
            overlap_fraction: 0.0,
            peak_before_agc: 0.0,
            peak_after_agc: 0.0,
            agc: AgcAction::Untouched,
            clipped_fraction: 0.0,
            silent: true,
        }
    }
}

/// A rendered track.
#[derive(Debug, Clone)]
pub struct MixedAudio {
    /// Interleaved i16 samples.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    pub report: MixReport,
}

impl MixedAudio {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Renders chunks into one track.
#[derive(Debug, Clone, Copy)]
pub struct AudioMixer {
    sample_rate: u32,
    channels: u16,
}

impl AudioMixer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
        }
    }

    /// Interleaved sample count for `duration_secs`.
    pub fn track_len(&self, duration_secs: f64) -> usize {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return 0;
        }
        (duration_secs * self.sample_rate as f64).floor() as usize * self.channels as usize
    }

    /// Silence of exactly `duration_secs`.
    pub fn silent_track(&self, duration_secs: f64) -> Vec<i16> {
        vec![0; self.track_len(duration_secs)]
    }

    fn silent(&self, duration_secs: f64, report: MixReport) -> MixedAudio {
        MixedAudio {
            samples: self.silent_track(duration_secs),
            sample_rate: self.sample_rate,
            channels: self.channels,
            report,
        }
    }

    /// Mix `chunks` into a track of exactly `duration_secs`.
    pub fn render(&self, chunks: &[AudioChunk], duration_secs: f64) -> MixedAudio {
        let mut report = MixReport::empty();
        if chunks.is_empty() {
            tracing::info!(duration_secs, "No audio chunks, rendering silent track");
            return self.silent(duration_secs, report);
        }

        let channels = self.channels as usize;
        let total_frames = self.track_len(duration_secs) / channels;
        let mut acc = vec![0.0f64; total_frames * channels];
        let mut counts = vec![0u32; total_frames * channels];

        let mut ordered: Vec<&AudioChunk> = chunks.iter().collect();
        ordered.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));

        for chunk in ordered {
            if chunk.samples.is_empty() {
                report.chunks_skipped += 1;
                continue;
            }
            let mut start = chunk.start_secs.max(0.0) * self.sample_rate as f64;
            if (start - start.round()).abs() < OFFSET_SNAP_FRAMES {
                start = start.round();
            }
            let start_frame = start.floor() as usize;
            let fraction = start - start.floor();
            if start_frame >= total_frames {
                report.chunks_skipped += 1;
                continue;
            }

            let sample = |frame: usize, channel: usize| -> f64 {
                chunk
                    .samples
                    .get(frame * channels + channel)
                    .copied()
                    .unwrap_or(0) as f64
            };

            let chunk_frames = chunk.samples.len().div_ceil(channels);
            let writable = chunk_frames.min(total_frames - start_frame);
            let interpolate = fraction > INTERPOLATION_THRESHOLD;

            for k in 0..writable {
                let base = (start_frame + k) * channels;
                for c in 0..channels {
                    let value = if interpolate && k > 0 {
                        (1.0 - fraction) * sample(k, c) + fraction * sample(k - 1, c)
                    } else {
                        sample(k, c)
                    };
                    acc[base + c] += value;
                    counts[base + c] += 1;
                }
            }

            report.chunks_applied += 1;
            report.participants.insert(chunk.participant_id.clone());
            *report
                .chunks_per_source
                .entry(chunk.source.as_str().to_string())
                .or_default() += 1;
        }

        report.peak_before_agc = peak(&acc);
        if report.peak_before_agc == 0.0 {
            tracing::info!(
                chunks = report.chunks_applied,
                "Mixed audio is entirely zero, rendering silent track"
            );
            return self.silent(duration_secs, report);
        }
        report.silent = false;

        let mut overlapped = 0usize;
        for (value, &count) in acc.iter_mut().zip(&counts) {
            if count > 1 {
                *value /= (count as f64).sqrt();
                overlapped += 1;
            }
            report.max_overlap = report.max_overlap.max(count);
        }
        report.overlap_fraction = overlapped as f64 / acc.len().max(1) as f64;

        let normalized_peak = peak(&acc);
        report.agc = apply_agc(&mut acc, normalized_peak);
        report.peak_after_agc = peak(&acc);

        let mut clipped = 0usize;
        let samples: Vec<i16> = acc
            .iter()
            .map(|&v| {
                let rounded = v.round();
                if rounded > i16::MAX as f64 || rounded < i16::MIN as f64 {
                    clipped += 1;
                }
                rounded.clamp(i16::MIN as f64, i16::MAX as f64) as i16
            })
            .collect();
        report.clipped_fraction = clipped as f64 / samples.len().max(1) as f64;

        if report.clipped_fraction > 0.0 {
            tracing::warn!(
                clipped_pct = report.clipped_fraction * 100.0,
                "Mixed audio clipped"
            );
        }
        tracing::info!(
            chunks = report.chunks_applied,
            skipped = report.chunks_skipped,
            participants = report.participants.len(),
            max_overlap = report.max_overlap,
            peak_before = report.peak_before_agc,
            peak_after = report.peak_after_agc,
            agc = ?report.agc,
            "Audio mix rendered"
        );

        MixedAudio {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            report,
        }
    }
}

fn peak(samples: &[f64]) -> f64 {
    samples.iter().fold(0.0, |acc, v| acc.max(v.abs()))
}

fn apply_agc(samples: &mut [f64], peak: f64) -> AgcAction {
    if peak > AGC_COMPRESS_PEAK {
        for v in samples.iter_mut() {
            let magnitude = v.abs();
            if magnitude > AGC_KNEE {
                *v = v.signum() * (AGC_KNEE + (magnitude - AGC_KNEE) * AGC_RATIO);
            }
        }
        AgcAction::Compressed {
            knee: AGC_KNEE,
            ratio: AGC_RATIO,
        }
    } else if peak > AGC_KNEE {
        let gain = AGC_TARGET_PEAK / peak;
        for v in samples.iter_mut() {
            *v *= gain;
        }
        AgcAction::Attenuated { gain }
    } else if peak > 0.0 && peak < AGC_BOOST_PEAK {
        let gain = AGC_TARGET_PEAK / peak;
        for v in samples.iter_mut() {
            *v *= gain;
        }
        AgcAction::Boosted { gain }
    } else {
        AgcAction::Untouched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meetrec_media_model::AudioSource;

    fn chunk(start: f64, samples: Vec<i16>, participant: &str) -> AudioChunk {
        AudioChunk {
            start_secs: start,
            samples,
            participant_id: participant.to_string(),
            source: AudioSource::Microphone,
        }
    }

    fn key(participant: &str) -> TrackKey {
        TrackKey::new(participant, AudioSource::Microphone)
    }

    #[test]
    fn test_zero_chunks_render_exact_silence() {
        let mixer = AudioMixer::new(48000, 2);
        let mixed = mixer.render(&[], 10.0);
        assert_eq!(mixed.samples.len(), 10 * 48000 * 2);
        assert!(mixed.samples.iter().all(|&s| s == 0));
        assert!(mixed.report.silent);
    }

    #[test]
    fn test_all_zero_chunks_render_silence() {
        let mixer = AudioMixer::new(100, 2);
        let mixed = mixer.render(&[chunk(0.0, vec![0; 200], "a")], 1.0);
        assert_eq!(mixed.samples.len(), 200);
        assert!(mixed.report.silent);
        assert_eq!(mixed.report.chunks_applied, 1);
    }

    #[test]
    fn test_full_overlap_is_sqrt_normalized() {
        let mixer = AudioMixer::new(100, 2);
        let a = 10000i16;
        let chunks = vec![chunk(0.0, vec![a; 200], "a"), chunk(0.0, vec![a; 200], "b")];
        let mixed = mixer.render(&chunks, 1.0);

        let peak = mixed.samples.iter().map(|s| s.unsigned_abs()).max().unwrap() as f64;
        assert!(peak < 2.0 * a as f64);
        assert!((peak - std::f64::consts::SQRT_2 * a as f64).abs() <= 1.0);
        assert_eq!(mixed.report.max_overlap, 2);
        assert_eq!(mixed.report.agc, AgcAction::Untouched);
        assert!((mixed.report.overlap_fraction - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_loud_overlap_is_brought_back_to_speech_level() {
        let mixer = AudioMixer::new(100, 2);
        let a = 18000i16;
        let chunks = vec![chunk(0.0, vec![a; 200], "a"), chunk(0.0, vec![a; 200], "b")];
        let mixed = mixer.render(&chunks, 1.0);

        // sqrt(2) * 18000 is about 25456, between the knee and the
        // compression threshold.
        let peak = mixed.samples.iter().map(|s| s.unsigned_abs()).max().unwrap() as f64;
        assert!((peak - a as f64).abs() <= 1.0, "peak {peak}");
        match mixed.report.agc {
            AgcAction::Attenuated { gain } => {
                assert!((gain - 1.0 / std::f64::consts::SQRT_2).abs() < 1e-3)
            }
            other => panic!("unexpected agc {other:?}"),
        }
        assert_eq!(mixed.report.clipped_fraction, 0.0);
    }

    #[test]
    fn test_peak_at_knee_is_untouched() {
        let mixer = AudioMixer::new(100, 2);
        let mixed = mixer.render(&[chunk(0.0, vec![20000; 20], "a")], 1.0);
        assert_eq!(mixed.samples[0], 20000);
        assert_eq!(mixed.report.agc, AgcAction::Untouched);
    }

    #[test]
    fn test_hot_mix_is_compressed() {
        let mixer = AudioMixer::new(100, 2);
        let mixed = mixer.render(&[chunk(0.0, vec![30000; 20], "a")], 1.0);
        // 20000 + 10000 * 0.7
        assert_eq!(mixed.samples[0], 27000);
        assert!(matches!(mixed.report.agc, AgcAction::Compressed { .. }));
        assert_eq!(mixed.report.clipped_fraction, 0.0);
    }

    #[test]
    fn test_quiet_mix_is_boosted() {
        let mixer = AudioMixer::new(100, 2);
        let mixed = mixer.render(&[chunk(0.0, vec![1000, -500], "a")], 1.0);
        assert_eq!(mixed.samples[0], 18000);
        assert_eq!(mixed.samples[1], -9000);
        assert!(matches!(mixed.report.agc, AgcAction::Boosted { .. }));
    }

    #[test]
    fn test_chunks_past_end_are_skipped() {
        let mixer = AudioMixer::new(100, 2);
        let chunks = vec![
            chunk(0.0, vec![10000; 20], "a"),
            chunk(5.0, vec![10000; 20], "b"),
            chunk(0.5, Vec::new(), "c"),
        ];
        let mixed = mixer.render(&chunks, 1.0);
        assert_eq!(mixed.report.chunks_applied, 1);
        assert_eq!(mixed.report.chunks_skipped, 2);
        assert_eq!(mixed.report.participants.len(), 1);
    }

    #[test]
    fn test_chunk_is_truncated_at_track_end() {
        let mixer = AudioMixer::new(100, 2);
        let mixed = mixer.render(&[chunk(0.9, vec![10000; 100], "a")], 1.0);
        assert_eq!(mixed.samples.len(), 200);
        assert_eq!(mixed.samples[179], 0);
        assert_eq!(mixed.samples[180], 10000);
        assert_eq!(mixed.samples[199], 10000);
    }

    #[test]
    fn test_fractional_offset_interpolates() {
        let mixer = AudioMixer::new(100, 1);
        // Starts a quarter frame into slot 10.
        let mixed = mixer.render(&[chunk(0.1025, vec![0, 16000, 16000], "a")], 1.0);
        assert_eq!(mixed.samples[10], 0);
        assert_eq!(mixed.samples[11], 12000);
        assert_eq!(mixed.samples[12], 16000);
    }

    #[test]
    fn test_chunker_flushes_at_size() {
        let mut chunker = AudioChunker::new(100, 2, 20);
        chunker.push(key("a"), Some("t1"), &[1; 50], 0.0);
        let chunks = chunker.take_chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_secs, 0.0);
        assert!((chunks[1].start_secs - 0.1).abs() < 1e-12);
        assert_eq!(chunker.pending_samples(), 10);

        chunker.flush_all();
        let rest = chunker.take_chunks();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].samples.len(), 10);
        assert!((rest[0].start_secs - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_track_is_ignored_until_released() {
        let mut chunker = AudioChunker::new(100, 2, 20);
        assert_eq!(chunker.push(key("a"), Some("t1"), &[1; 10], 0.0), TrackAdmission::Accepted);
        assert_eq!(chunker.push(key("a"), Some("t2"), &[2; 10], 0.0), TrackAdmission::Duplicate);
        assert_eq!(chunker.pending_samples(), 10);

        assert!(!chunker.release(&key("a"), Some("t2")));
        assert!(chunker.release(&key("a"), Some("t1")));
        assert_eq!(chunker.chunk_count(), 1);
        assert_eq!(chunker.push(key("a"), Some("t2"), &[2; 10], 1.0), TrackAdmission::Accepted);
    }

    #[test]
    fn test_sources_have_separate_buffers() {
        let mut chunker = AudioChunker::new(100, 2, 20);
        chunker.push(key("a"), Some("mic"), &[1; 10], 0.0);
        chunker.push(
            TrackKey::new("a", AudioSource::ScreenAudio),
            Some("screen"),
            &[1; 10],
            0.0,
        );
        chunker.flush_all();
        assert_eq!(chunker.take_chunks().len(), 2);
    }
}

//! Encoder profiles and hardware detection.

use serde::{Deserialize, Serialize};

/// Codec name whose presence in `ffmpeg -encoders` enables the hardware profile.
pub const HARDWARE_CODEC: &str = "h264_nvenc";
pub const SOFTWARE_CODEC: &str = "libx264";

/// Which H.264 encoder ffmpeg is told to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderProfile {
    /// NVENC, constant bitrate.
    Hardware,
    /// libx264, constant quality. Always available.
    Software,
}

impl EncoderProfile {
    pub fn codec(self) -> &'static str {
        match self {
            EncoderProfile::Hardware => HARDWARE_CODEC,
            EncoderProfile::Software => SOFTWARE_CODEC,
        }
    }

    pub fn is_hardware(self) -> bool {
        matches!(self, EncoderProfile::Hardware)
    }

    /// Pick a profile from the output of `ffmpeg -hide_banner -encoders`.
    pub fn from_encoder_list(listing: &str, prefer_hardware: bool) -> Self {
        if prefer_hardware && listing.contains(HARDWARE_CODEC) {
            EncoderProfile::Hardware
        } else {
            EncoderProfile::Software
        }
    }
}

impl std::fmt::Display for EncoderProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.codec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Encoders:
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)
";

    #[test]
    fn test_profile_from_listing() {
        assert_eq!(EncoderProfile::from_encoder_list(LISTING, true), EncoderProfile::Hardware);
        assert_eq!(EncoderProfile::from_encoder_list(LISTING, false), EncoderProfile::Software);
        assert_eq!(
            EncoderProfile::from_encoder_list(" V....D libx264  H.264", true),
            EncoderProfile::Software
        );
    }

    #[test]
    fn test_codec_names() {
        assert_eq!(EncoderProfile::Hardware.codec(), "h264_nvenc");
        assert_eq!(EncoderProfile::Software.to_string(), "libx264");
    }
}

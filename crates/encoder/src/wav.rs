//! WAV encoding of the mixed audio track.

use std::io::Cursor;

use meetrec_common::{MeetrecError, MeetrecResult};

/// Encode interleaved i16 samples as a 16-bit PCM WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> MeetrecResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| MeetrecError::audio(format!("Failed to start WAV: {e}")))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| MeetrecError::audio(format!("Failed to write WAV samples: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| MeetrecError::audio(format!("Failed to finalize WAV: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Decode a 16-bit PCM WAV file into (samples, sample rate, channels).
pub fn decode_wav(bytes: &[u8]) -> MeetrecResult<(Vec<i16>, u32, u16)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| MeetrecError::audio(format!("Invalid WAV: {e}")))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(MeetrecError::audio(format!(
            "Unsupported WAV layout: {} bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MeetrecError::audio(format!("Invalid WAV samples: {e}")))?;
    Ok((samples, spec.sample_rate, spec.channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_payload_size() {
        let samples = vec![0i16; 48000 * 2];
        let bytes = encode_wav(&samples, 48000, 2).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert!(bytes.len() >= 44 + samples.len() * 2);
        assert_eq!(decode_wav(&bytes).unwrap().0.len(), samples.len());
    }

    #[test]
    fn test_decoded_layout() {
        let bytes = encode_wav(&[1, -1, i16::MAX, i16::MIN], 16000, 2).unwrap();
        let (samples, rate, channels) = decode_wav(&bytes).unwrap();
        assert_eq!(samples, vec![1, -1, i16::MAX, i16::MIN]);
        assert_eq!(rate, 16000);
        assert_eq!(channels, 2);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_wav(b"not a wav").is_err());
    }
}

//! PCM and transport encoding
//!
//! Outbound microphone audio and inbound model audio travel as base64 text
//! wrapping little-endian 16-bit PCM.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::AudioUnit;
use crate::{Error, Result};

/// Scale between normalized floats and 16-bit PCM
const PCM16_SCALE: f32 = 32768.0;

/// Encode arbitrary bytes as transport-safe text
#[must_use]
pub fn encode_bytes_to_transport(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode transport text back into bytes
///
/// # Errors
///
/// Returns `MalformedEncoding` if the input is not valid base64
pub fn decode_transport(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::MalformedEncoding(e.to_string()))
}

/// Convert normalized samples to little-endian 16-bit PCM
///
/// Values outside [-1, 1] saturate at the i16 bounds.
#[must_use]
pub fn float_samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    out
}

/// Convert little-endian 16-bit PCM into an [`AudioUnit`]
///
/// # Errors
///
/// Returns `InvalidBufferLength` if the byte count does not divide into
/// whole frames, or `Audio` for a zero channel count or sample rate
pub fn pcm16_to_float_samples(bytes: &[u8], channels: u16, sample_rate: u32) -> Result<AudioUnit> {
    if channels == 0 || sample_rate == 0 {
        return Err(Error::Audio(format!(
            "invalid PCM format: {channels} channel(s) at {sample_rate} Hz"
        )));
    }

    if bytes.len() % (2 * usize::from(channels)) != 0 {
        return Err(Error::InvalidBufferLength {
            len: bytes.len(),
            channels,
        });
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / PCM16_SCALE)
        .collect();

    AudioUnit::new(samples, sample_rate, channels)
}

/// Read the `rate=` parameter from an `audio/pcm;rate=N` MIME type
#[must_use]
pub fn parse_pcm_mime_rate(mime: &str) -> Option<u32> {
    mime.split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample_to_i16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[allow(clippy::cast_possible_truncation)]
fn sample_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * PCM16_SCALE)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

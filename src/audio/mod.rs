//! Audio processing module
//!
//! Handles PCM encoding, microphone capture, and scheduled playback.
//! Device access goes through the [`OutputDevice`] and [`Microphone`] seams
//! so the scheduling logic runs without audio hardware.

pub mod capture;
pub mod codec;
pub mod mixer;
pub mod output;
pub mod scheduler;

pub use capture::{CaptureStream, CpalMicrophone, InputStream, Microphone, SampleSink};
pub use codec::{
    decode_transport, encode_bytes_to_transport, float_samples_to_pcm16, parse_pcm_mime_rate,
    pcm16_to_float_samples, samples_to_wav,
};
pub use mixer::Mixer;
pub use output::{CpalOutput, OutputDevice, ScheduledUnit, shared_output};
pub use scheduler::{PlaybackHandle, PlaybackScheduler};

use crate::{Error, Result};

/// Sample rate for microphone capture (16kHz for speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of model audio (live session and one-shot speech)
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Immutable decoded audio buffer
///
/// Samples are normalized to [-1, 1] and interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioUnit {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioUnit {
    /// Create a unit from interleaved samples
    ///
    /// # Errors
    ///
    /// Returns error if the format is degenerate or the samples do not
    /// divide into whole frames
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if channels == 0 || sample_rate == 0 {
            return Err(Error::Audio(format!(
                "invalid audio format: {channels} channel(s) at {sample_rate} Hz"
            )));
        }
        if samples.len() % usize::from(channels) != 0 {
            return Err(Error::InvalidBufferLength {
                len: samples.len() * 2,
                channels,
            });
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Create a mono unit
    ///
    /// # Errors
    ///
    /// Returns error if `sample_rate` is zero
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::new(samples, sample_rate, 1)
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Whether the unit holds no frames
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample for `channel` at `frame`, or silence past the end
    #[must_use]
    pub fn sample_at(&self, frame: usize, channel: u16) -> f32 {
        let channels = usize::from(self.channels);
        let channel = usize::from(channel).min(channels - 1);
        self.samples
            .get(frame * channels + channel)
            .copied()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let unit = AudioUnit::mono(vec![0.0; 24000], 24000).unwrap();
        assert!((unit.duration() - 1.0).abs() < f64::EPSILON);

        let stereo = AudioUnit::new(vec![0.0; 16000], 16000, 2).unwrap();
        assert_eq!(stereo.frames(), 8000);
        assert!((stereo.duration() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejects_partial_frames() {
        assert!(AudioUnit::new(vec![0.0; 3], 16000, 2).is_err());
        assert!(AudioUnit::mono(vec![0.0; 3], 0).is_err());
    }

    #[test]
    fn test_sample_at() {
        let unit = AudioUnit::new(vec![0.1, 0.2, 0.3, 0.4], 8000, 2).unwrap();
        assert!((unit.sample_at(1, 0) - 0.3).abs() < f32::EPSILON);
        assert!((unit.sample_at(1, 1) - 0.4).abs() < f32::EPSILON);
        assert!((unit.sample_at(0, 5) - 0.2).abs() < f32::EPSILON);
        assert!(unit.sample_at(2, 0).abs() < f32::EPSILON);
    }
}

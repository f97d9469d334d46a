//! Sample-accurate mixer for scheduled audio units
//!
//! The mixer owns the device timeline. Each rendered frame advances the
//! clock, and each scheduled unit contributes samples once the clock passes
//! its start time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::output::{EndedCallback, ScheduledUnit};

/// Mixes scheduled units into interleaved output buffers
pub struct Mixer {
    sample_rate: u32,
    channels: u16,
    clock: Arc<AtomicU64>,
    voices: Vec<ScheduledUnit>,
}

impl Mixer {
    /// Create a mixer for the given device format
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            clock: Arc::new(AtomicU64::new(0)),
            voices: Vec::new(),
        }
    }

    /// Shared frame counter, readable without locking the mixer
    #[must_use]
    pub fn clock(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.clock)
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Device time in seconds
    #[must_use]
    pub fn current_time(&self) -> f64 {
        frames_to_seconds(self.clock.load(Ordering::Acquire), self.sample_rate)
    }

    /// Queue a unit for playback
    pub fn push(&mut self, scheduled: ScheduledUnit) {
        self.voices.push(scheduled);
    }

    /// Units that are pending or playing
    #[must_use]
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Render one interleaved buffer and advance the clock
    ///
    /// Returns completion callbacks for units that finished naturally.
    /// Callers run them after releasing any lock held on the mixer.
    #[must_use]
    pub fn render(&mut self, out: &mut [f32]) -> Vec<EndedCallback> {
        out.fill(0.0);

        let channels = usize::from(self.channels);
        let frames = out.len() / channels;
        let base = self.clock.load(Ordering::Acquire);
        let rate = f64::from(self.sample_rate);

        self.voices.retain(|voice| !voice.is_stopped());

        for voice in &self.voices {
            let unit = &voice.unit;
            let unit_frames = unit.frames();
            if unit_frames == 0 {
                continue;
            }

            for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
                #[allow(clippy::cast_precision_loss)]
                let t = (base + i as u64) as f64 / rate;
                if t < voice.start_at {
                    continue;
                }
                let position = (t - voice.start_at) * f64::from(unit.sample_rate());
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let index = position.floor() as usize;
                if index >= unit_frames {
                    break;
                }
                #[allow(clippy::cast_possible_truncation)]
                let frac = (position - position.floor()) as f32;
                let next = (index + 1).min(unit_frames - 1);

                for (ch, out_sample) in frame.iter_mut().enumerate() {
                    *out_sample += interpolate(unit, index, next, frac, ch, self.channels);
                }
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        let end = base + frames as u64;
        self.clock.store(end, Ordering::Release);

        let end_time = frames_to_seconds(end, self.sample_rate);
        let mut finished = Vec::new();
        let mut index = 0;
        while index < self.voices.len() {
            let voice = &self.voices[index];
            if voice.start_at + voice.unit.duration() <= end_time {
                let voice = self.voices.swap_remove(index);
                finished.push(voice.on_ended);
            } else {
                index += 1;
            }
        }
        finished
    }
}

/// Linear interpolation with channel up/down-mixing
fn interpolate(
    unit: &super::AudioUnit,
    index: usize,
    next: usize,
    frac: f32,
    out_channel: usize,
    out_channels: u16,
) -> f32 {
    let read = |frame: usize| {
        if out_channels == 1 && unit.channels() > 1 {
            let sum: f32 = (0..unit.channels()).map(|c| unit.sample_at(frame, c)).sum();
            sum / f32::from(unit.channels())
        } else {
            #[allow(clippy::cast_possible_truncation)]
            unit.sample_at(frame, out_channel as u16)
        }
    };
    let a = read(index);
    let b = read(next);
    (b - a).mul_add(frac, a)
}

#[allow(clippy::cast_precision_loss)]
fn frames_to_seconds(frames: u64, sample_rate: u32) -> f64 {
    frames as f64 / f64::from(sample_rate)
}

//! One-shot "read aloud" speech
//!
//! Synthesizes a block of text and plays it outside of any live session.
//! Starting speech silences everything else first, so only one synthesized
//! voice is audible at a time.

use std::sync::Arc;

use async_trait::async_trait;

use crate::audio::{
    OUTPUT_SAMPLE_RATE, PlaybackHandle, PlaybackScheduler, decode_transport, parse_pcm_mime_rate,
    pcm16_to_float_samples,
};
use crate::{Error, Result};

/// Audio returned by a synthesis service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    /// Transport-encoded PCM16 payload
    pub data: String,
    /// MIME type, e.g. `audio/pcm;rate=24000`
    pub mime_type: Option<String>,
}

impl SynthesizedAudio {
    /// Sample rate advertised by the MIME type, or the model default
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.mime_type
            .as_deref()
            .and_then(parse_pcm_mime_rate)
            .unwrap_or(OUTPUT_SAMPLE_RATE)
    }
}

/// Turns text into speech
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`
    ///
    /// Returns `None` when the service produced no audio.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    async fn synthesize(&self, text: &str) -> Result<Option<SynthesizedAudio>>;
}

/// Plays synthesized speech through the shared scheduler
pub struct OneShotSpeaker {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    scheduler: Arc<PlaybackScheduler>,
}

impl OneShotSpeaker {
    #[must_use]
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, scheduler: Arc<PlaybackScheduler>) -> Self {
        Self {
            synthesizer,
            scheduler,
        }
    }

    /// Speak `text`, returning whether audio started
    ///
    /// Failures are logged and reported as `false`.
    pub async fn speak(&self, text: &str) -> bool {
        match self.speak_with_handle(text).await {
            Ok(_) => true,
            Err(Error::SynthesisUnavailable) => {
                tracing::debug!("synthesis returned no audio");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "one-shot speech failed");
                false
            }
        }
    }

    /// Speak `text` and return the handle of the scheduled audio
    ///
    /// # Errors
    ///
    /// Returns `SynthesisUnavailable` for empty text or an empty response,
    /// or the underlying transport, decode or device error
    pub async fn speak_with_handle(&self, text: &str) -> Result<PlaybackHandle> {
        self.scheduler.stop_all();

        if text.trim().is_empty() {
            return Err(Error::SynthesisUnavailable);
        }

        let audio = self
            .synthesizer
            .synthesize(text)
            .await?
            .ok_or(Error::SynthesisUnavailable)?;

        let pcm = decode_transport(&audio.data)?;
        let unit = pcm16_to_float_samples(&pcm, 1, audio.sample_rate())?;
        if unit.is_empty() {
            return Err(Error::SynthesisUnavailable);
        }

        self.scheduler.prepare().await?;

        // Anything that started while synthesis was in flight is cut off too
        self.scheduler.stop_all();
        let handle = self.scheduler.play_immediate(unit)?;

        tracing::debug!(
            chars = text.len(),
            duration = handle.duration(),
            "speaking"
        );
        Ok(handle)
    }
}

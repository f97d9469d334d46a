//! Voice engine facade
//!
//! Wires one playback scheduler to both the live session path and the
//! one-shot speech path so that each can silence the other.

use std::sync::Arc;

use crate::audio::capture::DEFAULT_BLOCK_SIZE;
use crate::audio::{CpalMicrophone, Microphone, PlaybackHandle, PlaybackScheduler};
use crate::config::Config;
use crate::gemini::{GeminiLiveConnector, GeminiSynthesizer};
use crate::live::{LiveConnector, LiveSession, LiveSessionController, SessionObserver};
use crate::speaker::{OneShotSpeaker, SpeechSynthesizer};
use crate::Result;

/// Entry point for conversational and one-shot voice output
pub struct VoiceEngine {
    connector: Arc<dyn LiveConnector>,
    microphone: Arc<dyn Microphone>,
    speaker: OneShotSpeaker,
    scheduler: Arc<PlaybackScheduler>,
    block_size: usize,
}

impl VoiceEngine {
    #[must_use]
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        microphone: Arc<dyn Microphone>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        scheduler: Arc<PlaybackScheduler>,
    ) -> Self {
        Self {
            connector,
            microphone,
            speaker: OneShotSpeaker::new(synthesizer, Arc::clone(&scheduler)),
            scheduler,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// Build an engine backed by Gemini and the default audio devices
    ///
    /// The output device is opened lazily on first playback.
    ///
    /// # Errors
    ///
    /// Returns error if the synthesizer cannot be configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let connector = GeminiLiveConnector::new(
            config.api.ws_url.clone(),
            config.api.key.clone(),
            config.live.model.clone(),
            config.live.voice.clone(),
            config.live.system_instruction.clone(),
        );
        let synthesizer = GeminiSynthesizer::new(
            config.api.base_url.clone(),
            config.api.key.clone(),
            config.speech.model.clone(),
            config.speech.voice.clone(),
        )?;

        tracing::debug!(
            live_model = %config.live.model,
            tts_model = %config.speech.model,
            "voice engine configured"
        );

        Ok(Self::new(
            Arc::new(connector),
            Arc::new(CpalMicrophone::new()),
            Arc::new(synthesizer),
            Arc::new(PlaybackScheduler::shared()),
        )
        .with_block_size(config.live.capture_block_size))
    }

    /// Samples per outbound microphone frame for new sessions
    #[must_use]
    pub const fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Open a live conversation
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` or `PermissionDenied` if the session
    /// could not be established
    pub async fn open_live_session(&self, observer: Arc<dyn SessionObserver>) -> Result<LiveSession> {
        LiveSessionController::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.microphone),
            Arc::clone(&self.scheduler),
        )
        .with_block_size(self.block_size)
        .open(observer)
        .await
    }

    /// Speak `text` once, interrupting anything already playing
    ///
    /// Returns whether audio started.
    pub async fn speak_once(&self, text: &str) -> bool {
        self.speaker.speak(text).await
    }

    /// Like [`Self::speak_once`] but returns the playback handle
    ///
    /// # Errors
    ///
    /// Returns `SynthesisUnavailable` if no audio was produced, or the
    /// underlying transport, decode or device error
    pub async fn speak_once_with_handle(&self, text: &str) -> Result<PlaybackHandle> {
        self.speaker.speak_with_handle(text).await
    }

    /// Stop every playing or queued unit
    pub fn stop_all_audio(&self) {
        self.scheduler.stop_all();
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<PlaybackScheduler> {
        &self.scheduler
    }
}

impl std::fmt::Debug for VoiceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceEngine")
            .field("block_size", &self.block_size)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

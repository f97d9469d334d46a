//! Configuration management
//!
//! Values resolve in order: environment variable, config file, built-in
//! default.

pub mod file;

use secrecy::SecretString;

pub use file::{ConfigFile, config_file_path, load_config_file};

use crate::audio::capture::DEFAULT_BLOCK_SIZE;
use crate::gemini::{DEFAULT_BASE_URL, DEFAULT_WS_URL};
use crate::{Error, Result};

/// Default live conversation model
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default live conversation voice
pub const DEFAULT_LIVE_VOICE: &str = "Puck";

/// Default one-shot speech model
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";

/// Default one-shot speech voice
pub const DEFAULT_TTS_VOICE: &str = "Kore";

/// Default system instruction for live conversations
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are a warm, patient cooking assistant for busy home cooks.
Speak in short, simple sentences and avoid chef jargon.
Offer practical substitutes whenever an ingredient might be missing.
Mention safety around hot oil, pressure cookers and knives.
Be comfortable with Indian home kitchens and everyday pantry staples.
When asked for a recipe, give the dish name, time and servings, ingredients,
numbered steps with flame level, tips, common mistakes and storage advice.";

/// Voice engine configuration
#[derive(Debug)]
pub struct Config {
    /// Service credentials and endpoints
    pub api: ApiConfig,

    /// Live session configuration
    pub live: LiveConfig,

    /// One-shot speech configuration
    pub speech: SpeechConfig,
}

/// Service credentials and endpoints
#[derive(Debug)]
pub struct ApiConfig {
    /// API key (from `GEMINI_API_KEY` or `API_KEY`)
    pub key: SecretString,

    /// REST base URL for synthesis
    pub base_url: String,

    /// WebSocket URL for live sessions
    pub ws_url: String,
}

/// Live session configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,

    /// Samples per outbound microphone frame
    pub capture_block_size: usize,
}

/// One-shot speech configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub model: String,
    pub voice: String,
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn load() -> Result<Self> {
        Self::resolve(load_config_file(), |name| std::env::var(name).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn resolve(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let key = var("GEMINI_API_KEY")
            .or_else(|| var("API_KEY"))
            .or(file.api.key)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Config("GEMINI_API_KEY (or api.key in config.toml) is required".to_string())
            })?;

        let api = ApiConfig {
            key: SecretString::from(key),
            base_url: file
                .api
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            ws_url: file.api.ws_url.unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
        };

        let capture_block_size = var("KITCHEN_VOICE_BLOCK_SIZE")
            .and_then(|s| s.parse().ok())
            .or(file.live.capture_block_size)
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_BLOCK_SIZE);

        let live = LiveConfig {
            model: var("KITCHEN_VOICE_LIVE_MODEL")
                .or(file.live.model)
                .unwrap_or_else(|| DEFAULT_LIVE_MODEL.to_string()),
            voice: var("KITCHEN_VOICE_LIVE_VOICE")
                .or(file.live.voice)
                .unwrap_or_else(|| DEFAULT_LIVE_VOICE.to_string()),
            system_instruction: file
                .live
                .system_instruction
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            capture_block_size,
        };

        let speech = SpeechConfig {
            model: var("KITCHEN_VOICE_TTS_MODEL")
                .or(file.speech.model)
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
            voice: var("KITCHEN_VOICE_TTS_VOICE")
                .or(file.speech.voice)
                .unwrap_or_else(|| DEFAULT_TTS_VOICE.to_string()),
        };

        tracing::debug!(
            live_model = %live.model,
            tts_model = %speech.model,
            block_size = live.capture_block_size,
            "configuration resolved"
        );

        Ok(Self { api, live, speech })
    }
}

//! TOML configuration file loading
//!
//! Supports `~/.config/kitchen-voice/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::PathBuf;

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Service credentials and endpoints
    #[serde(default)]
    pub api: ApiFileConfig,

    /// Live session configuration
    #[serde(default)]
    pub live: LiveFileConfig,

    /// One-shot speech configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    pub key: Option<String>,
    pub base_url: Option<String>,
    pub ws_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// Live model (e.g. "gemini-2.5-flash-native-audio-preview-09-2025")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Puck")
    pub voice: Option<String>,

    pub system_instruction: Option<String>,

    /// Samples per outbound microphone frame
    pub capture_block_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// TTS model (e.g. "gemini-2.5-flash-preview-tts")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Kore")
    pub voice: Option<String>,
}

/// Parse a config file body
///
/// # Errors
///
/// Returns error if the TOML is invalid
pub fn parse_config(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/kitchen-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "kitchen-voice")
        .map(|d| d.config_dir().join("config.toml"))
}

//! Gemini text-to-speech via `generateContent`

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::protocol::{Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, qualified_model};
use crate::speaker::{SpeechSynthesizer, SynthesizedAudio};
use crate::{Error, Result};

/// Synthesizes speech with a Gemini TTS model
pub struct GeminiSynthesizer {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    voice: String,
}

impl GeminiSynthesizer {
    /// Create a synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(base_url: String, api_key: SecretString, model: String, voice: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("API key required for speech synthesis".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            voice,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.base_url,
            qualified_model(&self.model)
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Option<SynthesizedAudio>> {
        let request = GenerateContentRequest {
            contents: [Content::text(text)],
            generation_config: GenerationConfig::audio(&self.voice),
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("Gemini TTS error {status}: {body}")));
        }

        let body: GenerateContentResponse = response.json().await?;
        Ok(body.into_audio())
    }
}

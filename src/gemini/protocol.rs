//! Wire types for the Gemini Live and `generateContent` APIs

use serde::{Deserialize, Serialize};

use crate::audio::parse_pcm_mime_rate;
use crate::live::{InboundEvent, OutboundFrame};
use crate::speaker::SynthesizedAudio;

// -- Live session setup -------------------------------------------------------

/// First client message on a live connection
#[derive(Debug, Serialize)]
pub struct SetupMessage<'a> {
    pub setup: Setup<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup<'a> {
    pub model: String,
    pub generation_config: GenerationConfig<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content<'a>>,
    pub input_audio_transcription: Empty,
    pub output_audio_transcription: Empty,
}

/// Serializes as `{}`
#[derive(Debug, Default, Serialize)]
pub struct Empty {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig<'a> {
    pub response_modalities: [&'static str; 1],
    pub speech_config: SpeechConfig<'a>,
}

impl<'a> GenerationConfig<'a> {
    /// Audio-only responses spoken by a prebuilt voice
    #[must_use]
    pub const fn audio(voice_name: &'a str) -> Self {
        Self {
            response_modalities: ["AUDIO"],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig { voice_name },
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig<'a> {
    pub voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig<'a> {
    pub prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig<'a> {
    pub voice_name: &'a str,
}

#[derive(Debug, Serialize)]
pub struct Content<'a> {
    pub parts: Vec<TextPart<'a>>,
}

impl<'a> Content<'a> {
    #[must_use]
    pub fn text(text: &'a str) -> Self {
        Self {
            parts: vec![TextPart { text }],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TextPart<'a> {
    pub text: &'a str,
}

/// Build the setup message for a live session
#[must_use]
pub fn setup_message<'a>(
    model: &str,
    voice_name: &'a str,
    system_instruction: &'a str,
) -> SetupMessage<'a> {
    SetupMessage {
        setup: Setup {
            model: qualified_model(model),
            generation_config: GenerationConfig::audio(voice_name),
            system_instruction: (!system_instruction.trim().is_empty())
                .then(|| Content::text(system_instruction)),
            input_audio_transcription: Empty {},
            output_audio_transcription: Empty {},
        },
    }
}

/// Prefix a bare model id with `models/`
#[must_use]
pub fn qualified_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

// -- Live session realtime input ------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl From<OutboundFrame> for RealtimeInputMessage {
    fn from(frame: OutboundFrame) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type: frame.mime_type(),
                    data: frame.audio_frame,
                }],
            },
        }
    }
}

// -- Live session server messages -----------------------------------------------

/// Any message sent by the live server
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelContent>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

impl ServerMessage {
    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten server content into session events
    ///
    /// Order: audio, model transcription (or else user transcription),
    /// model text, turn completion, interruption.
    #[must_use]
    pub fn into_events(self) -> Vec<InboundEvent> {
        let Some(content) = self.server_content else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        let mut texts = Vec::new();

        for part in parts {
            if let Some(inline) = part.inline_data {
                events.push(InboundEvent::AudioChunk {
                    sample_rate: inline.mime_type.as_deref().and_then(parse_pcm_mime_rate),
                    data: inline.data,
                });
            }
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                texts.push(text);
            }
        }

        let output = content.output_transcription.and_then(|t| t.text);
        let input = content.input_transcription.and_then(|t| t.text);
        match (output, input) {
            (Some(text), _) if !text.is_empty() => events.push(InboundEvent::ModelTextFragment(text)),
            (_, Some(text)) if !text.is_empty() => events.push(InboundEvent::UserTextFragment(text)),
            _ => {}
        }

        events.extend(texts.into_iter().map(InboundEvent::ModelTextFragment));

        if content.turn_complete {
            events.push(InboundEvent::TurnComplete);
        }
        if content.interrupted {
            events.push(InboundEvent::Interrupted);
        }
        events
    }
}

// -- One-shot synthesis -------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest<'a> {
    pub contents: [Content<'a>; 1],
    pub generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<ModelContent>,
}

impl GenerateContentResponse {
    /// First inline audio payload of the first candidate
    #[must_use]
    pub fn into_audio(self) -> Option<SynthesizedAudio> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .find_map(|part| part.inline_data)
            .filter(|inline| !inline.data.is_empty())
            .map(|inline| SynthesizedAudio {
                data: inline.data,
                mime_type: inline.mime_type,
            })
    }
}

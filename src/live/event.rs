//! Messages exchanged with the remote conversational service

use crate::audio::{CAPTURE_SAMPLE_RATE, encode_bytes_to_transport};

/// Event received from the remote party during a live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Transport-encoded PCM16 audio from the model
    AudioChunk {
        data: String,
        /// Sample rate advertised by the payload, if any
        sample_rate: Option<u32>,
    },
    /// Partial text spoken by the model
    ModelTextFragment(String),
    /// Partial transcription of the local speaker
    UserTextFragment(String),
    /// The model finished its turn
    TurnComplete,
    /// The remote party barged in; queued playback is stale
    Interrupted,
}

impl InboundEvent {
    /// Build an audio chunk from raw PCM16 bytes
    #[must_use]
    pub fn audio(pcm: &[u8]) -> Self {
        Self::AudioChunk {
            data: encode_bytes_to_transport(pcm),
            sample_rate: None,
        }
    }
}

/// One microphone frame ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Transport-encoded PCM16 bytes
    pub audio_frame: String,
    pub sample_rate_hint: u32,
}

impl OutboundFrame {
    /// Encode a captured PCM16 frame
    #[must_use]
    pub fn from_pcm(pcm: &[u8]) -> Self {
        Self {
            audio_frame: encode_bytes_to_transport(pcm),
            sample_rate_hint: CAPTURE_SAMPLE_RATE,
        }
    }

    /// MIME type describing the payload
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate_hint)
    }
}

/// Event produced by a [`LiveLink`](super::LiveLink) reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Inbound(InboundEvent),
    /// Remote side closed the connection
    Closed(Option<String>),
    /// Unrecoverable transport error
    Failed(String),
}

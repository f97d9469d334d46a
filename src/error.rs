//! Error types for the voice engine

use thiserror::Error;

/// Result type alias for voice engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice engine
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone unavailable or access declined
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Remote handshake failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport payload is not valid base64
    #[error("malformed transport encoding: {0}")]
    MalformedEncoding(String),

    /// PCM payload length does not divide into whole frames
    #[error("invalid PCM buffer length {len} for {channels} channel(s)")]
    InvalidBufferLength { len: usize, channels: u16 },

    /// Outbound frame could not be sent
    #[error("transport send failure: {0}")]
    TransportSendFailure(String),

    /// Synthesis service returned no audio
    #[error("speech synthesis returned no audio")]
    SynthesisUnavailable,

    /// Synthesis request rejected by the service
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error only affects a single inbound audio chunk
    #[must_use]
    pub const fn is_chunk_local(&self) -> bool {
        matches!(
            self,
            Self::MalformedEncoding(_) | Self::InvalidBufferLength { .. }
        )
    }
}

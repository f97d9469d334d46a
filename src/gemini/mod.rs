//! Gemini service adapters
//!
//! Implements the live session transport and one-shot synthesis on top of
//! the Gemini Live WebSocket API and the REST `generateContent` API.

mod live;
pub mod protocol;
mod tts;

pub use live::GeminiLiveConnector;
pub use tts::GeminiSynthesizer;

/// Default REST base URL
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default live WebSocket endpoint
pub const DEFAULT_WS_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

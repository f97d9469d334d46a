//! Kitchen Voice - real-time voice layer for a cooking assistant
//!
//! This library provides:
//! - Live spoken conversations streamed over a bidirectional session
//! - One-shot speech synthesis for reading text aloud
//! - A shared playback scheduler so only one voice is ever heard
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                   VoiceEngine                     │
//! │   LiveSessionController  │  OneShotSpeaker        │
//! └────────────┬─────────────┴───────────┬───────────┘
//!              │                         │
//! ┌────────────▼────────────┐ ┌──────────▼───────────┐
//! │ CaptureStream (16 kHz)  │ │  SpeechSynthesizer   │
//! │ LiveConnector / Link    │ │  (Gemini TTS)        │
//! └────────────┬────────────┘ └──────────┬───────────┘
//!              │                         │
//! ┌────────────▼─────────────────────────▼───────────┐
//! │      PlaybackScheduler  →  OutputDevice (cpal)    │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod gemini;
pub mod live;
pub mod speaker;

pub use audio::{AudioUnit, PlaybackHandle, PlaybackScheduler};
pub use config::Config;
pub use engine::VoiceEngine;
pub use error::{Error, Result};
pub use live::{LiveSession, LiveSessionController, SessionObserver, SessionState};
pub use speaker::{OneShotSpeaker, SpeechSynthesizer, SynthesizedAudio};

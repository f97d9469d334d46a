//! Callbacks from a live session to the application

use crate::Error;

/// Receives progress from a live session
///
/// Callbacks run on the session task and must not block.
pub trait SessionObserver: Send + Sync {
    /// A text fragment arrived; `is_model` tells the speaker apart
    fn on_partial_text(&self, text: &str, is_model: bool);

    /// The model finished a turn that produced text
    fn on_turn_complete(&self, full_text: &str);

    /// The session reached `Closed`
    fn on_close(&self);

    /// A model audio chunk was scheduled
    fn on_audio_start(&self) {}

    /// A non-fatal error occurred during the session
    fn on_error(&self, error: &Error) {
        let _ = error;
    }
}

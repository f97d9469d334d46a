//! Per-turn accumulation of model text

/// Collects model text fragments until the turn completes
#[derive(Debug, Default, Clone)]
pub struct TurnBuffer {
    text: String,
}

impl TurnBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            text: String::new(),
        }
    }

    /// Append a fragment to the current turn
    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    /// Finish the turn, returning its text if it holds anything but whitespace
    ///
    /// The buffer is empty afterwards either way.
    pub fn complete(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.text);
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Discard the current turn
    pub fn clear(&mut self) {
        self.text.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

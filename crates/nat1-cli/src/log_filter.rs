//! Collapses repeated status lines from polling loops.

/// Allows a message through on first sight, then once every `max_repeats`
/// consecutive repeats
#[derive(Debug)]
pub struct RepeatFilter {
    last: Option<String>,
    repeats: u32,
    max_repeats: u32,
}

impl RepeatFilter {
    /// Local-service checks, every 10s
    pub const LOCAL_CHECKS: u32 = 60;

    /// Mapped-address checks, every 1s
    pub const MAPPED_CHECKS: u32 = 1800;

    /// Filter letting one of every `max_repeats` repeats through
    #[must_use]
    pub const fn new(max_repeats: u32) -> Self {
        Self {
            last: None,
            repeats: 0,
            max_repeats,
        }
    }

    /// Whether `message` should be logged
    pub fn allow(&mut self, message: &str) -> bool {
        self.repeats += 1;
        if self.last.as_deref() == Some(message) && self.repeats < self.max_repeats {
            return false;
        }
        self.repeats = 0;
        self.last = Some(message.to_string());
        true
    }
}

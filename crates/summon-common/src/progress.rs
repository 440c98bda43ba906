use serde::{Deserialize, Serialize};

/// One observation of a server launch: `current_count` of `scheduled_count`
/// instances are ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub current_count: u32,
    pub scheduled_count: u32,
}

impl ProgressEvent {
    /// `current_count` is clamped to `scheduled_count`.
    pub fn new(current_count: u32, scheduled_count: u32) -> Self {
        Self {
            current_count: current_count.min(scheduled_count),
            scheduled_count,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_count == self.scheduled_count
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.current_count, self.scheduled_count)
    }
}

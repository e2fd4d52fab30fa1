//! Entry lifecycle notifications.

use chrono::{DateTime, Utc};

use crate::entry::EntryId;

/// Lifecycle state of a queue entry.
///
/// `Queued -> Running -> {Completed, Cancelled, Failed}`; image-less
/// upscale entries pass through `AwaitingImage` while running.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryState {
    Queued {
        /// Entries ahead of this one, the current entry included.
        ahead: usize,
    },
    Running,
    AwaitingImage,
    Completed {
        images: usize,
    },
    Cancelled,
    Failed {
        error: String,
    },
}

impl EntryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Cancelled | Self::Failed { .. }
        )
    }
}

/// A state change of one entry.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    pub entry_id: EntryId,
    pub state: EntryState,
    pub timestamp: DateTime<Utc>,
}

impl QueueEvent {
    pub fn new(entry_id: EntryId, state: EntryState) -> Self {
        Self {
            entry_id,
            state,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_final_states_are_terminal() {
        assert!(!EntryState::Queued { ahead: 0 }.is_terminal());
        assert!(!EntryState::Running.is_terminal());
        assert!(!EntryState::AwaitingImage.is_terminal());
        assert!(EntryState::Completed { images: 2 }.is_terminal());
        assert!(EntryState::Cancelled.is_terminal());
        assert!(EntryState::Failed { error: "x".into() }.is_terminal());
    }
}

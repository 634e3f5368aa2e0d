//! Adaptive polling: polling is the fallback transport for assistant output and
//! only runs while an active job's tail is an assistant turn with no output yet.
use std::time::Duration;

use crate::conversation::{Conversation, ConversationKind};
use crate::SyncSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    Scheduled(Duration),
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncHealth {
    #[default]
    InSync,
    /// Polls are failing but below the threshold; nothing is shown to the user.
    Lagging { failures: u32 },
    OutOfSync { failures: u32 },
}

impl SyncHealth {
    pub fn from_failures(failures: u32, threshold: u32) -> Self {
        match failures {
            0 => SyncHealth::InSync,
            n if n >= threshold => SyncHealth::OutOfSync { failures: n },
            n => SyncHealth::Lagging { failures: n },
        }
    }
}

pub fn decide(conversation: &Conversation, settings: &SyncSettings) -> PollDecision {
    if conversation.kind() != ConversationKind::ActiveJob {
        return PollDecision::Idle;
    }
    match conversation.tail() {
        Some(tail) if tail.is_awaiting_output() => PollDecision::Scheduled(backoff_interval(
            settings.poll_interval,
            conversation.poll_failures(),
            settings.max_poll_interval,
        )),
        _ => PollDecision::Idle,
    }
}

/// `base * 2^failures`, capped at `max`.
pub fn backoff_interval(base: Duration, failures: u32, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max).max(base.min(max))
}

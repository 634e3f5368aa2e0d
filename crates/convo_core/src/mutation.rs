//! Optimistic send state machine.
//!
//! Every send (or retry) gets its own [`MutationId`], its own placeholders and
//! its own snapshot of the conversation, so settling one never disturbs another.
use crate::conversation::ConversationSnapshot;
use crate::{Attachment, InboxId, JobId, MessageHash, MutationId, SyncError, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPhase {
    Idle,
    OptimisticApplied,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendEvent {
    Apply,
    Succeed,
    Fail,
}

impl SendPhase {
    pub fn is_settled(self) -> bool {
        matches!(self, SendPhase::Committed | SendPhase::RolledBack)
    }

    /// The only legal moves are `idle -> optimistic-applied` and
    /// `optimistic-applied -> committed | rolled-back`.
    pub fn advance(self, mutation: MutationId, event: SendEvent) -> Result<SendPhase, SyncError> {
        let to = match event {
            SendEvent::Apply => SendPhase::OptimisticApplied,
            SendEvent::Succeed => SendPhase::Committed,
            SendEvent::Fail => SendPhase::RolledBack,
        };
        match (self, event) {
            (SendPhase::Idle, SendEvent::Apply)
            | (SendPhase::OptimisticApplied, SendEvent::Succeed | SendEvent::Fail) => Ok(to),
            _ => Err(SyncError::InvalidTransition {
                mutation,
                from: self,
                to,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendKind {
    Message,
    /// Re-issue of the assistant turn answering `target`.
    Retry { target: MessageHash },
}

/// What the transport is asked to deliver for a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub inbox: InboxId,
    pub job_id: JobId,
    pub content: String,
    pub parent: Option<MessageHash>,
    pub attachments: Vec<Attachment>,
}

/// The remote's acknowledgement of a send or retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: MessageHash,
    pub parent_message_id: Option<MessageHash>,
    pub inbox: InboxId,
    pub scheduled_time: Timestamp,
}

/// An outstanding optimistic mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub id: MutationId,
    pub inbox: InboxId,
    pub kind: SendKind,
    pub phase: SendPhase,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub snapshot: ConversationSnapshot,
}

impl PendingSend {
    pub(crate) fn apply(
        id: MutationId,
        inbox: InboxId,
        kind: SendKind,
        content: String,
        attachments: Vec<Attachment>,
        snapshot: ConversationSnapshot,
    ) -> Result<Self, SyncError> {
        let phase = SendPhase::Idle.advance(id, SendEvent::Apply)?;
        Ok(Self {
            id,
            inbox,
            kind,
            phase,
            content,
            attachments,
            snapshot,
        })
    }

    pub(crate) fn settle(&mut self, event: SendEvent) -> Result<(), SyncError> {
        self.phase = self.phase.advance(self.id, event)?;
        Ok(())
    }

    /// Local preview handles that must be released on rollback.
    pub fn previews(&self) -> Vec<Attachment> {
        self.attachments
            .iter()
            .filter(|attachment| attachment.preview.is_some())
            .cloned()
            .collect()
    }
}

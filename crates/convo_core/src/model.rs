use std::fmt;

use chrono::{DateTime, Utc};

use crate::{InboxId, MessageHash, MessageId, MutationId};

pub type Timestamp = DateTime<Utc>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Only assistant messages pass through `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Complete | MessageStatus::Failed)
    }

    /// Status only moves forward: pending -> running -> complete | failed.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            MessageStatus::Pending => true,
            MessageStatus::Running => next.is_terminal(),
            MessageStatus::Complete | MessageStatus::Failed => false,
        }
    }
}

/// Opaque attachment descriptor. `preview` is a locally created handle
/// (object URL or temp path) that must be released if a send rolls back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub path: Option<String>,
    pub preview: Option<String>,
}

impl Attachment {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            preview: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub parent_id: Option<MessageId>,
    pub inbox_id: InboxId,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: Timestamp,
    pub attachments: Vec<Attachment>,
    /// Sent by the caller's own identity.
    pub is_local: bool,
    /// Alternatives the remote holds at this point of a branching history.
    pub branch_siblings: usize,
}

impl Message {
    pub fn user_placeholder(
        mutation: MutationId,
        inbox_id: InboxId,
        parent_id: Option<MessageId>,
        content: String,
        attachments: Vec<Attachment>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::Pending {
                mutation,
                role: Role::User,
            },
            parent_id,
            inbox_id,
            role: Role::User,
            content,
            status: MessageStatus::Pending,
            created_at,
            attachments,
            is_local: true,
            branch_siblings: 0,
        }
    }

    pub fn assistant_placeholder(
        mutation: MutationId,
        inbox_id: InboxId,
        parent_id: Option<MessageId>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::Pending {
                mutation,
                role: Role::Assistant,
            },
            parent_id,
            inbox_id,
            role: Role::Assistant,
            content: String::new(),
            status: MessageStatus::Running,
            created_at,
            attachments: Vec::new(),
            is_local: false,
            branch_siblings: 0,
        }
    }

    pub fn hash(&self) -> Option<&MessageHash> {
        self.id.confirmed()
    }

    /// An assistant turn that has started but produced no visible output yet.
    pub fn is_awaiting_output(&self) -> bool {
        self.role == Role::Assistant
            && self.status == MessageStatus::Running
            && self.content.is_empty()
    }

    /// Content may only change while the message is still in flight.
    pub fn is_content_mutable(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Opaque boundary marker used to fetch the next older page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One bounded fetch, oldest message first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub messages: Vec<Message>,
    /// Absent once the remote returned fewer entries than asked for.
    pub next_cursor: Option<Cursor>,
}

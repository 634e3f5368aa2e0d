use crate::conversation::{ConversationKind, Epoch, FetchTicket};
use crate::mutation::SendReceipt;
use crate::{Attachment, InboxId, JobId, MessageHash, MutationId, Page, RemoteFailure, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// A view started watching an inbox. Repeated subscriptions share the cache.
    Subscribed {
        inbox: InboxId,
        kind: ConversationKind,
    },
    /// A view stopped watching; the last one out tears the cache down.
    Unsubscribed { inbox: InboxId },
    LoadOlderRequested { inbox: InboxId },
    RefreshRequested { inbox: InboxId },
    /// The view read the conversation; stale caches refetch.
    Read { inbox: InboxId },
    PageFetched {
        ticket: FetchTicket,
        result: Result<Page, RemoteFailure>,
    },
    SendRequested {
        inbox: InboxId,
        content: String,
        attachments: Vec<Attachment>,
        at: Timestamp,
    },
    RetryRequested {
        inbox: InboxId,
        message_id: MessageHash,
        at: Timestamp,
    },
    /// Outcome of a send or a retry.
    SendSettled {
        mutation: MutationId,
        result: Result<SendReceipt, RemoteFailure>,
    },
    ForkRequested {
        inbox: InboxId,
        message_id: MessageHash,
    },
    ForkSettled {
        source: InboxId,
        message_id: MessageHash,
        result: Result<JobId, RemoteFailure>,
    },
    KillRequested { inbox: InboxId },
    KillSettled {
        inbox: InboxId,
        result: Result<(), RemoteFailure>,
    },
    RenameRequested { inbox: InboxId, name: String },
    RenameSettled {
        inbox: InboxId,
        name: String,
        result: Result<(), RemoteFailure>,
    },
    RemoveRequested { inbox: InboxId },
    RemoveSettled {
        inbox: InboxId,
        result: Result<(), RemoteFailure>,
    },
    /// A scheduled poll came due.
    PollTick { inbox: InboxId, epoch: Epoch },
    /// Streamed assistant output pushed by the remote.
    StreamChunk { inbox: InboxId, text: String },
    StreamFinished { inbox: InboxId },
}

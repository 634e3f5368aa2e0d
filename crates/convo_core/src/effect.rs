use std::time::Duration;

use crate::conversation::{Epoch, FetchPurpose, FetchRequest};
use crate::mutation::SendRequest;
use crate::{Attachment, InboxId, JobId, MessageHash, MutationId, RemoteFailure};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchPage(FetchRequest),
    SendMessage {
        mutation: MutationId,
        request: SendRequest,
    },
    RetryMessage {
        mutation: MutationId,
        inbox: InboxId,
        message_id: MessageHash,
    },
    ForkJob {
        source: InboxId,
        job_id: JobId,
        message_id: MessageHash,
    },
    KillJob {
        inbox: InboxId,
    },
    RenameInbox {
        inbox: InboxId,
        name: String,
    },
    RemoveJob {
        inbox: InboxId,
        job_id: JobId,
    },
    /// Deliver `Msg::PollTick { inbox, epoch }` after `after`, replacing any
    /// timer already pending for the inbox.
    SchedulePoll {
        inbox: InboxId,
        epoch: Epoch,
        after: Duration,
    },
    CancelPoll {
        inbox: InboxId,
    },
    /// Abort in-flight page fetches; their results would be discarded anyway.
    CancelFetches {
        inbox: InboxId,
    },
    ReleasePreviews(Vec<Attachment>),
    Report(Report),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Fork,
    Kill,
    Rename,
    Remove,
}

/// Outcome notices for whoever drives the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    PageApplied {
        inbox: InboxId,
        purpose: FetchPurpose,
        added: usize,
        exhausted: bool,
    },
    PageDiscarded {
        inbox: InboxId,
    },
    FetchFailed {
        inbox: InboxId,
        purpose: FetchPurpose,
        failure: RemoteFailure,
    },
    LoadOlderSkipped {
        inbox: InboxId,
        reason: SkipReason,
    },
    SendCommitted {
        inbox: InboxId,
        mutation: MutationId,
        message_id: MessageHash,
    },
    SendRolledBack {
        inbox: InboxId,
        mutation: MutationId,
        failure: RemoteFailure,
    },
    Forked {
        source: InboxId,
        forked: InboxId,
    },
    Killed {
        inbox: InboxId,
    },
    Renamed {
        inbox: InboxId,
        name: String,
    },
    Removed {
        inbox: InboxId,
    },
    MutationFailed {
        inbox: InboxId,
        operation: Operation,
        failure: RemoteFailure,
    },
}

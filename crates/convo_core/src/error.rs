use std::fmt;

use crate::mutation::SendPhase;
use crate::{InboxId, MessageId, MutationId};

/// Errors returned by [`crate::update`].
///
/// `IdentityCollision` and `InvalidTransition` are invariant violations and must
/// never be swallowed; the rest report a caller asking for something that does
/// not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("inbox {0} is not subscribed")]
    NotSubscribed(InboxId),
    #[error("message {message} is not cached in inbox {inbox}")]
    UnknownMessage { inbox: InboxId, message: MessageId },
    #[error("inbox {0} does not belong to a job")]
    NotAJobInbox(InboxId),
    #[error("{0} is not an outstanding mutation")]
    UnknownMutation(MutationId),
    #[error("message {id} in inbox {inbox} collides with a different cached message")]
    IdentityCollision { inbox: InboxId, id: MessageId },
    #[error("{mutation} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        mutation: MutationId,
        from: SendPhase,
        to: SendPhase,
    },
}

impl SyncError {
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            SyncError::IdentityCollision { .. } | SyncError::InvalidTransition { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network trouble or timeout; the next poll or a manual retry may succeed.
    Transient,
    /// The remote answered with a shape we could not decode.
    Decode,
    /// The remote refused the request.
    Rejected { status: u16 },
    /// The request could not be built (bad node address or credentials).
    Misconfigured,
    Cancelled,
}

/// The core's view of a remote call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RemoteFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Transient | FailureKind::Decode)
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Transient => write!(f, "transient failure: {}", self.message),
            FailureKind::Decode => write!(f, "decode failure: {}", self.message),
            FailureKind::Rejected { status } => {
                write!(f, "rejected with status {status}: {}", self.message)
            }
            FailureKind::Misconfigured => write!(f, "misconfigured: {}", self.message),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for RemoteFailure {}

use std::fmt;

use convo_core::{FailureKind, RemoteFailure, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportFailureKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::new(TransportFailureKind::Decode, message)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    Decode,
    Cancelled,
}

impl fmt::Display for TransportFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailureKind::InvalidUrl => write!(f, "invalid url"),
            TransportFailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            TransportFailureKind::Timeout => write!(f, "timeout"),
            TransportFailureKind::Network => write!(f, "network error"),
            TransportFailureKind::Decode => write!(f, "decode error"),
            TransportFailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<TransportError> for RemoteFailure {
    fn from(err: TransportError) -> Self {
        let kind = match err.kind {
            TransportFailureKind::Timeout | TransportFailureKind::Network => FailureKind::Transient,
            // Server trouble and throttling clear up on their own.
            TransportFailureKind::HttpStatus(status) if status >= 500 || status == 408 || status == 429 => {
                FailureKind::Transient
            }
            TransportFailureKind::HttpStatus(status) => FailureKind::Rejected { status },
            TransportFailureKind::Decode => FailureKind::Decode,
            TransportFailureKind::InvalidUrl => FailureKind::Misconfigured,
            TransportFailureKind::Cancelled => FailureKind::Cancelled,
        };
        RemoteFailure::new(kind, err.message)
    }
}

/// Returned by [`crate::Subscription`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("remote call failed: {0}")]
    Remote(RemoteFailure),
    #[error("the subscription has ended")]
    Closed,
}

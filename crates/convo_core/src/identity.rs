//! Message identity and inbox addressing.
//!
//! Everything here is pure and computable without a network round trip. Malformed
//! input is reported as [`IdentityError`]; callers are expected to treat it as a
//! programming error rather than retry.
use std::fmt;
use std::fmt::Write as _;

use chrono::SecondsFormat;
use sha2::{Digest, Sha256};

use crate::{Role, Timestamp};

const SEPARATOR: &str = "::";
const JOB_INBOX_PREFIX: &str = "job_inbox";
const REGULAR_INBOX_PREFIX: &str = "inbox";
/// Regular inboxes carry between two and ninety-nine participants.
const MAX_PARTICIPANTS: usize = 99;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("job id must not be empty")]
    EmptyJobId,
    #[error("job id {0:?} contains the inbox separator")]
    JobIdContainsSeparator(String),
    #[error("invalid inbox name {0:?}")]
    InvalidInboxName(String),
    #[error("invalid e2e flag {flag:?} in inbox name {inbox:?}")]
    InvalidE2eFlag { inbox: String, flag: String },
    #[error("job inbox {0:?} cannot be end-to-end encrypted")]
    EncryptedJobInbox(String),
    #[error("malformed message hash {0:?}")]
    MalformedHash(String),
}

/// Remote unit of work, usually one assistant conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdentityError::EmptyJobId);
        }
        if raw.contains(SEPARATOR) {
            return Err(IdentityError::JobIdContainsSeparator(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an inbox name addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InboxKind {
    Job(JobId),
    Regular { participants: Vec<String>, e2e: bool },
}

/// Conversation namespace; the unit of pagination and caching.
///
/// Always held in canonical form: prefixes, flags and participant names are
/// lowercase, job ids are kept verbatim so the job mapping stays injective.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InboxId {
    canonical: String,
    kind: InboxKind,
}

impl InboxId {
    /// `job_inbox::<job_id>::false`. Injective because job ids cannot contain `::`.
    pub fn for_job(job_id: &JobId) -> Self {
        Self {
            canonical: format!("{JOB_INBOX_PREFIX}{SEPARATOR}{job_id}{SEPARATOR}false"),
            kind: InboxKind::Job(job_id.clone()),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        if parts.len() < 3 || parts.len() > MAX_PARTICIPANTS + 2 {
            return Err(IdentityError::InvalidInboxName(raw.to_string()));
        }

        let flag = parts[parts.len() - 1].to_ascii_lowercase();
        let e2e = match flag.as_str() {
            "true" => true,
            "false" => false,
            _ => {
                return Err(IdentityError::InvalidE2eFlag {
                    inbox: raw.to_string(),
                    flag: parts[parts.len() - 1].to_string(),
                })
            }
        };

        let prefix = parts[0].to_ascii_lowercase();
        if prefix == JOB_INBOX_PREFIX {
            if parts.len() != 3 {
                return Err(IdentityError::InvalidInboxName(raw.to_string()));
            }
            if e2e {
                return Err(IdentityError::EncryptedJobInbox(raw.to_string()));
            }
            let job_id = JobId::new(parts[1])
                .map_err(|_| IdentityError::InvalidInboxName(raw.to_string()))?;
            return Ok(Self::for_job(&job_id));
        }

        if prefix == REGULAR_INBOX_PREFIX {
            let participants: Vec<String> = parts[1..parts.len() - 1]
                .iter()
                .map(|name| name.trim().to_lowercase())
                .collect();
            if participants.len() < 2 || participants.iter().any(String::is_empty) {
                return Err(IdentityError::InvalidInboxName(raw.to_string()));
            }
            let canonical = format!(
                "{REGULAR_INBOX_PREFIX}{SEPARATOR}{}{SEPARATOR}{e2e}",
                participants.join(SEPARATOR)
            );
            return Ok(Self {
                canonical,
                kind: InboxKind::Regular { participants, e2e },
            });
        }

        Err(IdentityError::InvalidInboxName(raw.to_string()))
    }

    pub fn kind(&self) -> &InboxKind {
        &self.kind
    }

    /// The job this inbox belongs to, if it is a job inbox.
    pub fn job_id(&self) -> Option<&JobId> {
        match &self.kind {
            InboxKind::Job(job_id) => Some(job_id),
            InboxKind::Regular { .. } => None,
        }
    }

    pub fn is_job(&self) -> bool {
        matches!(self.kind, InboxKind::Job(_))
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl fmt::Display for InboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Lowercase hex content hash of a confirmed message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageHash(String);

impl MessageHash {
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IdentityError::MalformedHash(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Semantic fields that identify a message.
#[derive(Debug, Clone, Copy)]
pub struct HashInput<'a> {
    pub sender: &'a str,
    pub content: &'a str,
    pub timestamp: Timestamp,
    pub nonce: Option<&'a str>,
}

/// SHA-256 over length-prefixed fields, so field boundaries cannot be shifted
/// to forge an equal hash from different fields.
pub fn hash_message(input: &HashInput<'_>) -> MessageHash {
    let timestamp = input
        .timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut hasher = Sha256::new();
    for field in [
        input.sender,
        input.content,
        timestamp.as_str(),
        input.nonce.unwrap_or(""),
    ] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.update([u8::from(input.nonce.is_some())]);

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    MessageHash(hex)
}

/// Identifies one optimistic mutation (a send or a retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(pub u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mutation-{}", self.0)
    }
}

/// A message id is either server-confirmed or a placeholder owned by a mutation.
///
/// At most one placeholder per role exists for a given mutation, so
/// `Pending { mutation, role }` is unique within an inbox by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageId {
    Pending { mutation: MutationId, role: Role },
    Confirmed(MessageHash),
}

impl MessageId {
    pub fn is_pending(&self) -> bool {
        matches!(self, MessageId::Pending { .. })
    }

    pub fn confirmed(&self) -> Option<&MessageHash> {
        match self {
            MessageId::Confirmed(hash) => Some(hash),
            MessageId::Pending { .. } => None,
        }
    }

    pub fn mutation(&self) -> Option<MutationId> {
        match self {
            MessageId::Pending { mutation, .. } => Some(*mutation),
            MessageId::Confirmed(_) => None,
        }
    }
}

impl From<MessageHash> for MessageId {
    fn from(hash: MessageHash) -> Self {
        MessageId::Confirmed(hash)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Pending { mutation, role } => write!(f, "pending:{mutation}:{role}"),
            MessageId::Confirmed(hash) => write!(f, "{hash}"),
        }
    }
}

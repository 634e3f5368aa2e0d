//! Page fetcher: asks the transport for a page and turns the remote shapes
//! into canonical [`Message`]s.
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use convo_core::{
    Attachment, Cursor, InboxId, Message, MessageHash, MessageId, MessageStatus, Page, Role,
    Timestamp,
};
use convo_logging::convo_trace;

use crate::wire::{ChatMessage, RemotePage};
use crate::{Transport, TransportError};

/// Who "me" is on the node; decides `is_local` and therefore the role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Node identity, e.g. `@@localhost.shinkai`.
    pub node_name: String,
    /// Profile under that node, e.g. `main`.
    pub profile: String,
}

impl LocalIdentity {
    pub fn new(node_name: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            profile: profile.into(),
        }
    }

    /// A message is ours when it comes from our node and profile, either
    /// directly or through one of our devices. Agents under our profile are not us.
    pub fn is_local(&self, sender: &str, sender_subidentity: &str) -> bool {
        if !sender.eq_ignore_ascii_case(&self.node_name) {
            return false;
        }
        let mut parts = sender_subidentity.split('/');
        let profile = parts.next().unwrap_or_default();
        let kind = parts.next();
        profile.eq_ignore_ascii_case(&self.profile)
            && matches!(kind, None | Some("") | Some("device"))
    }
}

pub struct PageFetcher {
    transport: Arc<dyn Transport>,
    identity: LocalIdentity,
}

impl PageFetcher {
    pub fn new(transport: Arc<dyn Transport>, identity: LocalIdentity) -> Self {
        Self {
            transport,
            identity,
        }
    }

    /// One page, oldest first. `cursor: None` asks for the newest messages.
    /// No retries happen here; a failure is returned as is.
    pub async fn fetch_page(
        &self,
        inbox: &InboxId,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<Page, TransportError> {
        let remote = self.transport.fetch_messages(inbox, cursor, limit).await?;
        let page = normalize_page(remote, inbox, &self.identity, limit)?;
        convo_trace!(
            "Fetched {} messages for {inbox} (cursor {:?})",
            page.messages.len(),
            cursor.map(Cursor::as_str)
        );
        Ok(page)
    }
}

/// Whole page or nothing: one malformed message fails the page.
pub fn normalize_page(
    remote: RemotePage,
    inbox: &InboxId,
    identity: &LocalIdentity,
    limit: usize,
) -> Result<Page, TransportError> {
    // Counted before flattening: an empty branch group still fills a slot.
    let fetched = match &remote {
        RemotePage::Flat(messages) => messages.len(),
        RemotePage::Branched(groups) => groups.len(),
    };
    let messages = match remote {
        RemotePage::Flat(messages) => messages
            .iter()
            .map(|wire| normalize_message(wire, inbox, identity))
            .collect::<Result<Vec<_>, _>>()?,
        RemotePage::Branched(groups) => flatten_branches(&groups, inbox, identity)?,
    };

    // A short page is the last one; a full page continues before its oldest message.
    let next_cursor = if fetched >= limit {
        messages
            .first()
            .and_then(Message::hash)
            .map(|hash| Cursor::new(hash.as_str()))
    } else {
        None
    };
    Ok(Page {
        messages,
        next_cursor,
    })
}

/// The first entry of each group is the main line; its parent is the previous
/// group's main-line message.
fn flatten_branches(
    groups: &[Vec<ChatMessage>],
    inbox: &InboxId,
    identity: &LocalIdentity,
) -> Result<Vec<Message>, TransportError> {
    let mut messages: Vec<Message> = Vec::with_capacity(groups.len());
    for group in groups {
        let Some(main) = group.first() else {
            continue;
        };
        let mut message = normalize_message(main, inbox, identity)?;
        if let Some(previous) = messages.last() {
            message.parent_id = Some(previous.id.clone());
        }
        message.branch_siblings = group.len() - 1;
        messages.push(message);
    }
    Ok(messages)
}

pub fn normalize_message(
    wire: &ChatMessage,
    inbox: &InboxId,
    identity: &LocalIdentity,
) -> Result<Message, TransportError> {
    let hash = MessageHash::parse(&wire.node_api_data.node_message_hash)
        .map_err(|err| TransportError::decode(err.to_string()))?;
    let parent_id = non_empty(wire.node_api_data.parent_hash.as_deref())
        .or_else(|| non_empty(wire.job_message.parent.as_deref()))
        .map(|raw| MessageHash::parse(raw).map(MessageId::from))
        .transpose()
        .map_err(|err| TransportError::decode(err.to_string()))?;
    let created_at = parse_timestamp(&wire.node_api_data.node_timestamp)?;

    let is_local = identity.is_local(&wire.sender, &wire.sender_subidentity);
    let role = if is_local { Role::User } else { Role::Assistant };

    let attachments = wire
        .job_message
        .fs_files_paths
        .iter()
        .map(|path| Attachment {
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: Some(path.clone()),
            preview: None,
        })
        .chain(wire.job_message.job_filenames.iter().map(Attachment::named))
        .collect();

    Ok(Message {
        id: MessageId::Confirmed(hash),
        parent_id,
        inbox_id: inbox.clone(),
        role,
        content: wire.job_message.content.clone(),
        // The node only stores finished turns.
        status: MessageStatus::Complete,
        created_at,
        attachments,
        is_local,
        branch_siblings: 0,
    })
}

pub(crate) fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|raw| !raw.is_empty())
}

/// RFC 3339, or a naive timestamp taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Result<Timestamp, TransportError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|err| TransportError::decode(format!("bad timestamp {raw:?}: {err}")))
}

//! Per-inbox cached conversation and the pagination cursor that grows it.
//!
//! The conversation is the only writer of its message list. Older pages are
//! prepended, fresh messages are merged at the tail, and a message that is
//! already cached is updated in place instead of duplicated.
use std::collections::HashSet;

use convo_logging::convo_debug;

use crate::polling::SyncHealth;
use crate::{
    Cursor, InboxId, Message, MessageHash, MessageId, MessageStatus, MutationId, Page,
    RemoteFailure, Role, SyncError,
};

/// Generation of a subscription. Results tagged with an older epoch are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epoch(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    /// A job whose assistant may still be generating; eligible for polling.
    ActiveJob,
    /// Archived job or plain inbox; never polled.
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchPurpose {
    /// Backward pagination from the oldest known cursor.
    Older,
    /// Newest page, merged at the tail (polls and refreshes).
    Newest,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchTicket {
    pub inbox: InboxId,
    pub epoch: Epoch,
    pub purpose: FetchPurpose,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub ticket: FetchTicket,
    pub cursor: Option<Cursor>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OlderStart {
    Fetch(FetchRequest),
    /// Another `load_older` is in flight; this one is coalesced into it.
    InFlight,
    Exhausted,
}

/// A page that has been applied, keyed by the cursor that fetched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub cursor: Option<Cursor>,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub messages: Vec<Message>,
    pub pages: Vec<PageRecord>,
    pub older_cursor: Option<Cursor>,
    pub exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeReport {
    pub appended: usize,
    pub updated: usize,
    pub claimed: usize,
    pub ignored: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageApplied {
    Applied {
        added: usize,
        exhausted: bool,
    },
    /// The ticket no longer matches what this conversation is waiting for.
    Discarded,
}

enum Upsert {
    Unchanged,
    Updated,
    Regressed,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    inbox_id: InboxId,
    kind: ConversationKind,
    epoch: Epoch,
    messages: Vec<Message>,
    pages: Vec<PageRecord>,
    older_cursor: Option<Cursor>,
    exhausted: bool,
    older_in_flight: Option<FetchRequest>,
    newest_in_flight: Option<FetchRequest>,
    stale: bool,
    /// Holds a fork seed that the first fetched page replaces.
    seeded: bool,
    poll_failures: u32,
    older_error: Option<RemoteFailure>,
    poll_error: Option<RemoteFailure>,
    poll_scheduled: bool,
    subscribers: usize,
    revision: u64,
}

impl Conversation {
    pub fn new(inbox_id: InboxId, kind: ConversationKind, epoch: Epoch) -> Self {
        Self {
            inbox_id,
            kind,
            epoch,
            messages: Vec::new(),
            pages: Vec::new(),
            older_cursor: None,
            exhausted: false,
            older_in_flight: None,
            newest_in_flight: None,
            stale: false,
            seeded: false,
            poll_failures: 0,
            older_error: None,
            poll_error: None,
            poll_scheduled: false,
            subscribers: 1,
            revision: 0,
        }
    }

    /// Starts from a seeded history (a fork). Marked stale so the first read
    /// reconciles it with the remote.
    pub fn from_seed(
        inbox_id: InboxId,
        kind: ConversationKind,
        epoch: Epoch,
        seed: Vec<Message>,
    ) -> Self {
        let mut conversation = Self::new(inbox_id, kind, epoch);
        conversation.messages = seed;
        conversation.stale = true;
        conversation.seeded = true;
        conversation
    }

    pub fn inbox_id(&self) -> &InboxId {
        &self.inbox_id
    }

    pub fn kind(&self) -> ConversationKind {
        self.kind
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pages(&self) -> &[PageRecord] {
        &self.pages
    }

    pub fn tail(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn find(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_loading_older(&self) -> bool {
        self.older_in_flight.is_some()
    }

    pub fn is_refreshing(&self) -> bool {
        self.newest_in_flight.is_some()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn poll_failures(&self) -> u32 {
        self.poll_failures
    }

    pub fn older_error(&self) -> Option<&RemoteFailure> {
        self.older_error.as_ref()
    }

    pub fn health(&self, threshold: u32) -> SyncHealth {
        SyncHealth::from_failures(self.poll_failures, threshold)
    }

    /// Poll failure, exposed only once the conversation is out of sync.
    pub fn visible_poll_error(&self, threshold: u32) -> Option<&RemoteFailure> {
        match self.health(threshold) {
            SyncHealth::OutOfSync { .. } => self.poll_error.as_ref(),
            SyncHealth::InSync | SyncHealth::Lagging { .. } => None,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Most recent confirmed message; the parent of the next send.
    pub fn last_confirmed(&self) -> Option<&MessageHash> {
        self.messages.iter().rev().find_map(Message::hash)
    }

    /// Copy of the history up to and including `hash`.
    pub fn prefix_through(&self, hash: &MessageHash) -> Option<Vec<Message>> {
        let end = self
            .messages
            .iter()
            .position(|message| message.hash() == Some(hash))?;
        Some(self.messages[..=end].to_vec())
    }

    pub(crate) fn add_subscriber(&mut self) {
        self.subscribers += 1;
    }

    /// Returns true once the last subscriber is gone.
    pub(crate) fn remove_subscriber(&mut self) -> bool {
        self.subscribers = self.subscribers.saturating_sub(1);
        self.subscribers == 0
    }

    pub(crate) fn mark_stale(&mut self) {
        if !self.stale {
            self.stale = true;
            self.touch();
        }
    }

    pub(crate) fn poll_scheduled(&self) -> bool {
        self.poll_scheduled
    }

    pub(crate) fn set_poll_scheduled(&mut self, scheduled: bool) {
        self.poll_scheduled = scheduled;
    }

    pub(crate) fn start_older_fetch(&mut self, seq: u64, limit: usize) -> OlderStart {
        // Before the first page, a newest fetch and an older fetch ask for the
        // same thing.
        if self.older_in_flight.is_some() || self.awaiting_first_page() {
            return OlderStart::InFlight;
        }
        if self.exhausted {
            return OlderStart::Exhausted;
        }
        let request = FetchRequest {
            ticket: FetchTicket {
                inbox: self.inbox_id.clone(),
                epoch: self.epoch,
                purpose: FetchPurpose::Older,
                seq,
            },
            cursor: self.older_cursor.clone(),
            limit,
        };
        self.older_in_flight = Some(request.clone());
        self.touch();
        OlderStart::Fetch(request)
    }

    /// `None` while another newest-page fetch is outstanding.
    pub(crate) fn start_newest_fetch(&mut self, seq: u64, limit: usize) -> Option<FetchRequest> {
        if self.newest_in_flight.is_some() || self.awaiting_first_page() {
            return None;
        }
        let request = FetchRequest {
            ticket: FetchTicket {
                inbox: self.inbox_id.clone(),
                epoch: self.epoch,
                purpose: FetchPurpose::Newest,
                seq,
            },
            cursor: None,
            limit,
        };
        self.newest_in_flight = Some(request.clone());
        Some(request)
    }

    fn awaiting_first_page(&self) -> bool {
        self.pages.is_empty() && (self.older_in_flight.is_some() || self.newest_in_flight.is_some())
    }

    fn in_flight(&self, ticket: &FetchTicket) -> Option<&FetchRequest> {
        if ticket.epoch != self.epoch {
            return None;
        }
        let slot = match ticket.purpose {
            FetchPurpose::Older => self.older_in_flight.as_ref(),
            FetchPurpose::Newest => self.newest_in_flight.as_ref(),
        };
        slot.filter(|request| &request.ticket == ticket)
    }

    /// Applies a fetched page. Either the whole page is applied or, on a
    /// collision, nothing is.
    pub(crate) fn apply_page(
        &mut self,
        ticket: &FetchTicket,
        page: Page,
    ) -> Result<PageApplied, SyncError> {
        let Some(request) = self.in_flight(ticket).cloned() else {
            convo_debug!(
                "Discarding late page for {} (epoch {:?}, seq {})",
                self.inbox_id,
                ticket.epoch,
                ticket.seq
            );
            return Ok(PageApplied::Discarded);
        };

        let first_page = self.pages.is_empty();
        let result = match ticket.purpose {
            // Until the first page lands there is no cursor to anchor to, so the
            // newest page is treated as the first page.
            _ if first_page => {
                let mut cached = self.messages.clone();
                if self.seeded {
                    cached.retain(|message| message.id.is_pending());
                }
                self.apply_first_page(&request, page, cached)
            }
            FetchPurpose::Older => self.apply_older(&request, page),
            FetchPurpose::Newest if self.leaves_gap(&page) => {
                convo_debug!(
                    "Newest page of {} does not reach the cached history; restarting pagination",
                    self.inbox_id
                );
                let mut cached = self.messages.clone();
                cached.retain(|message| message.id.is_pending());
                let applied = self.apply_first_page(&request, page, cached);
                if applied.is_ok() {
                    // An older page in flight continues from a cursor that no
                    // longer exists.
                    self.older_in_flight = None;
                }
                applied
            }
            FetchPurpose::Newest => self.merge_newest(page.messages).map(|report| {
                PageApplied::Applied {
                    added: report.appended + report.claimed,
                    exhausted: self.exhausted,
                }
            }),
        };

        match ticket.purpose {
            FetchPurpose::Older => self.older_in_flight = None,
            FetchPurpose::Newest => self.newest_in_flight = None,
        }
        self.touch();

        let applied = result?;
        match ticket.purpose {
            FetchPurpose::Older => self.older_error = None,
            FetchPurpose::Newest => {
                self.poll_failures = 0;
                self.poll_error = None;
            }
        }
        if first_page || ticket.purpose == FetchPurpose::Newest {
            self.stale = false;
        }
        Ok(applied)
    }

    /// A full newest page that shares nothing with the cached history, and
    /// whose oldest message does not continue it, skipped messages in between.
    fn leaves_gap(&self, page: &Page) -> bool {
        // Without a cursor the page reaches back to the start of the history.
        if page.next_cursor.is_none() {
            return false;
        }
        let cached = |id: &MessageId| !id.is_pending() && position(&self.messages, id).is_some();
        let overlaps = page.messages.iter().any(|message| cached(&message.id));
        let continues = page
            .messages
            .first()
            .and_then(|oldest| oldest.parent_id.as_ref())
            .is_some_and(|parent| cached(parent));
        !overlaps && !continues
    }

    /// Installs the newest page of the history. `cached` holds what survives
    /// from before: placeholders and messages confirmed by a receipt. Those the
    /// page already contains take its order; the rest stay at the tail.
    fn apply_first_page(
        &mut self,
        request: &FetchRequest,
        page: Page,
        mut cached: Vec<Message>,
    ) -> Result<PageApplied, SyncError> {
        let fetched = page.messages.len();
        let mut merged: Vec<Message> = Vec::with_capacity(fetched + cached.len());
        let mut added = 0;

        for incoming in page.messages {
            if let Some(idx) = position(&merged, &incoming.id) {
                self.upsert(&mut merged[idx], incoming)?;
            } else if let Some(idx) = position(&cached, &incoming.id) {
                let mut known = cached.remove(idx);
                self.upsert(&mut known, incoming)?;
                merged.push(known);
            } else if let Some(idx) = claimable_placeholder(&cached, &incoming) {
                let placeholder = cached.remove(idx);
                if let MessageId::Pending {
                    mutation,
                    role: Role::User,
                } = placeholder.id
                {
                    reparent_assistant_placeholder(&mut cached, mutation, &incoming.id);
                }
                merged.push(incoming);
            } else {
                merged.push(incoming);
                added += 1;
            }
        }
        merged.extend(cached);

        // Only a page without a cursor ends the history.
        self.exhausted = page.next_cursor.is_none();
        self.older_cursor = page.next_cursor;
        self.pages = vec![PageRecord {
            cursor: request.cursor.clone(),
            len: fetched,
        }];
        self.messages = merged;
        self.seeded = false;
        Ok(PageApplied::Applied {
            added,
            exhausted: self.exhausted,
        })
    }

    fn apply_older(&mut self, request: &FetchRequest, page: Page) -> Result<PageApplied, SyncError> {
        let fetched = page.messages.len();

        let mut existing = self.messages.clone();
        let mut fresh: Vec<Message> = Vec::with_capacity(fetched);
        for incoming in page.messages {
            if let Some(idx) = position(&existing, &incoming.id) {
                self.upsert(&mut existing[idx], incoming)?;
            } else if let Some(idx) = position(&fresh, &incoming.id) {
                self.upsert(&mut fresh[idx], incoming)?;
            } else {
                fresh.push(incoming);
            }
        }
        let added = fresh.len();
        fresh.extend(existing);
        self.messages = fresh;

        self.pages.insert(
            0,
            PageRecord {
                cursor: request.cursor.clone(),
                len: fetched,
            },
        );
        self.exhausted = page.next_cursor.is_none();
        self.older_cursor = page.next_cursor;
        Ok(PageApplied::Applied {
            added,
            exhausted: self.exhausted,
        })
    }

    /// Appends messages at the tail, updating cached ones in place and letting
    /// confirmed messages take over the placeholder they stand for.
    pub fn merge_newest(&mut self, incoming: Vec<Message>) -> Result<MergeReport, SyncError> {
        let mut next = self.messages.clone();
        let mut report = MergeReport::default();

        for message in incoming {
            if let Some(idx) = position(&next, &message.id) {
                match self.upsert(&mut next[idx], message)? {
                    Upsert::Updated => report.updated += 1,
                    Upsert::Unchanged => {}
                    Upsert::Regressed => report.ignored += 1,
                }
            } else if let Some(idx) = claimable_placeholder(&next, &message) {
                if let MessageId::Pending {
                    mutation,
                    role: Role::User,
                } = next[idx].id
                {
                    reparent_assistant_placeholder(&mut next, mutation, &message.id);
                }
                next[idx] = message;
                report.claimed += 1;
            } else {
                next.push(message);
                report.appended += 1;
            }
        }

        if report != MergeReport::default() {
            self.messages = next;
            self.touch();
        }
        Ok(report)
    }

    /// Swaps a placeholder for its confirmed message in place. If the confirmed
    /// message already arrived through a poll, the placeholder is just dropped.
    pub(crate) fn confirm_placeholder(
        &mut self,
        placeholder: &MessageId,
        confirmed: Message,
    ) -> Result<(), SyncError> {
        let mut next = self.messages.clone();
        let already = position(&next, &confirmed.id);
        let slot = position(&next, placeholder);

        if let MessageId::Pending {
            mutation,
            role: Role::User,
        } = placeholder
        {
            reparent_assistant_placeholder(&mut next, *mutation, &confirmed.id);
        }

        match (already, slot) {
            (Some(idx), Some(slot)) => {
                self.upsert(&mut next[idx], confirmed)?;
                next.remove(slot);
            }
            (Some(idx), None) => {
                self.upsert(&mut next[idx], confirmed)?;
            }
            (None, Some(slot)) => next[slot] = confirmed,
            (None, None) => next.push(confirmed),
        }

        self.messages = next;
        self.touch();
        Ok(())
    }

    pub(crate) fn splice_tail(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        self.touch();
    }

    /// Removes placeholders whose mutation has already settled and that ended
    /// up failed (a killed turn nobody will confirm).
    pub(crate) fn drop_dead_placeholders(&mut self, outstanding: &HashSet<MutationId>) {
        let before = self.messages.len();
        self.messages.retain(|message| match message.id.mutation() {
            Some(mutation) => {
                outstanding.contains(&mutation) || !message.status.is_terminal()
            }
            None => true,
        });
        if self.messages.len() != before {
            self.touch();
        }
    }

    pub(crate) fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            messages: self.messages.clone(),
            pages: self.pages.clone(),
            older_cursor: self.older_cursor.clone(),
            exhausted: self.exhausted,
        }
    }

    /// Puts back a snapshot taken before a mutation.
    ///
    /// Placeholders of other mutations are the one exception to an exact
    /// restore: one that was confirmed meanwhile is left out, and one created
    /// after the snapshot by a still-outstanding mutation is carried over.
    /// Returns true when a placeholder was left out, meaning the restored list
    /// lags the remote and should be refreshed.
    pub(crate) fn restore(
        &mut self,
        snapshot: ConversationSnapshot,
        outstanding: &HashSet<MutationId>,
    ) -> bool {
        let mut restored = snapshot.messages;
        let before = restored.len();
        restored.retain(|message| {
            !message.id.is_pending() || position(&self.messages, &message.id).is_some()
        });
        let lagging = restored.len() != before;

        let carried: Vec<Message> = self
            .messages
            .iter()
            .filter(|message| {
                message
                    .id
                    .mutation()
                    .is_some_and(|mutation| outstanding.contains(&mutation))
                    && position(&restored, &message.id).is_none()
            })
            .cloned()
            .collect();
        restored.extend(carried);

        self.messages = restored;
        self.pages = snapshot.pages;
        self.older_cursor = snapshot.older_cursor;
        self.exhausted = snapshot.exhausted;
        self.touch();
        lagging
    }

    /// Streams text into the running assistant turn at the tail.
    pub(crate) fn append_stream_chunk(&mut self, text: &str) -> bool {
        match self.messages.last_mut() {
            Some(tail) if tail.role == Role::Assistant && tail.is_content_mutable() => {
                tail.content.push_str(text);
                if tail.status == MessageStatus::Pending {
                    tail.status = MessageStatus::Running;
                }
                self.touch();
                true
            }
            _ => false,
        }
    }

    /// A stopped generation ends the running tail: complete if it produced
    /// anything, failed otherwise.
    pub(crate) fn settle_running_tail(&mut self) -> bool {
        match self.messages.last_mut() {
            Some(tail)
                if tail.role == Role::Assistant
                    && tail.status == MessageStatus::Running =>
            {
                tail.status = if tail.content.is_empty() {
                    MessageStatus::Failed
                } else {
                    MessageStatus::Complete
                };
                self.touch();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn record_fetch_failure(
        &mut self,
        ticket: &FetchTicket,
        failure: RemoteFailure,
    ) -> bool {
        if self.in_flight(ticket).is_none() {
            return false;
        }
        match ticket.purpose {
            FetchPurpose::Older => {
                self.older_in_flight = None;
                self.older_error = Some(failure);
            }
            FetchPurpose::Newest => {
                self.newest_in_flight = None;
                self.poll_failures = self.poll_failures.saturating_add(1);
                self.poll_error = Some(failure);
            }
        }
        self.touch();
        true
    }

    fn upsert(&self, existing: &mut Message, incoming: Message) -> Result<Upsert, SyncError> {
        let same_payload = existing.content == incoming.content;
        if existing.role != incoming.role || (!existing.is_content_mutable() && !same_payload) {
            return Err(SyncError::IdentityCollision {
                inbox: self.inbox_id.clone(),
                id: incoming.id,
            });
        }
        if !existing.status.can_advance_to(incoming.status) {
            convo_debug!(
                "Ignoring regressing update for {} in {}: {:?} -> {:?}",
                incoming.id,
                self.inbox_id,
                existing.status,
                incoming.status
            );
            return Ok(Upsert::Regressed);
        }
        if existing.status == incoming.status
            && same_payload
            && existing.attachments == incoming.attachments
            && existing.parent_id == incoming.parent_id
        {
            return Ok(Upsert::Unchanged);
        }
        *existing = incoming;
        Ok(Upsert::Updated)
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

fn position(messages: &[Message], id: &MessageId) -> Option<usize> {
    messages.iter().position(|message| &message.id == id)
}

/// A confirmed user message stands for a placeholder carrying the same text,
/// preferably the one sent after the same parent, otherwise the oldest. A
/// confirmed assistant message stands for the placeholder replying to the same
/// parent.
fn claimable_placeholder(messages: &[Message], incoming: &Message) -> Option<usize> {
    if incoming.id.is_pending() {
        return None;
    }
    let candidate = |message: &Message| match message.id {
        MessageId::Pending { role, .. } if role == incoming.role => match role {
            Role::User => message.content == incoming.content,
            Role::Assistant => {
                incoming.parent_id.is_some() && message.parent_id == incoming.parent_id
            }
        },
        _ => false,
    };
    let same_parent = |message: &Message| {
        incoming.role == Role::User
            && incoming.parent_id.is_some()
            && message.parent_id == incoming.parent_id
    };
    messages
        .iter()
        .position(|message| candidate(message) && same_parent(message))
        .or_else(|| messages.iter().position(candidate))
}

fn reparent_assistant_placeholder(messages: &mut [Message], mutation: MutationId, parent: &MessageId) {
    let assistant = MessageId::Pending {
        mutation,
        role: Role::Assistant,
    };
    if let Some(message) = messages.iter_mut().find(|message| message.id == assistant) {
        message.parent_id = Some(parent.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hash_message, HashInput, JobId};
    use chrono::TimeZone;

    fn inbox() -> InboxId {
        InboxId::for_job(&JobId::new("42").unwrap())
    }

    fn confirmed(n: i64, role: Role, content: &str) -> Message {
        let created_at = chrono::Utc.timestamp_opt(1_700_000_000 + n, 0).single().unwrap();
        let hash = hash_message(&HashInput {
            sender: if role == Role::User { "me" } else { "agent" },
            content,
            timestamp: created_at,
            nonce: None,
        });
        Message {
            id: MessageId::Confirmed(hash),
            parent_id: None,
            inbox_id: inbox(),
            role,
            content: content.to_string(),
            status: MessageStatus::Complete,
            created_at,
            attachments: Vec::new(),
            is_local: role == Role::User,
            branch_siblings: 0,
        }
    }

    fn conversation() -> Conversation {
        Conversation::new(inbox(), ConversationKind::ActiveJob, Epoch(1))
    }

    #[test]
    fn merging_a_known_message_keeps_length() {
        let mut convo = conversation();
        let first = confirmed(1, Role::User, "hi");
        convo.merge_newest(vec![first.clone()]).unwrap();

        let report = convo.merge_newest(vec![first]).unwrap();
        assert_eq!(report, MergeReport::default());
        assert_eq!(convo.messages().len(), 1);
    }

    #[test]
    fn running_message_completes_in_place() {
        let mut convo = conversation();
        let mut running = confirmed(1, Role::Assistant, "");
        running.status = MessageStatus::Running;
        convo.merge_newest(vec![running.clone()]).unwrap();

        let mut done = running.clone();
        done.status = MessageStatus::Complete;
        done.content = "answer".into();
        let report = convo.merge_newest(vec![done]).unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(convo.messages().len(), 1);
        assert_eq!(convo.messages()[0].status, MessageStatus::Complete);

        // The stale running copy arriving later is ignored.
        let report = convo.merge_newest(vec![running]).unwrap();
        assert_eq!(report.ignored, 1);
        assert_eq!(convo.messages()[0].content, "answer");
    }

    #[test]
    fn colliding_identity_is_rejected_without_partial_apply() {
        let mut convo = conversation();
        let original = confirmed(1, Role::User, "hi");
        convo.merge_newest(vec![original.clone()]).unwrap();

        let mut forged = original.clone();
        forged.content = "something else".into();
        let fresh = confirmed(2, Role::Assistant, "reply");
        let err = convo.merge_newest(vec![fresh, forged]).unwrap_err();

        assert!(err.is_invariant_violation());
        assert_eq!(convo.messages(), &[original]);
    }

    #[test]
    fn confirmed_user_message_claims_its_placeholder() {
        let mut convo = conversation();
        let mutation = MutationId(7);
        let at = chrono::Utc.timestamp_opt(1_700_000_100, 0).single().unwrap();
        convo.splice_tail([
            Message::user_placeholder(mutation, inbox(), None, "hello".into(), Vec::new(), at),
            Message::assistant_placeholder(
                mutation,
                inbox(),
                Some(MessageId::Pending {
                    mutation,
                    role: Role::User,
                }),
                at,
            ),
        ]);

        let user = confirmed(3, Role::User, "hello");
        let report = convo.merge_newest(vec![user.clone()]).unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(convo.messages().len(), 2);
        assert_eq!(convo.messages()[0].id, user.id);
        assert_eq!(convo.messages()[1].parent_id, Some(user.id.clone()));

        let mut reply = confirmed(4, Role::Assistant, "hey");
        reply.parent_id = Some(user.id.clone());
        convo.merge_newest(vec![reply.clone()]).unwrap();
        assert_eq!(convo.messages(), &[user, reply]);
    }

    #[test]
    fn identical_texts_claim_the_placeholder_after_the_same_parent() {
        let mut convo = conversation();
        let first = confirmed(1, Role::User, "go");
        let mut answer = confirmed(2, Role::Assistant, "done");
        answer.parent_id = Some(first.id.clone());
        convo.merge_newest(vec![first.clone(), answer.clone()]).unwrap();

        let at = chrono::Utc.timestamp_opt(1_700_000_100, 0).single().unwrap();
        convo.splice_tail([
            Message::user_placeholder(
                MutationId(1),
                inbox(),
                Some(first.id.clone()),
                "ok".into(),
                Vec::new(),
                at,
            ),
            Message::user_placeholder(
                MutationId(2),
                inbox(),
                Some(answer.id.clone()),
                "ok".into(),
                Vec::new(),
                at,
            ),
        ]);

        let mut repeat = confirmed(3, Role::User, "ok");
        repeat.parent_id = Some(answer.id.clone());
        let report = convo.merge_newest(vec![repeat.clone()]).unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(convo.messages().len(), 4);
        assert_eq!(
            convo.messages()[2].id,
            MessageId::Pending {
                mutation: MutationId(1),
                role: Role::User
            }
        );
        assert_eq!(convo.messages()[3], repeat);
    }

    #[test]
    fn settle_running_tail_fails_empty_turns() {
        let mut convo = conversation();
        let at = chrono::Utc.timestamp_opt(1_700_000_100, 0).single().unwrap();
        convo.splice_tail([Message::assistant_placeholder(MutationId(1), inbox(), None, at)]);

        assert!(convo.settle_running_tail());
        assert_eq!(convo.tail().unwrap().status, MessageStatus::Failed);
        assert!(!convo.settle_running_tail());
    }
}

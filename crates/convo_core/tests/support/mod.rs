#![allow(dead_code)]

use std::sync::Once;

use chrono::TimeZone;
use convo_core::{
    hash_message, update, Cursor, Effect, Epoch, FetchRequest, HashInput, InboxId, JobId, Message,
    MessageId, MessageStatus, Msg, Page, Report, Role, SyncState, Timestamp,
};

pub const LOCAL_SENDER: &str = "@@localhost.shinkai/main";
pub const AGENT_SENDER: &str = "@@localhost.shinkai/main/agent/llama";

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(convo_logging::initialize_for_tests);
}

pub fn job_inbox(raw: &str) -> InboxId {
    InboxId::for_job(&JobId::new(raw).unwrap())
}

pub fn at(secs: i64) -> Timestamp {
    chrono::Utc
        .timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .unwrap()
}

pub fn remote_message(
    inbox: &InboxId,
    n: i64,
    role: Role,
    content: &str,
    parent: Option<&Message>,
) -> Message {
    let sender = match role {
        Role::User => LOCAL_SENDER,
        Role::Assistant => AGENT_SENDER,
    };
    let hash = hash_message(&HashInput {
        sender,
        content,
        timestamp: at(n),
        nonce: None,
    });
    Message {
        id: MessageId::Confirmed(hash),
        parent_id: parent.map(|parent| parent.id.clone()),
        inbox_id: inbox.clone(),
        role,
        content: content.to_string(),
        status: MessageStatus::Complete,
        created_at: at(n),
        attachments: Vec::new(),
        is_local: role == Role::User,
        branch_siblings: 0,
    }
}

/// Alternating user/assistant history `m1..=mN`, oldest first.
pub fn history(inbox: &InboxId, count: i64) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();
    for n in 1..=count {
        let role = if n % 2 == 1 { Role::User } else { Role::Assistant };
        let message = remote_message(inbox, n, role, &format!("m{n}"), messages.last());
        messages.push(message);
    }
    messages
}

/// In-memory stand-in for the remote message store.
#[derive(Debug, Clone)]
pub struct RemoteInbox {
    pub messages: Vec<Message>,
}

impl RemoteInbox {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Newest `limit` messages strictly older than `cursor`, oldest first.
    pub fn page(&self, cursor: Option<&Cursor>, limit: usize) -> Page {
        let end = match cursor {
            Some(cursor) => self
                .messages
                .iter()
                .position(|message| message.id.to_string() == cursor.as_str())
                .unwrap_or(0),
            None => self.messages.len(),
        };
        let start = end.saturating_sub(limit);
        let messages = self.messages[start..end].to_vec();
        let next_cursor = if messages.len() == limit {
            messages.first().map(|oldest| Cursor::new(oldest.id.to_string()))
        } else {
            None
        };
        Page {
            messages,
            next_cursor,
        }
    }
}

pub fn fetches(effects: &[Effect]) -> Vec<FetchRequest> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::FetchPage(request) => Some(request.clone()),
            _ => None,
        })
        .collect()
}

pub fn reports(effects: &[Effect]) -> Vec<Report> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Report(report) => Some(report.clone()),
            _ => None,
        })
        .collect()
}

pub fn scheduled_poll(effects: &[Effect]) -> Option<(Epoch, std::time::Duration)> {
    effects.iter().find_map(|effect| match effect {
        Effect::SchedulePoll { epoch, after, .. } => Some((*epoch, *after)),
        _ => None,
    })
}

/// Answers every fetch in `effects` from `remote`, including fetches the
/// answers trigger, and returns all effects produced along the way.
pub fn answer_fetches(state: &mut SyncState, remote: &RemoteInbox, effects: Vec<Effect>) -> Vec<Effect> {
    let mut produced = Vec::new();
    let mut queue = effects;
    while !queue.is_empty() {
        let mut next = Vec::new();
        for effect in queue {
            if let Effect::FetchPage(request) = &effect {
                let page = remote.page(request.cursor.as_ref(), request.limit);
                next.extend(
                    update(
                        state,
                        Msg::PageFetched {
                            ticket: request.ticket.clone(),
                            result: Ok(page),
                        },
                    )
                    .unwrap(),
                );
            }
            produced.push(effect);
        }
        queue = next;
    }
    produced
}

/// Sends `msg` and answers the fetches it triggers.
pub fn drive(state: &mut SyncState, remote: &RemoteInbox, msg: Msg) -> Vec<Effect> {
    let effects = update(state, msg).unwrap();
    answer_fetches(state, remote, effects)
}

pub fn messages(state: &SyncState, inbox: &InboxId) -> Vec<Message> {
    state.view(inbox).unwrap().messages
}

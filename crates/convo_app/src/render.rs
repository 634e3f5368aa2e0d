//! Plain-text rendering of a conversation view.

use std::collections::HashMap;

use convo_core::{ConversationView, Message, MessageStatus, Role, SyncHealth};

/// Prints only what changed since the last call.
#[derive(Debug, Default)]
pub struct Renderer {
    shown: HashMap<String, (MessageStatus, String)>,
    out_of_sync: bool,
    older_error: Option<String>,
}

impl Renderer {
    pub fn reset(&mut self) {
        self.shown.clear();
        self.out_of_sync = false;
        self.older_error = None;
    }

    pub fn render(&mut self, view: &ConversationView) -> Vec<String> {
        let mut lines = Vec::new();
        for message in &view.messages {
            let key = message.id.to_string();
            let state = (message.status, message.content.clone());
            if self.shown.get(&key) == Some(&state) {
                continue;
            }
            lines.push(format_message(message));
            self.shown.insert(key, state);
        }

        let out_of_sync = view.is_out_of_sync();
        if out_of_sync != self.out_of_sync {
            lines.push(match (&view.health, &view.poll_error) {
                (SyncHealth::OutOfSync { failures }, Some(error)) => {
                    format!("! out of sync after {failures} failed polls: {error}")
                }
                (SyncHealth::OutOfSync { failures }, None) => {
                    format!("! out of sync after {failures} failed polls")
                }
                _ => "! back in sync".to_string(),
            });
            self.out_of_sync = out_of_sync;
        }
        let older_error = view.older_error.as_ref().map(ToString::to_string);
        if older_error != self.older_error {
            if let Some(error) = &older_error {
                lines.push(format!("! could not load older messages: {error} (/older to retry)"));
            }
            self.older_error = older_error;
        }
        lines
    }
}

pub fn format_message(message: &Message) -> String {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let status = match message.status {
        MessageStatus::Pending => " [sending]",
        MessageStatus::Running if message.content.is_empty() => " [thinking]",
        MessageStatus::Running => " [typing]",
        MessageStatus::Complete => "",
        MessageStatus::Failed => " [failed, /retry to try again]",
    };
    let id = match message.id.confirmed() {
        Some(hash) => short(hash.as_str()),
        None => "pending".to_string(),
    };
    let mut line = format!("[{id}] {who}{status}: {}", message.content);
    if !message.attachments.is_empty() {
        let names: Vec<&str> = message
            .attachments
            .iter()
            .map(|attachment| attachment.name.as_str())
            .collect();
        line.push_str(&format!(" (attached: {})", names.join(", ")));
    }
    if message.branch_siblings > 0 {
        line.push_str(&format!(" (+{} alternatives)", message.branch_siblings));
    }
    line
}

fn short(hash: &str) -> String {
    hash.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use convo_core::{Attachment, InboxId, JobId, MessageHash, MessageId};
    use pretty_assertions::assert_eq;

    fn message(id: &str, role: Role, status: MessageStatus, content: &str) -> Message {
        Message {
            id: MessageId::Confirmed(MessageHash::parse(id).unwrap()),
            parent_id: None,
            inbox_id: InboxId::for_job(&JobId::new("42").unwrap()),
            role,
            content: content.into(),
            status,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
            attachments: Vec::new(),
            is_local: role == Role::User,
            branch_siblings: 0,
        }
    }

    #[test]
    fn messages_show_sender_status_and_attachments() {
        let mut question = message("ab", Role::User, MessageStatus::Complete, "see file");
        question.attachments.push(Attachment::named("notes.txt"));
        assert_eq!(
            format_message(&question),
            "[ab] you: see file (attached: notes.txt)"
        );
        assert_eq!(
            format_message(&message("cd", Role::Assistant, MessageStatus::Failed, "")),
            "[cd] assistant [failed, /retry to try again]: "
        );
    }

    #[test]
    fn unchanged_messages_are_not_printed_again() {
        let mut view = ConversationView {
            inbox: InboxId::for_job(&JobId::new("42").unwrap()),
            name: None,
            messages: vec![message("ab", Role::User, MessageStatus::Complete, "hi")],
            loading_older: false,
            refreshing: false,
            exhausted: true,
            stale: false,
            health: SyncHealth::InSync,
            older_error: None,
            poll_error: None,
            revision: 1,
        };
        let mut renderer = Renderer::default();
        assert_eq!(renderer.render(&view).len(), 1);
        assert!(renderer.render(&view).is_empty());

        view.messages
            .push(message("cd", Role::Assistant, MessageStatus::Complete, "hello"));
        assert_eq!(renderer.render(&view), vec!["[cd] assistant: hello".to_string()]);
    }
}

use crate::conversation::Conversation;
use crate::polling::SyncHealth;
use crate::{InboxId, Message, RemoteFailure, SyncSettings};

/// Read-only snapshot of one cached conversation for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    pub inbox: InboxId,
    pub name: Option<String>,
    pub messages: Vec<Message>,
    pub loading_older: bool,
    pub refreshing: bool,
    pub exhausted: bool,
    pub stale: bool,
    pub health: SyncHealth,
    /// Failure of the last `load_older`, shown next to the history.
    pub older_error: Option<RemoteFailure>,
    /// Only set once polling is out of sync.
    pub poll_error: Option<RemoteFailure>,
    pub revision: u64,
}

impl ConversationView {
    pub(crate) fn build(
        conversation: &Conversation,
        name: Option<String>,
        settings: &SyncSettings,
    ) -> Self {
        let threshold = settings.out_of_sync_threshold;
        Self {
            inbox: conversation.inbox_id().clone(),
            name,
            messages: conversation.messages().to_vec(),
            loading_older: conversation.is_loading_older(),
            refreshing: conversation.is_refreshing(),
            exhausted: conversation.is_exhausted(),
            stale: conversation.is_stale(),
            health: conversation.health(threshold),
            older_error: conversation.older_error().cloned(),
            poll_error: conversation.visible_poll_error(threshold).cloned(),
            revision: conversation.revision(),
        }
    }

    pub fn is_out_of_sync(&self) -> bool {
        matches!(self.health, SyncHealth::OutOfSync { .. })
    }
}

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::conversation::{Conversation, Epoch};
use crate::invalidation::CacheNamespace;
use crate::mutation::PendingSend;
use crate::view_model::ConversationView;
use crate::{InboxId, Message, MutationId, SyncSettings};

/// Session-wide cache context. Constructed explicitly and handed to whoever
/// drives [`crate::update`]; there is no process-wide instance.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    settings: SyncSettings,
    conversations: HashMap<InboxId, Conversation>,
    pending: BTreeMap<MutationId, PendingSend>,
    /// Histories copied from a fork source, waiting for their first subscriber.
    seeds: HashMap<InboxId, Vec<Message>>,
    inbox_names: HashMap<InboxId, String>,
    stale_namespaces: HashSet<CacheNamespace>,
    next_epoch: u64,
    next_seq: u64,
    next_mutation: u64,
}

impl SyncState {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn conversation(&self, inbox: &InboxId) -> Option<&Conversation> {
        self.conversations.get(inbox)
    }

    pub fn is_subscribed(&self, inbox: &InboxId) -> bool {
        self.conversations.contains_key(inbox)
    }

    pub fn view(&self, inbox: &InboxId) -> Option<ConversationView> {
        let conversation = self.conversations.get(inbox)?;
        Some(ConversationView::build(
            conversation,
            self.inbox_names.get(inbox).cloned(),
            &self.settings,
        ))
    }

    /// Custom name patched in by a rename.
    pub fn inbox_name(&self, inbox: &InboxId) -> Option<&str> {
        self.inbox_names.get(inbox).map(String::as_str)
    }

    pub fn is_stale(&self, namespace: &CacheNamespace) -> bool {
        match namespace {
            CacheNamespace::Conversation(inbox) => self
                .conversations
                .get(inbox)
                .is_some_and(Conversation::is_stale),
            other => self.stale_namespaces.contains(other),
        }
    }

    /// Called by whoever refetched a listing namespace.
    pub fn mark_fresh(&mut self, namespace: &CacheNamespace) {
        self.stale_namespaces.remove(namespace);
    }

    pub fn pending(&self, mutation: MutationId) -> Option<&PendingSend> {
        self.pending.get(&mutation)
    }

    pub fn seed(&self, inbox: &InboxId) -> Option<&[Message]> {
        self.seeds.get(inbox).map(Vec::as_slice)
    }

    pub(crate) fn conversation_mut(&mut self, inbox: &InboxId) -> Option<&mut Conversation> {
        self.conversations.get_mut(inbox)
    }

    pub(crate) fn insert_conversation(&mut self, conversation: Conversation) {
        self.conversations
            .insert(conversation.inbox_id().clone(), conversation);
    }

    pub(crate) fn remove_conversation(&mut self, inbox: &InboxId) -> Option<Conversation> {
        self.conversations.remove(inbox)
    }

    pub(crate) fn take_seed(&mut self, inbox: &InboxId) -> Option<Vec<Message>> {
        self.seeds.remove(inbox)
    }

    pub(crate) fn store_seed(&mut self, inbox: InboxId, seed: Vec<Message>) {
        self.seeds.insert(inbox, seed);
    }

    pub(crate) fn insert_pending(&mut self, pending: PendingSend) {
        self.pending.insert(pending.id, pending);
    }

    pub(crate) fn take_pending(&mut self, mutation: MutationId) -> Option<PendingSend> {
        self.pending.remove(&mutation)
    }

    pub(crate) fn drop_pending_for(&mut self, inbox: &InboxId) {
        self.pending.retain(|_, pending| &pending.inbox != inbox);
    }

    /// Mutations still waiting for the remote in `inbox`.
    pub(crate) fn outstanding(&self, inbox: &InboxId) -> HashSet<MutationId> {
        self.pending
            .values()
            .filter(|pending| &pending.inbox == inbox)
            .map(|pending| pending.id)
            .collect()
    }

    pub(crate) fn mark_namespace_stale(&mut self, namespace: CacheNamespace) {
        self.stale_namespaces.insert(namespace);
    }

    pub(crate) fn set_inbox_name(&mut self, inbox: InboxId, name: String) {
        self.inbox_names.insert(inbox, name);
    }

    pub(crate) fn forget_inbox(&mut self, inbox: &InboxId) {
        self.inbox_names.remove(inbox);
        self.seeds.remove(inbox);
        self.stale_namespaces
            .remove(&CacheNamespace::AttachmentListing(inbox.clone()));
    }

    pub(crate) fn next_epoch(&mut self) -> Epoch {
        self.next_epoch += 1;
        Epoch(self.next_epoch)
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub(crate) fn next_mutation(&mut self) -> MutationId {
        self.next_mutation += 1;
        MutationId(self.next_mutation)
    }
}

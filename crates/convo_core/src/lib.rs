//! Conversation sync core: identity codec, cached conversations, optimistic
//! mutations, polling and cache invalidation as a pure `update` reducer.
mod conversation;
mod effect;
mod error;
mod identity;
mod invalidation;
mod model;
mod msg;
mod mutation;
mod polling;
mod settings;
mod state;
mod update;
mod view_model;

pub use conversation::{
    Conversation, ConversationKind, ConversationSnapshot, Epoch, FetchPurpose, FetchRequest,
    FetchTicket, MergeReport, PageRecord,
};
pub use effect::{Effect, Operation, Report, SkipReason};
pub use error::{FailureKind, RemoteFailure, SyncError};
pub use identity::{
    hash_message, HashInput, IdentityError, InboxId, InboxKind, JobId, MessageHash, MessageId,
    MutationId,
};
pub use invalidation::{route, CacheAction, CacheNamespace, CachePatch, SettledMutation};
pub use model::{Attachment, Cursor, Message, MessageStatus, Page, Role, Timestamp};
pub use msg::Msg;
pub use mutation::{PendingSend, SendEvent, SendKind, SendPhase, SendReceipt, SendRequest};
pub use polling::{backoff_interval, decide as poll_decision, PollDecision, SyncHealth};
pub use settings::SyncSettings;
pub use state::SyncState;
pub use update::update;
pub use view_model::ConversationView;

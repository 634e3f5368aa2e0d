use convo_logging::{convo_debug, convo_error, convo_info, convo_warn};

use crate::conversation::{Conversation, ConversationKind, FetchPurpose, FetchTicket, OlderStart, PageApplied};
use crate::effect::{Operation, Report, SkipReason};
use crate::invalidation::{route, CacheAction, CacheNamespace, CachePatch, SettledMutation};
use crate::mutation::{PendingSend, SendEvent, SendKind, SendReceipt, SendRequest};
use crate::polling::{self, PollDecision};
use crate::{
    Attachment, Effect, InboxId, JobId, Message, MessageHash, MessageId, MessageStatus, Msg,
    MutationId, Page, RemoteFailure, Role, SyncError, SyncState, Timestamp,
};

/// Applies one message to the cache and returns the effects to run.
///
/// Each call runs to completion before the next one starts, so two updates to
/// the same inbox never interleave. Network trouble arrives as data inside
/// `Msg` and ends up in state or in a [`Report`]; only caller misuse and
/// invariant violations come back as `Err`.
pub fn update(state: &mut SyncState, msg: Msg) -> Result<Vec<Effect>, SyncError> {
    let mut effects = Vec::new();
    match msg {
        Msg::Subscribed { inbox, kind } => subscribe(state, inbox, kind, &mut effects),
        Msg::Unsubscribed { inbox } => unsubscribe(state, &inbox, &mut effects),
        Msg::LoadOlderRequested { inbox } => load_older(state, &inbox, &mut effects)?,
        Msg::RefreshRequested { inbox } => {
            require(state, &inbox)?;
            start_newest(state, &inbox, &mut effects);
        }
        Msg::Read { inbox } => {
            require(state, &inbox)?;
            read(state, &inbox, &mut effects);
        }
        Msg::PageFetched { ticket, result } => page_fetched(state, ticket, result, &mut effects)?,
        Msg::SendRequested {
            inbox,
            content,
            attachments,
            at,
        } => send(state, inbox, content, attachments, at, &mut effects)?,
        Msg::RetryRequested {
            inbox,
            message_id,
            at,
        } => retry(state, inbox, message_id, at, &mut effects)?,
        Msg::SendSettled { mutation, result } => {
            send_settled(state, mutation, result, &mut effects)?
        }
        Msg::ForkRequested { inbox, message_id } => {
            let job_id = job_of(&inbox)?;
            let target = MessageId::Confirmed(message_id.clone());
            if require(state, &inbox)?.find(&target).is_none() {
                return Err(SyncError::UnknownMessage {
                    inbox,
                    message: target,
                });
            }
            effects.push(Effect::ForkJob {
                source: inbox,
                job_id,
                message_id,
            });
        }
        Msg::ForkSettled {
            source,
            message_id,
            result,
        } => fork_settled(state, source, &message_id, result, &mut effects),
        Msg::KillRequested { inbox } => {
            job_of(&inbox)?;
            effects.push(Effect::KillJob { inbox });
        }
        Msg::KillSettled { inbox, result } => match result {
            Ok(()) => {
                if let Some(conversation) = state.conversation_mut(&inbox) {
                    conversation.settle_running_tail();
                }
                apply_actions(
                    state,
                    route(&SettledMutation::Kill {
                        inbox: inbox.clone(),
                    }),
                    &mut effects,
                );
                reschedule_poll(state, &inbox, &mut effects);
                effects.push(Effect::Report(Report::Killed { inbox }));
            }
            Err(failure) => mutation_failed(inbox, Operation::Kill, failure, &mut effects),
        },
        Msg::RenameRequested { inbox, name } => {
            effects.push(Effect::RenameInbox { inbox, name });
        }
        Msg::RenameSettled {
            inbox,
            name,
            result,
        } => match result {
            Ok(()) => {
                apply_actions(
                    state,
                    route(&SettledMutation::Rename {
                        inbox: inbox.clone(),
                        name: name.clone(),
                    }),
                    &mut effects,
                );
                effects.push(Effect::Report(Report::Renamed { inbox, name }));
            }
            Err(failure) => mutation_failed(inbox, Operation::Rename, failure, &mut effects),
        },
        Msg::RemoveRequested { inbox } => {
            let job_id = job_of(&inbox)?;
            effects.push(Effect::RemoveJob { inbox, job_id });
        }
        Msg::RemoveSettled { inbox, result } => match result {
            Ok(()) => {
                apply_actions(
                    state,
                    route(&SettledMutation::Remove {
                        inbox: inbox.clone(),
                    }),
                    &mut effects,
                );
                effects.push(Effect::Report(Report::Removed { inbox }));
            }
            Err(failure) => mutation_failed(inbox, Operation::Remove, failure, &mut effects),
        },
        Msg::PollTick { inbox, epoch } => {
            let due = match state.conversation(&inbox) {
                Some(conversation) if conversation.epoch() == epoch => {
                    conversation.is_stale()
                        || matches!(
                            polling::decide(conversation, state.settings()),
                            PollDecision::Scheduled(_)
                        )
                }
                _ => {
                    convo_debug!("Ignoring poll tick for {inbox} from an ended subscription");
                    return Ok(effects);
                }
            };
            if let Some(conversation) = state.conversation_mut(&inbox) {
                conversation.set_poll_scheduled(false);
            }
            if due {
                start_newest(state, &inbox, &mut effects);
            }
        }
        Msg::StreamChunk { inbox, text } => {
            if require_mut(state, &inbox)?.append_stream_chunk(&text) {
                reschedule_poll(state, &inbox, &mut effects);
            } else {
                convo_debug!("Ignoring stream chunk for {inbox}: no running assistant turn");
            }
        }
        Msg::StreamFinished { inbox } => require_mut(state, &inbox)?.mark_stale(),
    }
    Ok(effects)
}

fn require<'a>(state: &'a SyncState, inbox: &InboxId) -> Result<&'a Conversation, SyncError> {
    state
        .conversation(inbox)
        .ok_or_else(|| SyncError::NotSubscribed(inbox.clone()))
}

fn require_mut<'a>(
    state: &'a mut SyncState,
    inbox: &InboxId,
) -> Result<&'a mut Conversation, SyncError> {
    state
        .conversation_mut(inbox)
        .ok_or_else(|| SyncError::NotSubscribed(inbox.clone()))
}

fn job_of(inbox: &InboxId) -> Result<JobId, SyncError> {
    inbox
        .job_id()
        .cloned()
        .ok_or_else(|| SyncError::NotAJobInbox(inbox.clone()))
}

fn subscribe(
    state: &mut SyncState,
    inbox: InboxId,
    kind: ConversationKind,
    effects: &mut Vec<Effect>,
) {
    if let Some(conversation) = state.conversation_mut(&inbox) {
        conversation.add_subscriber();
    } else {
        let epoch = state.next_epoch();
        let conversation = match state.take_seed(&inbox) {
            Some(seed) => Conversation::from_seed(inbox.clone(), kind, epoch, seed),
            None => Conversation::new(inbox.clone(), kind, epoch),
        };
        convo_debug!("Subscribed to {inbox} (epoch {})", epoch.0);
        state.insert_conversation(conversation);
    }
    read(state, &inbox, effects);
}

fn unsubscribe(state: &mut SyncState, inbox: &InboxId, effects: &mut Vec<Effect>) {
    let last = match state.conversation_mut(inbox) {
        Some(conversation) => conversation.remove_subscriber(),
        None => return,
    };
    if last {
        state.remove_conversation(inbox);
        convo_debug!("Last subscriber left {inbox}; dropping its cache");
        effects.push(Effect::CancelPoll {
            inbox: inbox.clone(),
        });
        effects.push(Effect::CancelFetches {
            inbox: inbox.clone(),
        });
    }
}

/// A stale conversation refetches its newest page when it is read.
fn read(state: &mut SyncState, inbox: &InboxId, effects: &mut Vec<Effect>) {
    if state.conversation(inbox).is_some_and(Conversation::is_stale) {
        start_newest(state, inbox, effects);
    }
}

fn start_newest(state: &mut SyncState, inbox: &InboxId, effects: &mut Vec<Effect>) {
    let seq = state.next_seq();
    let limit = state.settings().page_limit;
    if let Some(request) = state
        .conversation_mut(inbox)
        .and_then(|conversation| conversation.start_newest_fetch(seq, limit))
    {
        effects.push(Effect::FetchPage(request));
    }
}

fn load_older(
    state: &mut SyncState,
    inbox: &InboxId,
    effects: &mut Vec<Effect>,
) -> Result<(), SyncError> {
    if !require(state, inbox)?.pages().is_empty() {
        read(state, inbox, effects);
    }
    let seq = state.next_seq();
    let limit = state.settings().page_limit;
    let reason = match require_mut(state, inbox)?.start_older_fetch(seq, limit) {
        OlderStart::Fetch(request) => {
            effects.push(Effect::FetchPage(request));
            return Ok(());
        }
        OlderStart::InFlight => SkipReason::InFlight,
        OlderStart::Exhausted => SkipReason::Exhausted,
    };
    effects.push(Effect::Report(Report::LoadOlderSkipped {
        inbox: inbox.clone(),
        reason,
    }));
    Ok(())
}

fn page_fetched(
    state: &mut SyncState,
    ticket: FetchTicket,
    result: Result<Page, RemoteFailure>,
    effects: &mut Vec<Effect>,
) -> Result<(), SyncError> {
    let threshold = state.settings().out_of_sync_threshold;
    let inbox = ticket.inbox.clone();
    let Some(conversation) = state.conversation_mut(&inbox) else {
        convo_debug!("Discarding page for {inbox}: no longer subscribed");
        effects.push(Effect::Report(Report::PageDiscarded { inbox }));
        return Ok(());
    };

    match result {
        Ok(page) => match conversation.apply_page(&ticket, page) {
            Ok(PageApplied::Applied { added, exhausted }) => {
                effects.push(Effect::Report(Report::PageApplied {
                    inbox: inbox.clone(),
                    purpose: ticket.purpose,
                    added,
                    exhausted,
                }));
            }
            Ok(PageApplied::Discarded) => {
                effects.push(Effect::Report(Report::PageDiscarded { inbox }));
                return Ok(());
            }
            Err(err) => {
                convo_error!("Rejected page for {inbox}: {err}");
                return Err(err);
            }
        },
        Err(failure) => {
            if !conversation.record_fetch_failure(&ticket, failure.clone()) {
                effects.push(Effect::Report(Report::PageDiscarded { inbox }));
                return Ok(());
            }
            let failures = conversation.poll_failures();
            if ticket.purpose == FetchPurpose::Newest && failures < threshold {
                convo_debug!("Poll of {inbox} failed ({failures} in a row): {failure}");
            } else {
                convo_warn!("Fetching {:?} page of {inbox} failed: {failure}", ticket.purpose);
            }
            effects.push(Effect::Report(Report::FetchFailed {
                inbox: inbox.clone(),
                purpose: ticket.purpose,
                failure,
            }));
        }
    }

    reschedule_poll(state, &inbox, effects);
    Ok(())
}

fn send(
    state: &mut SyncState,
    inbox: InboxId,
    content: String,
    attachments: Vec<Attachment>,
    at: Timestamp,
    effects: &mut Vec<Effect>,
) -> Result<(), SyncError> {
    let job_id = job_of(&inbox)?;
    let pair = state.settings().pair_assistant_placeholder;
    let mutation = state.next_mutation();
    let conversation = require_mut(state, &inbox)?;

    let parent = conversation.last_confirmed().cloned();
    let pending = PendingSend::apply(
        mutation,
        inbox.clone(),
        SendKind::Message,
        content.clone(),
        attachments.clone(),
        conversation.snapshot(),
    )?;

    let user = Message::user_placeholder(
        mutation,
        inbox.clone(),
        parent.clone().map(MessageId::from),
        content.clone(),
        attachments.clone(),
        at,
    );
    let mut placeholders = vec![user];
    if pair {
        placeholders.push(Message::assistant_placeholder(
            mutation,
            inbox.clone(),
            Some(MessageId::Pending {
                mutation,
                role: Role::User,
            }),
            at,
        ));
    }
    conversation.splice_tail(placeholders);
    state.insert_pending(pending);

    effects.push(Effect::SendMessage {
        mutation,
        request: SendRequest {
            inbox,
            job_id,
            content,
            parent,
            attachments,
        },
    });
    Ok(())
}

fn retry(
    state: &mut SyncState,
    inbox: InboxId,
    message_id: MessageHash,
    at: Timestamp,
    effects: &mut Vec<Effect>,
) -> Result<(), SyncError> {
    job_of(&inbox)?;
    let mutation = state.next_mutation();
    let outstanding = state.outstanding(&inbox);
    let conversation = require_mut(state, &inbox)?;

    let target_id = MessageId::Confirmed(message_id.clone());
    let Some(target) = conversation.find(&target_id) else {
        return Err(SyncError::UnknownMessage {
            inbox,
            message: target_id,
        });
    };
    // The new turn answers the same prompt the retried one did.
    let parent = match target.role {
        Role::Assistant => target.parent_id.clone(),
        Role::User => Some(target_id),
    };

    let pending = PendingSend::apply(
        mutation,
        inbox.clone(),
        SendKind::Retry {
            target: message_id.clone(),
        },
        String::new(),
        Vec::new(),
        conversation.snapshot(),
    )?;
    conversation.drop_dead_placeholders(&outstanding);
    conversation.splice_tail([Message::assistant_placeholder(
        mutation,
        inbox.clone(),
        parent,
        at,
    )]);
    state.insert_pending(pending);

    effects.push(Effect::RetryMessage {
        mutation,
        inbox,
        message_id,
    });
    Ok(())
}

fn send_settled(
    state: &mut SyncState,
    mutation: MutationId,
    result: Result<SendReceipt, RemoteFailure>,
    effects: &mut Vec<Effect>,
) -> Result<(), SyncError> {
    let mut pending = state
        .take_pending(mutation)
        .ok_or(SyncError::UnknownMutation(mutation))?;
    let inbox = pending.inbox.clone();

    match result {
        Ok(receipt) => {
            pending.settle(SendEvent::Succeed)?;
            if let (SendKind::Message, Some(conversation)) =
                (&pending.kind, state.conversation_mut(&inbox))
            {
                let confirmed = Message {
                    id: MessageId::Confirmed(receipt.message_id.clone()),
                    parent_id: receipt.parent_message_id.clone().map(MessageId::from),
                    inbox_id: inbox.clone(),
                    role: Role::User,
                    content: pending.content.clone(),
                    status: MessageStatus::Complete,
                    created_at: receipt.scheduled_time,
                    attachments: pending.attachments.clone(),
                    is_local: true,
                    branch_siblings: 0,
                };
                let placeholder = MessageId::Pending {
                    mutation,
                    role: Role::User,
                };
                if let Err(err) = conversation.confirm_placeholder(&placeholder, confirmed) {
                    convo_error!("Commit of {mutation} in {inbox} collided: {err}");
                    return Err(err);
                }
            }

            let job = job_of(&inbox)?;
            let with_attachments = !pending.attachments.is_empty();
            let settled = match pending.kind {
                SendKind::Message => SettledMutation::Send {
                    inbox: inbox.clone(),
                    job,
                    with_attachments,
                },
                SendKind::Retry { .. } => SettledMutation::Retry {
                    inbox: inbox.clone(),
                    job,
                    with_attachments,
                },
            };
            apply_actions(state, route(&settled), effects);
            effects.push(Effect::Report(Report::SendCommitted {
                inbox: inbox.clone(),
                mutation,
                message_id: receipt.message_id,
            }));
        }
        Err(failure) => {
            pending.settle(SendEvent::Fail)?;
            let outstanding = state.outstanding(&inbox);
            let lagging = match state.conversation_mut(&inbox) {
                Some(conversation) => {
                    let lagging = conversation.restore(pending.snapshot.clone(), &outstanding);
                    if lagging {
                        conversation.mark_stale();
                    }
                    lagging
                }
                None => false,
            };
            convo_warn!("Rolled back {mutation} in {inbox}: {failure}");

            let previews = pending.previews();
            if !previews.is_empty() {
                effects.push(Effect::ReleasePreviews(previews));
            }
            effects.push(Effect::Report(Report::SendRolledBack {
                inbox: inbox.clone(),
                mutation,
                failure,
            }));
            if lagging {
                read(state, &inbox, effects);
            }
        }
    }

    reschedule_poll(state, &inbox, effects);
    Ok(())
}

fn fork_settled(
    state: &mut SyncState,
    source: InboxId,
    message_id: &MessageHash,
    result: Result<JobId, RemoteFailure>,
    effects: &mut Vec<Effect>,
) {
    let job = match result {
        Ok(job) => job,
        Err(failure) => return mutation_failed(source, Operation::Fork, failure, effects),
    };
    let forked = InboxId::for_job(&job);

    let seed = state
        .conversation(&source)
        .and_then(|conversation| conversation.prefix_through(message_id));
    if let Some(mut seed) = seed {
        for message in &mut seed {
            message.inbox_id = forked.clone();
        }
        state.store_seed(forked.clone(), seed);
    }

    apply_actions(
        state,
        route(&SettledMutation::Fork {
            source: source.clone(),
            forked: forked.clone(),
        }),
        effects,
    );
    convo_info!("Forked {source} at {message_id} into {forked}");
    effects.push(Effect::Report(Report::Forked { source, forked }));
}

fn mutation_failed(
    inbox: InboxId,
    operation: Operation,
    failure: RemoteFailure,
    effects: &mut Vec<Effect>,
) {
    convo_warn!("{operation:?} on {inbox} failed: {failure}");
    effects.push(Effect::Report(Report::MutationFailed {
        inbox,
        operation,
        failure,
    }));
}

fn apply_actions(state: &mut SyncState, actions: Vec<CacheAction>, effects: &mut Vec<Effect>) {
    for action in actions {
        match action {
            CacheAction::Invalidate(CacheNamespace::Conversation(inbox)) => {
                if let Some(conversation) = state.conversation_mut(&inbox) {
                    conversation.mark_stale();
                }
            }
            CacheAction::Invalidate(namespace) => state.mark_namespace_stale(namespace),
            CacheAction::Patch(CachePatch::InboxName { inbox, name }) => {
                state.set_inbox_name(inbox, name);
            }
            CacheAction::Evict(CacheNamespace::Conversation(inbox)) => {
                if state.remove_conversation(&inbox).is_some() {
                    effects.push(Effect::CancelPoll {
                        inbox: inbox.clone(),
                    });
                    effects.push(Effect::CancelFetches {
                        inbox: inbox.clone(),
                    });
                }
                state.drop_pending_for(&inbox);
                state.forget_inbox(&inbox);
                convo_info!("Evicted cache of {inbox}");
            }
            CacheAction::Evict(namespace) => state.mark_namespace_stale(namespace),
        }
    }
}

/// Re-evaluates polling after a fetch or a mutation settled.
fn reschedule_poll(state: &mut SyncState, inbox: &InboxId, effects: &mut Vec<Effect>) {
    let Some(decision) = state
        .conversation(inbox)
        .map(|conversation| polling::decide(conversation, state.settings()))
    else {
        return;
    };
    let Some(conversation) = state.conversation_mut(inbox) else {
        return;
    };
    match decision {
        PollDecision::Scheduled(after) => {
            // An outstanding newest fetch reschedules when it lands.
            if conversation.poll_scheduled() || conversation.is_refreshing() {
                return;
            }
            conversation.set_poll_scheduled(true);
            effects.push(Effect::SchedulePoll {
                inbox: inbox.clone(),
                epoch: conversation.epoch(),
                after,
            });
        }
        PollDecision::Idle => {
            if conversation.poll_scheduled() {
                conversation.set_poll_scheduled(false);
                effects.push(Effect::CancelPoll {
                    inbox: inbox.clone(),
                });
            }
        }
    }
}

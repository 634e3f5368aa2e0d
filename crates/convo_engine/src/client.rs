//! Runs the core reducer against a real transport.
//!
//! Every update step locks the state, applies one `Msg` and releases the lock
//! before any effect is awaited, so steps never interleave. Remote calls run
//! inline in the caller's future; poll timers run on spawned tasks.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use convo_core::{
    update, Attachment, ConversationKind, ConversationView, Effect, Epoch, InboxId, MessageHash,
    Msg, Report, RemoteFailure, SyncError, SyncSettings, SyncState,
};
use convo_logging::{convo_debug, convo_error, convo_trace, convo_warn};
use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{LocalIdentity, PageFetcher, SessionError, Transport};

/// Releases local preview handles of attachments whose send rolled back.
pub trait PreviewReleaser: Send + Sync {
    fn release(&self, previews: &[Attachment]);
}

/// Treats previews as temporary files and deletes them.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemovePreviewFiles;

impl PreviewReleaser for RemovePreviewFiles {
    fn release(&self, previews: &[Attachment]) {
        for preview in previews.iter().filter_map(|attachment| attachment.preview.as_deref()) {
            if let Err(err) = std::fs::remove_file(preview) {
                convo_warn!("Could not release preview {preview}: {err}");
            }
        }
    }
}

struct Inner {
    state: Mutex<SyncState>,
    fetcher: PageFetcher,
    transport: Arc<dyn Transport>,
    previews: Arc<dyn PreviewReleaser>,
    polls: Mutex<HashMap<InboxId, CancellationToken>>,
    fetches: Mutex<HashMap<InboxId, CancellationToken>>,
    changes: watch::Sender<u64>,
}

/// Session-scoped sync context. Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<Inner>,
}

impl SyncClient {
    pub fn new(transport: Arc<dyn Transport>, identity: LocalIdentity, settings: SyncSettings) -> Self {
        Self::with_previews(transport, identity, settings, Arc::new(RemovePreviewFiles))
    }

    pub fn with_previews(
        transport: Arc<dyn Transport>,
        identity: LocalIdentity,
        settings: SyncSettings,
        previews: Arc<dyn PreviewReleaser>,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SyncState::new(settings)),
                fetcher: PageFetcher::new(Arc::clone(&transport), identity),
                transport,
                previews,
                polls: Mutex::new(HashMap::new()),
                fetches: Mutex::new(HashMap::new()),
                changes,
            }),
        }
    }

    /// Starts watching `inbox`. A stale or fork-seeded cache fetches right away.
    pub async fn subscribe(
        &self,
        inbox: InboxId,
        kind: ConversationKind,
    ) -> Result<Subscription, SessionError> {
        dispatch(
            Arc::clone(&self.inner),
            Msg::Subscribed {
                inbox: inbox.clone(),
                kind,
            },
        )
        .await?;
        Ok(Subscription {
            inner: Arc::clone(&self.inner),
            inbox,
            active: true,
        })
    }

    /// Read access to the whole cache, e.g. for listing staleness.
    pub fn with_state<R>(&self, read: impl FnOnce(&SyncState) -> R) -> R {
        read(&*self.inner.lock_state())
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn step(&self, msg: Msg) -> Result<Vec<Effect>, SyncError> {
        let effects = update(&mut self.lock_state(), msg)?;
        self.changes.send_modify(|revision| *revision += 1);
        Ok(effects)
    }

    fn fetch_token(&self, inbox: &InboxId) -> CancellationToken {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(inbox.clone())
            .or_default()
            .clone()
    }

    fn cancel_fetches(&self, inbox: &InboxId) {
        let token = self
            .fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(inbox);
        if let Some(token) = token {
            token.cancel();
        }
    }

    fn cancel_poll(&self, inbox: &InboxId) {
        let token = self
            .polls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(inbox);
        if let Some(token) = token {
            convo_trace!("Cancelled poll timer of {inbox}");
            token.cancel();
        }
    }

    fn schedule_poll(self: &Arc<Self>, inbox: InboxId, epoch: Epoch, after: Duration) {
        let token = CancellationToken::new();
        let previous = self
            .polls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(inbox.clone(), token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        convo_trace!("Polling {inbox} in {after:?}");
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(after) => {}
                () = token.cancelled() => return,
            }
            if let Err(err) = dispatch(inner, Msg::PollTick { inbox, epoch }).await {
                convo_error!("Poll step failed: {err}");
            }
        });
    }

    /// Effects that never wait on anything.
    fn apply_local(&self, effect: &Effect) {
        match effect {
            Effect::CancelPoll { inbox } => self.cancel_poll(inbox),
            Effect::CancelFetches { inbox } => self.cancel_fetches(inbox),
            Effect::ReleasePreviews(previews) => self.previews.release(previews),
            _ => {}
        }
    }
}

/// Applies `msg` and runs what it asks for, feeding outcomes back in until the
/// chain settles. Returns every report the chain produced.
fn dispatch(inner: Arc<Inner>, msg: Msg) -> BoxFuture<'static, Result<Vec<Report>, SyncError>> {
    async move {
        let effects = inner.step(msg)?;
        let mut reports = Vec::new();
        for effect in effects {
            reports.extend(run_effect(&inner, effect).await?);
        }
        Ok(reports)
    }
    .boxed()
}

async fn run_effect(inner: &Arc<Inner>, effect: Effect) -> Result<Vec<Report>, SyncError> {
    let next = match effect {
        Effect::FetchPage(request) => {
            let inbox = request.ticket.inbox.clone();
            let token = inner.fetch_token(&inbox);
            let result = tokio::select! {
                result = inner.fetcher.fetch_page(&inbox, request.cursor.as_ref(), request.limit) => result,
                () = token.cancelled() => {
                    convo_debug!("Fetch for {inbox} cancelled");
                    return Ok(Vec::new());
                }
            };
            Msg::PageFetched {
                ticket: request.ticket,
                result: result.map_err(RemoteFailure::from),
            }
        }
        Effect::SendMessage { mutation, request } => Msg::SendSettled {
            mutation,
            result: inner
                .transport
                .send_message(&request)
                .await
                .map_err(RemoteFailure::from),
        },
        Effect::RetryMessage {
            mutation,
            inbox,
            message_id,
        } => Msg::SendSettled {
            mutation,
            result: inner
                .transport
                .retry_message(&inbox, &message_id)
                .await
                .map_err(RemoteFailure::from),
        },
        Effect::ForkJob {
            source,
            job_id,
            message_id,
        } => {
            let result = inner
                .transport
                .fork_job(&job_id, &message_id)
                .await
                .map_err(RemoteFailure::from);
            Msg::ForkSettled {
                source,
                message_id,
                result,
            }
        }
        Effect::KillJob { inbox } => {
            let result = inner.transport.kill_job(&inbox).await.map_err(RemoteFailure::from);
            Msg::KillSettled { inbox, result }
        }
        Effect::RenameInbox { inbox, name } => {
            let result = inner
                .transport
                .rename_inbox(&inbox, &name)
                .await
                .map_err(RemoteFailure::from);
            Msg::RenameSettled {
                inbox,
                name,
                result,
            }
        }
        Effect::RemoveJob { inbox, job_id } => {
            let result = inner.transport.remove_job(&job_id).await.map_err(RemoteFailure::from);
            Msg::RemoveSettled { inbox, result }
        }
        Effect::SchedulePoll {
            inbox,
            epoch,
            after,
        } => {
            inner.schedule_poll(inbox, epoch, after);
            return Ok(Vec::new());
        }
        Effect::Report(report) => return Ok(vec![report]),
        local => {
            inner.apply_local(&local);
            return Ok(Vec::new());
        }
    };
    dispatch(Arc::clone(inner), next).await
}

/// A view's handle on one inbox. Dropping it unsubscribes.
pub struct Subscription {
    inner: Arc<Inner>,
    inbox: InboxId,
    active: bool,
}

impl Subscription {
    pub fn inbox(&self) -> &InboxId {
        &self.inbox
    }

    /// Current view without triggering a refetch. `None` once the inbox was removed.
    pub fn snapshot(&self) -> Option<ConversationView> {
        self.inner.lock_state().view(&self.inbox)
    }

    /// Reads the view the way a renderer does: a stale cache refetches first.
    pub async fn read(&self) -> Result<ConversationView, SessionError> {
        self.run(Msg::Read {
            inbox: self.inbox.clone(),
        })
        .await?;
        self.snapshot().ok_or(SessionError::Closed)
    }

    /// Bumped after every applied update step of the session.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    /// Fetch failures end up in the view rather than in the result.
    pub async fn load_older(&self) -> Result<(), SessionError> {
        self.run(Msg::LoadOlderRequested {
            inbox: self.inbox.clone(),
        })
        .await
        .map(drop)
    }

    pub async fn refresh(&self) -> Result<(), SessionError> {
        self.run(Msg::RefreshRequested {
            inbox: self.inbox.clone(),
        })
        .await
        .map(drop)
    }

    /// Sends optimistically and resolves once the remote accepted or refused.
    pub async fn send(
        &self,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<MessageHash, SessionError> {
        let reports = self
            .run(Msg::SendRequested {
                inbox: self.inbox.clone(),
                content: content.into(),
                attachments,
                at: Utc::now(),
            })
            .await?;
        send_outcome(reports)
    }

    /// Re-issues the assistant turn of `message_id`.
    pub async fn retry(&self, message_id: MessageHash) -> Result<MessageHash, SessionError> {
        let reports = self
            .run(Msg::RetryRequested {
                inbox: self.inbox.clone(),
                message_id,
                at: Utc::now(),
            })
            .await?;
        send_outcome(reports)
    }

    /// Returns the inbox of the new job; subscribe to it to navigate there.
    pub async fn fork(&self, message_id: MessageHash) -> Result<InboxId, SessionError> {
        let reports = self
            .run(Msg::ForkRequested {
                inbox: self.inbox.clone(),
                message_id,
            })
            .await?;
        reports
            .into_iter()
            .find_map(|report| match report {
                Report::Forked { forked, .. } => Some(Ok(forked)),
                Report::MutationFailed { failure, .. } => Some(Err(SessionError::Remote(failure))),
                _ => None,
            })
            .unwrap_or(Err(SessionError::Closed))
    }

    pub async fn kill(&self) -> Result<(), SessionError> {
        let reports = self
            .run(Msg::KillRequested {
                inbox: self.inbox.clone(),
            })
            .await?;
        settled(reports, |report| matches!(report, Report::Killed { .. }))
    }

    pub async fn rename(&self, name: impl Into<String>) -> Result<(), SessionError> {
        let reports = self
            .run(Msg::RenameRequested {
                inbox: self.inbox.clone(),
                name: name.into(),
            })
            .await?;
        settled(reports, |report| matches!(report, Report::Renamed { .. }))
    }

    /// Deletes the job remotely. The subscription is closed afterwards.
    pub async fn remove(&self) -> Result<(), SessionError> {
        let reports = self
            .run(Msg::RemoveRequested {
                inbox: self.inbox.clone(),
            })
            .await?;
        settled(reports, |report| matches!(report, Report::Removed { .. }))
    }

    pub async fn push_stream_chunk(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.run(Msg::StreamChunk {
            inbox: self.inbox.clone(),
            text: text.into(),
        })
        .await
        .map(drop)
    }

    pub async fn finish_stream(&self) -> Result<(), SessionError> {
        self.run(Msg::StreamFinished {
            inbox: self.inbox.clone(),
        })
        .await
        .map(drop)
    }

    /// Ends the subscription, cancelling its poll timer and in-flight fetches
    /// when it was the last one on the inbox.
    pub fn unsubscribe(mut self) {
        self.teardown();
    }

    async fn run(&self, msg: Msg) -> Result<Vec<Report>, SessionError> {
        dispatch(Arc::clone(&self.inner), msg)
            .await
            .map_err(|err| match err {
                SyncError::NotSubscribed(_) => SessionError::Closed,
                other => SessionError::Sync(other),
            })
    }

    fn teardown(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        let effects = self.inner.step(Msg::Unsubscribed {
            inbox: self.inbox.clone(),
        });
        match effects {
            Ok(effects) => effects.iter().for_each(|effect| self.inner.apply_local(effect)),
            Err(err) => convo_error!("Unsubscribing from {} failed: {err}", self.inbox),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn send_outcome(reports: Vec<Report>) -> Result<MessageHash, SessionError> {
    reports
        .into_iter()
        .find_map(|report| match report {
            Report::SendCommitted { message_id, .. } => Some(Ok(message_id)),
            Report::SendRolledBack { failure, .. } => Some(Err(SessionError::Remote(failure))),
            _ => None,
        })
        .unwrap_or(Err(SessionError::Closed))
}

fn settled(reports: Vec<Report>, done: impl Fn(&Report) -> bool) -> Result<(), SessionError> {
    for report in reports {
        if done(&report) {
            return Ok(());
        }
        if let Report::MutationFailed { failure, .. } = report {
            return Err(SessionError::Remote(failure));
        }
    }
    Err(SessionError::Closed)
}

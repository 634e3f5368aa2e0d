//! Which caches a settled mutation touches.
//!
//! Invalidation means "stale, refetch on next read". Mutations whose response is
//! already authoritative patch the cache instead.
use crate::{InboxId, JobId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    /// Paginated message cache of one inbox.
    Conversation(InboxId),
    InboxListing,
    JobScope(JobId),
    AttachmentListing(InboxId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePatch {
    InboxName { inbox: InboxId, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheAction {
    Invalidate(CacheNamespace),
    Patch(CachePatch),
    /// Drop the cache entirely; the thing it described no longer exists.
    Evict(CacheNamespace),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettledMutation {
    Send {
        inbox: InboxId,
        job: JobId,
        with_attachments: bool,
    },
    Retry {
        inbox: InboxId,
        job: JobId,
        with_attachments: bool,
    },
    Fork {
        source: InboxId,
        forked: InboxId,
    },
    Kill {
        inbox: InboxId,
    },
    Rename {
        inbox: InboxId,
        name: String,
    },
    Remove {
        inbox: InboxId,
    },
}

pub fn route(mutation: &SettledMutation) -> Vec<CacheAction> {
    use CacheAction::{Evict, Invalidate, Patch};
    use CacheNamespace::{AttachmentListing, Conversation, InboxListing, JobScope};

    match mutation {
        // The conversation itself is settled by the commit; what goes stale is
        // the metadata around it.
        SettledMutation::Send {
            inbox,
            job,
            with_attachments,
        }
        | SettledMutation::Retry {
            inbox,
            job,
            with_attachments,
        } => {
            let mut actions = vec![Invalidate(InboxListing), Invalidate(JobScope(job.clone()))];
            if *with_attachments {
                actions.push(Invalidate(AttachmentListing(inbox.clone())));
            }
            actions
        }
        // Keyed by the new address; the source conversation did not change.
        SettledMutation::Fork { forked, .. } => {
            vec![Invalidate(Conversation(forked.clone())), Invalidate(InboxListing)]
        }
        SettledMutation::Kill { inbox } => vec![Invalidate(Conversation(inbox.clone()))],
        SettledMutation::Rename { inbox, name } => vec![Patch(CachePatch::InboxName {
            inbox: inbox.clone(),
            name: name.clone(),
        })],
        SettledMutation::Remove { inbox } => {
            vec![Evict(Conversation(inbox.clone())), Invalidate(InboxListing)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(raw: &str) -> (JobId, InboxId) {
        let job = JobId::new(raw).unwrap();
        let inbox = InboxId::for_job(&job);
        (job, inbox)
    }

    #[test]
    fn retry_routes_like_send() {
        let (job, inbox) = job("42");
        let send = route(&SettledMutation::Send {
            inbox: inbox.clone(),
            job: job.clone(),
            with_attachments: true,
        });
        let retry = route(&SettledMutation::Retry {
            inbox: inbox.clone(),
            job: job.clone(),
            with_attachments: true,
        });
        assert_eq!(send, retry);
        assert!(send.contains(&CacheAction::Invalidate(CacheNamespace::AttachmentListing(
            inbox
        ))));
    }

    #[test]
    fn fork_invalidates_the_new_address_only() {
        let (_, source) = job("42");
        let (_, forked) = job("43");
        let actions = route(&SettledMutation::Fork {
            source: source.clone(),
            forked: forked.clone(),
        });
        assert!(actions.contains(&CacheAction::Invalidate(CacheNamespace::Conversation(forked))));
        assert!(!actions.contains(&CacheAction::Invalidate(CacheNamespace::Conversation(source))));
    }

    #[test]
    fn rename_patches_instead_of_invalidating() {
        let (_, inbox) = job("42");
        let actions = route(&SettledMutation::Rename {
            inbox: inbox.clone(),
            name: "Taxes".into(),
        });
        assert_eq!(
            actions,
            vec![CacheAction::Patch(CachePatch::InboxName {
                inbox,
                name: "Taxes".into()
            })]
        );
    }
}

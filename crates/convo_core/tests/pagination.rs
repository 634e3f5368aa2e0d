mod support;

use convo_core::{
    update, ConversationKind, FailureKind, FetchPurpose, Msg, RemoteFailure, Report, SkipReason,
    SyncError, SyncSettings, SyncState,
};
use pretty_assertions::assert_eq;

use support::{answer_fetches, drive, fetches, history, init_logging, job_inbox, messages, reports, RemoteInbox};

fn subscribed(inbox: &convo_core::InboxId) -> SyncState {
    let mut state = SyncState::new(SyncSettings::default());
    let effects = update(
        &mut state,
        Msg::Subscribed {
            inbox: inbox.clone(),
            kind: ConversationKind::ActiveJob,
        },
    )
    .unwrap();
    assert!(effects.is_empty());
    state
}

fn load_older(inbox: &convo_core::InboxId) -> Msg {
    Msg::LoadOlderRequested {
        inbox: inbox.clone(),
    }
}

#[test]
fn three_pages_load_everything_then_load_older_is_a_no_op() {
    init_logging();
    let inbox = job_inbox("42");
    let remote = RemoteInbox::new(history(&inbox, 25));
    let mut state = subscribed(&inbox);

    let effects = drive(&mut state, &remote, load_older(&inbox));
    assert_eq!(messages(&state, &inbox).len(), 10);
    assert!(reports(&effects).contains(&Report::PageApplied {
        inbox: inbox.clone(),
        purpose: FetchPurpose::Older,
        added: 10,
        exhausted: false,
    }));

    drive(&mut state, &remote, load_older(&inbox));
    assert_eq!(messages(&state, &inbox).len(), 20);

    let effects = drive(&mut state, &remote, load_older(&inbox));
    assert!(reports(&effects).contains(&Report::PageApplied {
        inbox: inbox.clone(),
        purpose: FetchPurpose::Older,
        added: 5,
        exhausted: true,
    }));
    assert_eq!(messages(&state, &inbox), remote.messages);

    let effects = update(&mut state, load_older(&inbox)).unwrap();
    assert!(fetches(&effects).is_empty());
    assert_eq!(
        reports(&effects),
        vec![Report::LoadOlderSkipped {
            inbox: inbox.clone(),
            reason: SkipReason::Exhausted,
        }]
    );
    assert_eq!(messages(&state, &inbox), remote.messages);

    let view = state.view(&inbox).unwrap();
    assert!(view.exhausted);
    assert_eq!(
        state
            .conversation(&inbox)
            .unwrap()
            .pages()
            .iter()
            .map(|page| page.len)
            .collect::<Vec<_>>(),
        vec![5, 10, 10]
    );
}

#[test]
fn concurrent_load_older_is_coalesced() {
    init_logging();
    let inbox = job_inbox("42");
    let remote = RemoteInbox::new(history(&inbox, 25));
    let mut state = subscribed(&inbox);

    let first = update(&mut state, load_older(&inbox)).unwrap();
    let second = update(&mut state, load_older(&inbox)).unwrap();

    assert_eq!(fetches(&first).len(), 1);
    assert!(fetches(&second).is_empty());
    assert_eq!(
        reports(&second),
        vec![Report::LoadOlderSkipped {
            inbox: inbox.clone(),
            reason: SkipReason::InFlight,
        }]
    );
    assert!(state.view(&inbox).unwrap().loading_older);

    answer_fetches(&mut state, &remote, first);
    assert_eq!(messages(&state, &inbox).len(), 10);
    assert!(!state.view(&inbox).unwrap().loading_older);
}

#[test]
fn late_page_from_ended_subscription_is_discarded() {
    init_logging();
    let inbox = job_inbox("42");
    let remote = RemoteInbox::new(history(&inbox, 25));
    let mut state = subscribed(&inbox);

    let stale_request = fetches(&update(&mut state, load_older(&inbox)).unwrap()).remove(0);
    let effects = update(
        &mut state,
        Msg::Unsubscribed {
            inbox: inbox.clone(),
        },
    )
    .unwrap();
    assert!(effects.contains(&convo_core::Effect::CancelFetches {
        inbox: inbox.clone()
    }));
    assert!(state.view(&inbox).is_none());

    update(
        &mut state,
        Msg::Subscribed {
            inbox: inbox.clone(),
            kind: ConversationKind::ActiveJob,
        },
    )
    .unwrap();
    let effects = update(
        &mut state,
        Msg::PageFetched {
            ticket: stale_request.ticket.clone(),
            result: Ok(remote.page(None, 10)),
        },
    )
    .unwrap();

    assert_eq!(
        reports(&effects),
        vec![Report::PageDiscarded {
            inbox: inbox.clone()
        }]
    );
    assert!(messages(&state, &inbox).is_empty());
}

#[test]
fn load_older_and_new_arrivals_commute() {
    init_logging();
    let inbox = job_inbox("42");
    let mut remote = RemoteInbox::new(history(&inbox, 15));

    let mut first = subscribed(&inbox);
    drive(&mut first, &remote, load_older(&inbox));
    let mut second = first.clone();

    let all = history(&inbox, 16);
    remote.messages = all.clone();
    let refresh = Msg::RefreshRequested {
        inbox: inbox.clone(),
    };

    drive(&mut first, &remote, load_older(&inbox));
    drive(&mut first, &remote, refresh.clone());

    drive(&mut second, &remote, refresh);
    drive(&mut second, &remote, load_older(&inbox));

    assert_eq!(messages(&first, &inbox), all);
    assert_eq!(messages(&first, &inbox), messages(&second, &inbox));
}

#[test]
fn refresh_past_a_gap_restarts_pagination_from_the_newest_page() {
    init_logging();
    let inbox = job_inbox("42");
    let mut remote = RemoteInbox::new(history(&inbox, 20));
    let mut state = subscribed(&inbox);
    drive(&mut state, &remote, load_older(&inbox));
    drive(&mut state, &remote, load_older(&inbox));
    assert_eq!(messages(&state, &inbox), remote.messages);

    let refresh = Msg::RefreshRequested {
        inbox: inbox.clone(),
    };

    // Exactly one page newer: it continues the cached tail.
    remote.messages = history(&inbox, 30);
    drive(&mut state, &remote, refresh.clone());
    assert_eq!(messages(&state, &inbox), remote.messages);

    // Twelve more: m31 and m32 fall outside the newest page.
    remote.messages = history(&inbox, 42);
    drive(&mut state, &remote, refresh);
    let view = state.view(&inbox).unwrap();
    assert!(!view.exhausted);
    assert_eq!(view.messages, remote.messages[32..].to_vec());

    for _ in 0..5 {
        drive(&mut state, &remote, load_older(&inbox));
    }
    assert_eq!(messages(&state, &inbox), remote.messages);
    assert!(state.view(&inbox).unwrap().exhausted);
}

#[test]
fn refetching_known_messages_does_not_duplicate_them() {
    init_logging();
    let inbox = job_inbox("42");
    let remote = RemoteInbox::new(history(&inbox, 6));
    let mut state = subscribed(&inbox);
    drive(&mut state, &remote, load_older(&inbox));
    let before = messages(&state, &inbox);

    for _ in 0..2 {
        drive(
            &mut state,
            &remote,
            Msg::RefreshRequested {
                inbox: inbox.clone(),
            },
        );
    }

    assert_eq!(messages(&state, &inbox), before);
}

#[test]
fn colliding_message_fails_loudly_and_leaves_cache_untouched() {
    init_logging();
    let inbox = job_inbox("42");
    let mut remote = RemoteInbox::new(history(&inbox, 4));
    let mut state = subscribed(&inbox);
    drive(&mut state, &remote, load_older(&inbox));
    let before = messages(&state, &inbox);

    remote.messages[1].content = "rewritten history".into();
    let request = fetches(
        &update(
            &mut state,
            Msg::RefreshRequested {
                inbox: inbox.clone(),
            },
        )
        .unwrap(),
    )
    .remove(0);
    let err = update(
        &mut state,
        Msg::PageFetched {
            ticket: request.ticket,
            result: Ok(remote.page(None, 10)),
        },
    )
    .unwrap_err();

    assert!(matches!(err, SyncError::IdentityCollision { .. }));
    assert!(err.is_invariant_violation());
    assert_eq!(messages(&state, &inbox), before);
    assert!(!state.view(&inbox).unwrap().refreshing);
}

#[test]
fn failed_page_is_reported_without_touching_the_cache() {
    init_logging();
    let inbox = job_inbox("42");
    let remote = RemoteInbox::new(history(&inbox, 25));
    let mut state = subscribed(&inbox);
    drive(&mut state, &remote, load_older(&inbox));
    let before = messages(&state, &inbox);

    let request = fetches(&update(&mut state, load_older(&inbox)).unwrap()).remove(0);
    let failure = RemoteFailure::new(FailureKind::Decode, "unexpected field `foo`");
    let effects = update(
        &mut state,
        Msg::PageFetched {
            ticket: request.ticket.clone(),
            result: Err(failure.clone()),
        },
    )
    .unwrap();

    assert_eq!(
        reports(&effects),
        vec![Report::FetchFailed {
            inbox: inbox.clone(),
            purpose: FetchPurpose::Older,
            failure: failure.clone(),
        }]
    );
    let view = state.view(&inbox).unwrap();
    assert_eq!(view.messages, before);
    assert_eq!(view.older_error, Some(failure));
    assert!(!view.loading_older);

    // The same cursor is tried again.
    let retried = fetches(&update(&mut state, load_older(&inbox)).unwrap()).remove(0);
    assert_eq!(retried.cursor, request.cursor);
    answer_fetches(&mut state, &remote, vec![convo_core::Effect::FetchPage(retried)]);
    assert_eq!(messages(&state, &inbox).len(), 20);
    assert_eq!(state.view(&inbox).unwrap().older_error, None);
}

#[test]
fn operations_on_unknown_inbox_are_rejected() {
    init_logging();
    let inbox = job_inbox("42");
    let mut state = SyncState::new(SyncSettings::default());

    assert_eq!(
        update(&mut state, load_older(&inbox)),
        Err(SyncError::NotSubscribed(inbox.clone()))
    );
}

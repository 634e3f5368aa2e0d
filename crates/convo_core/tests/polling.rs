mod support;

use std::time::Duration;

use convo_core::{
    update, CacheNamespace, ConversationKind, Effect, FailureKind, InboxId, Message,
    MessageStatus, Msg, RemoteFailure, Report, Role, SyncHealth, SyncSettings, SyncState,
};
use pretty_assertions::assert_eq;

use support::{
    drive, fetches, init_logging, job_inbox, messages, remote_message, reports, scheduled_poll,
    RemoteInbox,
};

/// A prompt followed by an assistant turn that has not produced output yet.
fn awaiting(inbox: &InboxId) -> (Message, Message) {
    let prompt = remote_message(inbox, 1, Role::User, "draft a reply", None);
    let mut turn = remote_message(inbox, 2, Role::Assistant, "", Some(&prompt));
    turn.status = MessageStatus::Running;
    (prompt, turn)
}

fn open(inbox: &InboxId, kind: ConversationKind, remote: &RemoteInbox) -> (SyncState, Vec<Effect>) {
    let mut state = SyncState::new(SyncSettings::default());
    drive(
        &mut state,
        remote,
        Msg::Subscribed {
            inbox: inbox.clone(),
            kind,
        },
    );
    let effects = drive(
        &mut state,
        remote,
        Msg::LoadOlderRequested {
            inbox: inbox.clone(),
        },
    );
    (state, effects)
}

fn tick(state: &mut SyncState, inbox: &InboxId, effects: &[Effect]) -> Vec<Effect> {
    let (epoch, _) = scheduled_poll(effects).expect("a poll should be scheduled");
    update(
        state,
        Msg::PollTick {
            inbox: inbox.clone(),
            epoch,
        },
    )
    .unwrap()
}

fn transient() -> RemoteFailure {
    RemoteFailure::new(FailureKind::Transient, "timed out")
}

#[test]
fn polling_runs_while_the_turn_is_awaited_and_stops_on_completion() {
    init_logging();
    let inbox = job_inbox("42");
    let (prompt, turn) = awaiting(&inbox);
    let mut remote = RemoteInbox::new(vec![prompt.clone(), turn.clone()]);
    let (mut state, effects) = open(&inbox, ConversationKind::ActiveJob, &remote);
    assert_eq!(scheduled_poll(&effects).map(|(_, after)| after), Some(Duration::from_secs(5)));

    // Still running on the first tick: the next poll is scheduled.
    let first = tick(&mut state, &inbox, &effects);
    let effects = support::answer_fetches(&mut state, &remote, first);
    assert!(scheduled_poll(&effects).is_some());

    let mut done = turn.clone();
    done.status = MessageStatus::Complete;
    done.content = "Dear team, ...".into();
    remote.messages[1] = done.clone();
    let second = tick(&mut state, &inbox, &effects);
    let effects = support::answer_fetches(&mut state, &remote, second);

    assert_eq!(scheduled_poll(&effects), None);
    assert_eq!(messages(&state, &inbox), vec![prompt, done]);
}

#[test]
fn static_conversations_are_never_polled() {
    init_logging();
    let inbox = job_inbox("42");
    let (prompt, turn) = awaiting(&inbox);
    let remote = RemoteInbox::new(vec![prompt, turn]);
    let (_state, effects) = open(&inbox, ConversationKind::Static, &remote);

    assert_eq!(scheduled_poll(&effects), None);
}

#[test]
fn unsubscribing_cancels_the_scheduled_poll() {
    init_logging();
    let inbox = job_inbox("42");
    let (prompt, turn) = awaiting(&inbox);
    let remote = RemoteInbox::new(vec![prompt, turn]);
    let (mut state, effects) = open(&inbox, ConversationKind::ActiveJob, &remote);
    let (epoch, _) = scheduled_poll(&effects).unwrap();

    let teardown = update(
        &mut state,
        Msg::Unsubscribed {
            inbox: inbox.clone(),
        },
    )
    .unwrap();
    assert!(teardown.contains(&Effect::CancelPoll {
        inbox: inbox.clone()
    }));

    let late = update(
        &mut state,
        Msg::PollTick {
            inbox: inbox.clone(),
            epoch,
        },
    )
    .unwrap();
    assert!(late.is_empty());
}

#[test]
fn shared_subscription_survives_one_unsubscribe() {
    init_logging();
    let inbox = job_inbox("42");
    let (prompt, turn) = awaiting(&inbox);
    let remote = RemoteInbox::new(vec![prompt, turn]);
    let (mut state, _) = open(&inbox, ConversationKind::ActiveJob, &remote);

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
        Msg::Unsubscribed {
            inbox: inbox.clone(),
        },
    )
    .unwrap();

    assert!(effects.is_empty());
    assert_eq!(messages(&state, &inbox).len(), 2);
}

#[test]
fn poll_failures_back_off_and_surface_only_past_the_threshold() {
    init_logging();
    let inbox = job_inbox("42");
    let (prompt, turn) = awaiting(&inbox);
    let remote = RemoteInbox::new(vec![prompt, turn]);
    let (mut state, mut effects) = open(&inbox, ConversationKind::ActiveJob, &remote);

    let mut delays = Vec::new();
    for _ in 0..3 {
        let request = fetches(&tick(&mut state, &inbox, &effects)).remove(0);
        effects = update(
            &mut state,
            Msg::PageFetched {
                ticket: request.ticket,
                result: Err(transient()),
            },
        )
        .unwrap();
        delays.push(scheduled_poll(&effects).unwrap().1);

        let view = state.view(&inbox).unwrap();
        if delays.len() < 3 {
            assert_eq!(view.health, SyncHealth::Lagging { failures: delays.len() as u32 });
            assert_eq!(view.poll_error, None);
        }
    }
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(10),
            Duration::from_secs(20),
            Duration::from_secs(40)
        ]
    );
    let view = state.view(&inbox).unwrap();
    assert!(view.is_out_of_sync());
    assert_eq!(view.poll_error, Some(transient()));
    assert_eq!(messages(&state, &inbox).len(), 2);

    let recovered = tick(&mut state, &inbox, &effects);
    let effects = support::answer_fetches(&mut state, &remote, recovered);
    let view = state.view(&inbox).unwrap();
    assert_eq!(view.health, SyncHealth::InSync);
    assert_eq!(view.poll_error, None);
    assert_eq!(scheduled_poll(&effects).unwrap().1, Duration::from_secs(5));
}

#[test]
fn streamed_output_stops_polling_and_finishing_marks_stale() {
    init_logging();
    let inbox = job_inbox("42");
    let (prompt, turn) = awaiting(&inbox);
    let remote = RemoteInbox::new(vec![prompt, turn]);
    let (mut state, _) = open(&inbox, ConversationKind::ActiveJob, &remote);

    let effects = update(
        &mut state,
        Msg::StreamChunk {
            inbox: inbox.clone(),
            text: "Dear ".into(),
        },
    )
    .unwrap();
    assert_eq!(
        effects,
        vec![Effect::CancelPoll {
            inbox: inbox.clone()
        }]
    );
    update(
        &mut state,
        Msg::StreamChunk {
            inbox: inbox.clone(),
            text: "team".into(),
        },
    )
    .unwrap();
    assert_eq!(messages(&state, &inbox)[1].content, "Dear team");

    update(
        &mut state,
        Msg::StreamFinished {
            inbox: inbox.clone(),
        },
    )
    .unwrap();
    assert!(state.is_stale(&CacheNamespace::Conversation(inbox.clone())));

    let effects = update(
        &mut state,
        Msg::Read {
            inbox: inbox.clone(),
        },
    )
    .unwrap();
    assert_eq!(fetches(&effects).len(), 1);
}

#[test]
fn kill_settles_the_running_turn_and_invalidates() {
    init_logging();
    let inbox = job_inbox("42");
    let (prompt, turn) = awaiting(&inbox);
    let remote = RemoteInbox::new(vec![prompt, turn]);
    let (mut state, _) = open(&inbox, ConversationKind::ActiveJob, &remote);

    let effects = update(
        &mut state,
        Msg::KillRequested {
            inbox: inbox.clone(),
        },
    )
    .unwrap();
    assert_eq!(
        effects,
        vec![Effect::KillJob {
            inbox: inbox.clone()
        }]
    );

    let effects = update(
        &mut state,
        Msg::KillSettled {
            inbox: inbox.clone(),
            result: Ok(()),
        },
    )
    .unwrap();

    assert_eq!(messages(&state, &inbox)[1].status, MessageStatus::Failed);
    assert!(state.is_stale(&CacheNamespace::Conversation(inbox.clone())));
    assert!(effects.contains(&Effect::CancelPoll {
        inbox: inbox.clone()
    }));
    assert!(reports(&effects).contains(&Report::Killed {
        inbox: inbox.clone()
    }));
}

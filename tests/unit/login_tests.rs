//! Login handshake pass counting and failure handling.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use agent_fleet::login::{LoginProgress, LoginSequencer, LoginSettings};
use agent_fleet::models::BehaviorFlags;
use agent_fleet::AppError;

use crate::support::{login_settings, Call, ScriptedSession};

fn sequencer(flags: BehaviorFlags) -> LoginSequencer {
    LoginSequencer::new("steve", login_settings(), flags)
}

#[tokio::test(start_paused = true)]
async fn first_pass_never_reaches_ready() {
    let session = ScriptedSession::standalone();
    let mut seq = sequencer(BehaviorFlags::default());

    let progress = seq.run_pass(session.as_ref()).await;

    assert_eq!(progress, LoginProgress::WarmingUp { pass: 1 });
    assert_eq!(seq.completed_passes(), 1);
    assert_eq!(
        session.calls(),
        vec![
            Call::Chat("/login hunter2".into()),
            Call::Presence(true),
            Call::Wait(80),
            Call::Presence(false),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn second_pass_equips_flags_and_reaches_ready() {
    let session = ScriptedSession::standalone();
    let flags = BehaviorFlags {
        auto_feed: true,
        ..BehaviorFlags::default()
    };
    let mut seq = sequencer(flags.clone());

    seq.run_pass(session.as_ref()).await;
    let progress = seq.run_pass(session.as_ref()).await;

    assert_eq!(progress, LoginProgress::Ready);
    let calls = session.calls();
    assert_eq!(
        &calls[4..],
        &[
            Call::Chat("/login hunter2".into()),
            Call::Presence(true),
            Call::Wait(80),
            Call::Presence(false),
            Call::Equip(flags),
            Call::Presence(true),
            Call::Wait(60),
            Call::Presence(false),
        ]
    );
    assert_eq!(
        calls.iter().filter(|c| matches!(c, Call::Equip(_))).count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn counter_resets_after_ready() {
    let session = ScriptedSession::standalone();
    let mut seq = sequencer(BehaviorFlags::default());

    seq.run_pass(session.as_ref()).await;
    assert_eq!(seq.run_pass(session.as_ref()).await, LoginProgress::Ready);
    assert_eq!(seq.completed_passes(), 0);
    assert_eq!(
        seq.run_pass(session.as_ref()).await,
        LoginProgress::WarmingUp { pass: 1 }
    );
}

#[tokio::test(start_paused = true)]
async fn rejected_credential_does_not_fail_pass() {
    let session = ScriptedSession::standalone();
    session.faults.chat.store(true, Ordering::SeqCst);
    let mut seq = sequencer(BehaviorFlags::default());

    assert_eq!(
        seq.run_pass(session.as_ref()).await,
        LoginProgress::WarmingUp { pass: 1 }
    );
    assert_eq!(seq.run_pass(session.as_ref()).await, LoginProgress::Ready);
}

#[tokio::test(start_paused = true)]
async fn presence_failure_fails_pass() {
    let session = ScriptedSession::standalone();
    session.faults.presence.store(true, Ordering::SeqCst);
    let mut seq = sequencer(BehaviorFlags::default());

    let progress = seq.run_pass(session.as_ref()).await;

    assert!(matches!(progress, LoginProgress::Failed(AppError::Session(_))));
    assert_eq!(seq.completed_passes(), 0);
}

#[tokio::test(start_paused = true)]
async fn configured_pass_count_is_honored() {
    let session = ScriptedSession::standalone();
    let settings = Arc::new(LoginSettings {
        passes: 3,
        ..(*login_settings()).clone()
    });
    let mut seq = LoginSequencer::new("steve", settings, BehaviorFlags::default());

    assert_eq!(
        seq.run_pass(session.as_ref()).await,
        LoginProgress::WarmingUp { pass: 1 }
    );
    assert_eq!(
        seq.run_pass(session.as_ref()).await,
        LoginProgress::WarmingUp { pass: 2 }
    );
    assert_eq!(seq.run_pass(session.as_ref()).await, LoginProgress::Ready);
}

#[tokio::test(start_paused = true)]
async fn single_pass_setting_still_requires_two_passes() {
    let session = ScriptedSession::standalone();
    let settings = Arc::new(LoginSettings {
        passes: 1,
        ..(*login_settings()).clone()
    });
    let mut seq = LoginSequencer::new("steve", settings, BehaviorFlags::default());

    assert_eq!(
        seq.run_pass(session.as_ref()).await,
        LoginProgress::WarmingUp { pass: 1 }
    );
    assert_eq!(seq.run_pass(session.as_ref()).await, LoginProgress::Ready);
}

#[tokio::test(start_paused = true)]
async fn ended_session_fails_pass() {
    let session = ScriptedSession::standalone();
    agent_fleet::session::SessionHandle::end(session.as_ref()).await;
    let mut seq = sequencer(BehaviorFlags::default());

    assert!(matches!(
        seq.run_pass(session.as_ref()).await,
        LoginProgress::Failed(_)
    ));
}

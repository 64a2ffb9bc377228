//! Supervisor lifecycle: start, login, termination and restart.

use std::sync::atomic::Ordering;
use std::time::Duration;

use agent_fleet::models::{telemetry, BehaviorFlags, BlockGoal, ConnectionState, SessionError};
use agent_fleet::session::SessionEvent;
use agent_fleet::supervisor::{AgentCommand, StartOutcome};
use agent_fleet::AppError;

use crate::support::{complete_login, wait_for_state, Call, Harness};

fn refused() -> SessionEvent {
    SessionEvent::Error(SessionError::new(
        Some("ECONNREFUSED".into()),
        "connect ECONNREFUSED 127.0.0.1:25565",
    ))
}

#[tokio::test(start_paused = true)]
async fn start_opens_session_and_broadcasts_started() {
    let mut harness = Harness::spawn();

    let outcome = harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let opened = harness.next_session().await;

    assert_eq!(outcome, StartOutcome::Started);
    assert_eq!(opened.live_before, 0);
    assert_eq!(harness.drain_logs(), vec![telemetry::started("steve")]);
    assert_eq!(
        harness.handle.state().await.unwrap(),
        ConnectionState::Connecting
    );
}

#[tokio::test(start_paused = true)]
async fn start_while_active_is_ignored() {
    let mut harness = Harness::spawn();
    harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let _opened = harness.next_session().await;

    let outcome = harness.handle.start(BehaviorFlags::default()).await.unwrap();

    assert_eq!(outcome, StartOutcome::AlreadyActive);
    assert_eq!(harness.connector.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn two_connect_confirmations_join_with_flags() {
    let mut harness = Harness::spawn();
    let flags = BehaviorFlags {
        auto_defend: true,
        ..BehaviorFlags::default()
    };
    harness.handle.start(flags.clone()).await.unwrap();
    let opened = harness.next_session().await;
    harness.drain_logs();

    complete_login(&harness, &opened).await;

    assert_eq!(
        harness.drain_logs(),
        vec![telemetry::joined("steve", "6b6t")]
    );
    assert!(opened.session.calls().contains(&Call::Equip(flags)));
}

#[tokio::test(start_paused = true)]
async fn single_confirmation_never_joins() {
    let mut harness = Harness::spawn();
    harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let opened = harness.next_session().await;
    harness.drain_logs();

    opened.emit(SessionEvent::Connected).await;
    wait_for_state(&harness.handle, ConnectionState::AuthenticatingStep2).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(
        harness.handle.state().await.unwrap(),
        ConnectionState::AuthenticatingStep2
    );
    assert!(harness.drain_logs().is_empty());
    assert!(!opened
        .session
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Equip(_))));
}

#[tokio::test(start_paused = true)]
async fn refused_connection_restarts_once_after_delay() {
    let mut harness = Harness::spawn();
    harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let first = harness.next_session().await;

    first.emit(refused()).await;
    let failed_at = tokio::time::Instant::now();
    let second = harness.next_session().await;

    let waited = second.opened_at - failed_at;
    assert!(waited >= Duration::from_millis(2000), "restarted after {waited:?}");
    assert!(waited < Duration::from_millis(2100), "restarted after {waited:?}");
    assert!(first.session.is_ended());
    assert_eq!(second.live_before, 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.connector.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn restart_reuses_original_flags() {
    let mut harness = Harness::spawn();
    let flags = BehaviorFlags {
        auto_feed: true,
        auto_accept_from: ["alex".to_owned()].into_iter().collect(),
        ..BehaviorFlags::default()
    };
    harness.handle.start(flags.clone()).await.unwrap();
    let first = harness.next_session().await;
    first
        .emit(SessionEvent::Ended {
            reason: "socketClosed".into(),
        })
        .await;

    let second = harness.next_session().await;
    complete_login(&harness, &second).await;

    assert!(second.session.calls().contains(&Call::Equip(flags)));
}

#[tokio::test(start_paused = true)]
async fn kick_before_ready_is_silent() {
    let mut harness = Harness::spawn();
    harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let first = harness.next_session().await;
    harness.drain_logs();

    first
        .emit(SessionEvent::Kicked {
            reason: "not whitelisted".into(),
        })
        .await;
    let _second = harness.next_session().await;

    assert!(harness.drain_logs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn kick_after_ready_reports_reason_once() {
    let mut harness = Harness::spawn();
    harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let first = harness.next_session().await;
    complete_login(&harness, &first).await;
    harness.drain_logs();

    first
        .emit(SessionEvent::Kicked {
            reason: "banned".into(),
        })
        .await;
    first
        .emit(SessionEvent::Ended {
            reason: "socketClosed".into(),
        })
        .await;
    let second = harness.next_session().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(harness.drain_logs(), vec![telemetry::kicked("steve", "banned")]);
    assert_eq!(second.live_before, 0);
    assert_eq!(harness.connector.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_restart() {
    let mut harness = Harness::spawn();
    harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let first = harness.next_session().await;
    first.emit(refused()).await;
    wait_for_state(&harness.handle, ConnectionState::Disconnected).await;

    harness.handle.stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(harness.connector.connects(), 1);
    assert_eq!(
        harness.handle.state().await.unwrap(),
        ConnectionState::Terminating
    );
}

#[tokio::test(start_paused = true)]
async fn start_during_pending_restart_connects_immediately() {
    let mut harness = Harness::spawn();
    harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let first = harness.next_session().await;
    first.emit(refused()).await;
    wait_for_state(&harness.handle, ConnectionState::Disconnected).await;
    let requested_at = tokio::time::Instant::now();

    let outcome = harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let second = harness.next_session().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(outcome, StartOutcome::Started);
    assert!(second.opened_at - requested_at < Duration::from_millis(100));
    assert_eq!(harness.connector.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_failure_retries_after_delay() {
    let mut harness = Harness::spawn();
    harness.connector.fail_next(1);
    let requested_at = tokio::time::Instant::now();

    harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let opened = harness.next_session().await;

    assert!(opened.opened_at - requested_at >= Duration::from_millis(2000));
    assert_eq!(harness.connector.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn closed_event_stream_counts_as_end() {
    let mut harness = Harness::spawn();
    harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let first = harness.next_session().await;
    let session = first.session.clone();

    drop(first);
    let _second = harness.next_session().await;

    assert!(session.is_ended());
}

#[tokio::test(start_paused = true)]
async fn dispatch_without_session_reports_no_session() {
    let harness = Harness::spawn();

    let result = harness
        .handle
        .dispatch(AgentCommand::Chat("hello".into()))
        .await
        .unwrap();

    assert!(matches!(result, Err(AppError::NoSession(_))));
}

#[tokio::test(start_paused = true)]
async fn dispatch_routes_to_active_session() {
    let mut harness = Harness::spawn();
    harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let opened = harness.next_session().await;

    harness
        .handle
        .dispatch(AgentCommand::Navigate(BlockGoal::new(100, 64, -200)))
        .await
        .unwrap()
        .unwrap();
    harness
        .handle
        .dispatch(AgentCommand::Chat("hello".into()))
        .await
        .unwrap()
        .unwrap();

    let calls = opened.session.calls();
    assert!(calls.contains(&Call::Goal(BlockGoal::new(100, 64, -200))));
    assert!(calls.contains(&Call::Chat("hello".into())));
}

#[tokio::test(start_paused = true)]
async fn missing_navigation_is_reported() {
    let mut harness = Harness::spawn();
    harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let opened = harness.next_session().await;
    opened
        .session
        .faults
        .navigation_missing
        .store(true, Ordering::SeqCst);

    let result = harness
        .handle
        .dispatch(AgentCommand::Navigate(BlockGoal::new(0, 0, 0)))
        .await
        .unwrap();

    assert!(matches!(result, Err(AppError::Unsupported(_))));
}

#[tokio::test(start_paused = true)]
async fn goal_and_path_events_are_broadcast() {
    let mut harness = Harness::spawn();
    harness.handle.start(BehaviorFlags::default()).await.unwrap();
    let opened = harness.next_session().await;
    harness.drain_logs();

    opened
        .emit(SessionEvent::PathUpdate {
            status: "noPath".into(),
        })
        .await;
    opened
        .emit(SessionEvent::PathUpdate {
            status: "success".into(),
        })
        .await;
    opened.emit(SessionEvent::GoalReached).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        harness.drain_logs(),
        vec![telemetry::path_found("steve"), telemetry::goal_reached("steve")]
    );
}

//! Sidecar bridge against a shell-script sidecar.

#![cfg(unix)]

use std::time::Duration;

use tokio::sync::mpsc;

use agent_fleet::config::GlobalConfig;
use agent_fleet::models::{AgentIdentity, BlockGoal, SessionError};
use agent_fleet::session::bridge::{BridgeConfig, BridgeConnector};
use agent_fleet::session::{SessionConnector, SessionEvent, SessionHandle};
use agent_fleet::AppError;

fn bridge(script: &str, navigation: bool) -> BridgeConnector {
    let raw = format!(
        "[session]\ncommand = \"sh\"\nargs = [\"-c\", {script:?}]\nnavigation = {navigation}\n\n[timing]\ntick_millis = 1\n"
    );
    let config = GlobalConfig::from_toml_str(&raw).expect("valid config");
    BridgeConnector::new(BridgeConfig::from_global(&config))
}

async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event before timeout")
        .expect("event stream open")
}

#[tokio::test]
async fn sidecar_events_are_translated_in_order() {
    let script = r#"echo '{"event":"login"}'; echo 'garbage'; echo '{"event":"kicked","reason":{"text":"bye"}}'"#;
    let connector = bridge(script, true);
    let identity = AgentIdentity::new("steve", "hunter2");

    let (_session, mut events) = connector.connect(&identity).await.expect("sidecar spawns");

    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Kicked {
            reason: r#"{"text":"bye"}"#.into()
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Ended {
            reason: "stream closed".into()
        }
    );
}

#[tokio::test]
async fn sidecar_sees_agent_name_but_not_secrets() {
    let script = r#"echo "{\"event\":\"error\",\"code\":\"$FLEET_AGENT_NAME\",\"message\":\"${FLEET_CONTROL_PASSWORD:-unset}\"}""#;
    let connector = bridge(script, true);
    let identity = AgentIdentity::new("steve", "hunter2");

    let (_session, mut events) = connector.connect(&identity).await.expect("sidecar spawns");

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Error(SessionError::new(Some("steve".into()), "unset"))
    );
}

#[tokio::test]
async fn navigation_disabled_rejects_goals() {
    let connector = bridge("sleep 5", false);
    let identity = AgentIdentity::new("steve", "hunter2");

    let (session, _events) = connector.connect(&identity).await.expect("sidecar spawns");
    let err = session.set_goal(BlockGoal::new(1, 2, 3)).await.unwrap_err();

    assert!(matches!(err, AppError::Unsupported(_)));
    session.end().await;
}

#[tokio::test]
async fn end_is_idempotent_and_fails_later_calls() {
    let connector = bridge("cat > /dev/null", true);
    let identity = AgentIdentity::new("steve", "hunter2");

    let (session, _events) = connector.connect(&identity).await.expect("sidecar spawns");
    session.send_chat("/login hunter2").await.expect("chat while live");

    session.end().await;
    session.end().await;

    assert!(session.send_chat("hello").await.is_err());
    assert!(session.wait_ticks(10).await.is_err());
}

#[tokio::test]
async fn missing_sidecar_fails_connect() {
    let raw = "[session]\ncommand = \"/nonexistent/agent-fleet-sidecar\"\n";
    let config = GlobalConfig::from_toml_str(raw).expect("valid config");
    let connector = BridgeConnector::new(BridgeConfig::from_global(&config));

    let err = connector
        .connect(&AgentIdentity::new("steve", "hunter2"))
        .await
        .err()
        .expect("spawn fails");

    assert!(matches!(err, AppError::Session(ref msg) if msg.contains("failed to spawn")));
}

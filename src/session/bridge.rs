//! Sidecar-process session collaborator.
//!
//! Each session launches the configured sidecar, which speaks the remote
//! game protocol, and exchanges NDJSON with it over stdio:
//!
//! | Direction        | Shape                                             |
//! |------------------|---------------------------------------------------|
//! | fleet → sidecar  | `{"method": "chat", "params": {"text": "..."}}`   |
//! | sidecar → fleet  | `{"event": "kicked", "reason": "..."}`            |
//!
//! Outbound methods: `chat`, `goal`, `presence`, `behaviors`, `feed`.
//! Inbound events: `login`, `kicked`, `error`, `end`, `goal_reached`,
//! `path_update`. Unknown inbound events are skipped at `DEBUG`; EOF on
//! stdout ends the session with reason `stream closed`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::codec::SidecarCodec;
use super::{OpenedSession, SessionConnector, SessionEvent, SessionFuture, SessionHandle};
use crate::config::{GlobalConfig, RemoteConfig};
use crate::models::{AgentIdentity, BehaviorFlags, BlockGoal, SessionError};
use crate::{AppError, Result};

/// Environment variables inherited by the sidecar.
///
/// Everything else is stripped with `env_clear()` so the control password
/// never reaches the sidecar.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "NODE_PATH",
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
];

/// Capacity of each session's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Settings for launching sidecars.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Sidecar executable.
    pub command: String,
    /// Sidecar arguments.
    pub args: Vec<String>,
    /// Whether the sidecar offers navigation.
    pub navigation: bool,
    /// Remote service passed to the sidecar through its environment.
    pub remote: RemoteConfig,
    /// Length of one game tick.
    pub tick: Duration,
}

impl BridgeConfig {
    /// Derive bridge settings from the global configuration.
    #[must_use]
    pub fn from_global(config: &GlobalConfig) -> Self {
        Self {
            command: config.session.command.clone(),
            args: config.session.args.clone(),
            navigation: config.session.navigation,
            remote: config.remote.clone(),
            tick: config.timing.tick(),
        }
    }
}

/// [`SessionConnector`] that launches one sidecar process per session.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    config: Arc<BridgeConfig>,
}

impl BridgeConnector {
    /// Create a connector.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn open(&self, identity: &AgentIdentity) -> Result<OpenedSession> {
        let config = &self.config;
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);

        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.env("FLEET_AGENT_NAME", &identity.name)
            .env("FLEET_REMOTE_HOST", &config.remote.host)
            .env("FLEET_REMOTE_PORT", config.remote.port.to_string())
            .env("FLEET_REMOTE_VERSION", &config.remote.version);

        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Session(format!("failed to spawn sidecar: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Session("failed to capture sidecar stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Session("failed to capture sidecar stdout".into()))?;

        info!(agent = %identity.name, pid = ?child.id(), "session sidecar spawned");

        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(
            run_reader(stdout, event_tx, cancel.clone())
                .instrument(info_span!("sidecar_reader", agent = %identity.name)),
        );

        let handle = BridgeSession {
            writer: Mutex::new(FramedWrite::new(stdin, SidecarCodec::new())),
            child: Mutex::new(Some(child)),
            cancel,
            navigation: config.navigation,
            tick: config.tick,
        };

        Ok((Arc::new(handle), event_rx))
    }
}

impl SessionConnector for BridgeConnector {
    fn connect<'a>(
        &'a self,
        identity: &'a AgentIdentity,
    ) -> SessionFuture<'a, Result<OpenedSession>> {
        Box::pin(self.open(identity))
    }
}

/// A live sidecar session.
struct BridgeSession {
    writer: Mutex<FramedWrite<ChildStdin, SidecarCodec>>,
    child: Mutex<Option<Child>>,
    cancel: CancellationToken,
    navigation: bool,
    tick: Duration,
}

impl BridgeSession {
    async fn send(&self, method: &str, params: Value) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Session("session has ended".into()));
        }
        let line = json!({ "method": method, "params": params }).to_string();
        self.writer
            .lock()
            .await
            .send(line)
            .await
            .map_err(|err| AppError::Session(format!("write to sidecar failed: {err}")))
    }
}

impl SessionHandle for BridgeSession {
    fn send_chat(&self, text: &str) -> SessionFuture<'_, Result<()>> {
        let params = json!({ "text": text });
        Box::pin(self.send("chat", params))
    }

    fn set_goal(&self, goal: BlockGoal) -> SessionFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.navigation {
                return Err(AppError::Unsupported(
                    "session has no navigation capability".into(),
                ));
            }
            self.send("goal", json!({ "x": goal.x, "y": goal.y, "z": goal.z }))
                .await
        })
    }

    fn set_presence(&self, active: bool) -> SessionFuture<'_, Result<()>> {
        Box::pin(self.send("presence", json!({ "active": active })))
    }

    fn wait_ticks(&self, ticks: u32) -> SessionFuture<'_, Result<()>> {
        Box::pin(async move {
            let window = tick_window(self.tick, ticks)?;
            tokio::select! {
                () = self.cancel.cancelled() => {
                    Err(AppError::Session("session ended while waiting".into()))
                }
                () = tokio::time::sleep(window) => Ok(()),
            }
        })
    }

    fn equip_behaviors(&self, flags: &BehaviorFlags) -> SessionFuture<'_, Result<()>> {
        let params = json!({
            "movements": self.navigation,
            "autoGap": flags.auto_feed,
            "autoTotem": flags.auto_defend,
            "autoTpa": flags.auto_accept_from,
        });
        Box::pin(self.send("behaviors", params))
    }

    fn feed_now(&self) -> SessionFuture<'_, Result<()>> {
        Box::pin(self.send("feed", json!({})))
    }

    fn end(&self) -> SessionFuture<'_, ()> {
        Box::pin(async move {
            self.cancel.cancel();
            let child = self.child.lock().await.take();
            if let Some(mut child) = child {
                if let Err(err) = child.kill().await {
                    debug!(%err, "sidecar already exited");
                }
            }
        })
    }
}

/// Length of `ticks` game ticks.
fn tick_window(tick: Duration, ticks: u32) -> Result<Duration> {
    tick.checked_mul(ticks).ok_or_else(|| {
        AppError::Session(format!("wait of {ticks} ticks of {tick:?} overflows"))
    })
}

/// Inbound sidecar event envelope.
#[derive(Debug, Deserialize)]
struct SidecarEvent {
    event: String,
    #[serde(default)]
    reason: Option<Value>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Parse one NDJSON line from the sidecar.
///
/// Returns `Ok(None)` for blank lines and unknown events.
///
/// # Errors
///
/// Returns `AppError::Session` if the line is not valid JSON.
pub fn parse_event_line(line: &str) -> Result<Option<SessionEvent>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let raw: SidecarEvent = serde_json::from_str(line)
        .map_err(|err| AppError::Session(format!("malformed json: {err}")))?;

    let event = match raw.event.as_str() {
        "login" => SessionEvent::Connected,
        "kicked" => SessionEvent::Kicked {
            reason: reason_text(raw.reason),
        },
        "error" => SessionEvent::Error(SessionError::new(
            raw.code,
            raw.message.unwrap_or_else(|| "unknown error".into()),
        )),
        "end" => SessionEvent::Ended {
            reason: reason_text(raw.reason),
        },
        "goal_reached" => SessionEvent::GoalReached,
        "path_update" => SessionEvent::PathUpdate {
            status: raw.status.unwrap_or_default(),
        },
        other => {
            debug!(event = other, "skipping unknown sidecar event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Kick reasons arrive either as plain strings or as chat components.
fn reason_text(reason: Option<Value>) -> String {
    match reason {
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

async fn run_reader(
    stdout: ChildStdout,
    event_tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let mut frames = FramedRead::new(stdout, SidecarCodec::new());

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                debug!("sidecar reader cancelled");
                return;
            }
            next = frames.next() => next,
        };

        match next {
            Some(Ok(line)) => match parse_event_line(&line) {
                Ok(Some(event)) => {
                    if event_tx.send(event).await.is_err() {
                        // Listener detached.
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "skipping malformed sidecar line"),
            },
            Some(Err(err)) => {
                warn!(%err, "sidecar stream failed");
                let _ = event_tx
                    .send(SessionEvent::Error(SessionError::new(None, err.to_string())))
                    .await;
                return;
            }
            None => {
                let _ = event_tx
                    .send(SessionEvent::Ended {
                        reason: "stream closed".into(),
                    })
                    .await;
                return;
            }
        }
    }
}

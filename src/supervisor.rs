//! Per-agent connection supervisor.
//!
//! One [`ConnectionSupervisor`] owns one agent's session lifecycle: it
//! opens sessions through the [`SessionConnector`], runs the login
//! handshake, routes operator commands, and restarts the session after
//! every termination. All of its state is private to a single actor task;
//! the cloneable [`SupervisorHandle`] talks to it over an mpsc inbox, so
//! handlers for one agent never run concurrently.
//!
//! Termination of any kind (kick, error, end) ends the session, detaches
//! its event stream and schedules a reconnect after the delay chosen by
//! the [`RestartPolicy`]. Only [`SupervisorHandle::stop`] (or dropping
//! every handle) ends the loop; a pending restart is cancelled by it.

use std::fmt::Debug;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Sleep;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::control::{ServerEvent, SubscriberSet};
use crate::login::{LoginProgress, LoginSequencer, LoginSettings};
use crate::models::telemetry;
use crate::models::{
    AgentIdentity, BehaviorFlags, BlockGoal, ConnectionState, SessionError, TerminationCause,
};
use crate::session::{SessionConnector, SessionEvent, SessionHandle};
use crate::{AppError, Result};

/// Capacity of the supervisor command inbox.
const INBOX_CAPACITY: usize = 64;

/// Chooses how long to wait before reconnecting after a termination.
///
/// This is the hook for differentiated backoff per [`ErrorClass`](crate::models::ErrorClass).
pub trait RestartPolicy: Send + Sync + Debug {
    /// Delay before the next connect attempt.
    fn delay_for(&self, cause: &TerminationCause) -> Duration;
}

/// Same delay regardless of cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantDelay(pub Duration);

impl RestartPolicy for ConstantDelay {
    fn delay_for(&self, _cause: &TerminationCause) -> Duration {
        self.0
    }
}

/// Static settings of one supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Login handshake tunables.
    pub login: Arc<LoginSettings>,
    /// Service name shown in the "joined" line.
    pub service_name: String,
    /// Reconnect delay policy.
    pub restart_policy: Arc<dyn RestartPolicy>,
}

impl SupervisorSettings {
    /// Build settings for `identity` from the global configuration.
    #[must_use]
    pub fn from_config(identity: &AgentIdentity, config: &GlobalConfig) -> Self {
        Self {
            login: Arc::new(LoginSettings::new(identity, &config.remote, &config.timing)),
            service_name: config.remote.display_name.clone(),
            restart_policy: Arc::new(ConstantDelay(config.timing.restart_delay())),
        }
    }
}

/// Command routed to the active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    /// Send a chat line.
    Chat(String),
    /// Hand a goal to the navigation capability.
    Navigate(BlockGoal),
    /// Run the feed-now routine.
    Feed,
}

impl AgentCommand {
    /// Operator-facing command name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::Navigate(_) => "goto",
            Self::Feed => "eat",
        }
    }
}

/// What a `start` request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session was requested.
    Started,
    /// A session was already active; nothing changed.
    AlreadyActive,
}

enum SupervisorCommand {
    Start(BehaviorFlags, oneshot::Sender<StartOutcome>),
    Stop(oneshot::Sender<()>),
    Dispatch(AgentCommand, oneshot::Sender<Result<()>>),
    State(oneshot::Sender<ConnectionState>),
}

/// Cloneable handle to a running supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    name: Arc<str>,
    tx: mpsc::Sender<SupervisorCommand>,
}

impl Debug for SupervisorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start(flags, _) => f.debug_tuple("Start").field(flags).finish(),
            Self::Stop(_) => f.write_str("Stop"),
            Self::Dispatch(cmd, _) => f.debug_tuple("Dispatch").field(cmd).finish(),
            Self::State(_) => f.write_str("State"),
        }
    }
}

impl SupervisorHandle {
    /// Name of the supervised agent.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SupervisorCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| AppError::Control(format!("supervisor for {} has stopped", self.name)))?;
        reply_rx
            .await
            .map_err(|_| AppError::Control(format!("supervisor for {} dropped reply", self.name)))
    }

    /// Start a session with `flags` unless one is already active.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Control` if the supervisor task has exited.
    pub async fn start(&self, flags: BehaviorFlags) -> Result<StartOutcome> {
        self.request(|reply| SupervisorCommand::Start(flags, reply))
            .await
    }

    /// Tear down the session and cancel any pending restart.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Control` if the supervisor task has exited.
    pub async fn stop(&self) -> Result<()> {
        self.request(SupervisorCommand::Stop).await
    }

    /// Route `command` to the active session.
    ///
    /// The outer error reports a dead supervisor; the inner one is the
    /// command's own outcome, e.g. `AppError::NoSession`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Control` if the supervisor task has exited.
    pub async fn dispatch(&self, command: AgentCommand) -> Result<Result<()>> {
        self.request(|reply| SupervisorCommand::Dispatch(command, reply))
            .await
    }

    /// Current connection state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Control` if the supervisor task has exited.
    pub async fn state(&self) -> Result<ConnectionState> {
        self.request(SupervisorCommand::State).await
    }
}

type LoginTask = JoinHandle<(LoginSequencer, LoginProgress)>;

/// Actor owning one agent's session lifecycle.
pub struct ConnectionSupervisor {
    identity: Arc<AgentIdentity>,
    connector: Arc<dyn SessionConnector>,
    telemetry: Arc<SubscriberSet>,
    settings: SupervisorSettings,
    state: ConnectionState,
    flags: Option<BehaviorFlags>,
    ready: bool,
    session: Option<Arc<dyn SessionHandle>>,
    events: Option<mpsc::Receiver<SessionEvent>>,
    sequencer: Option<LoginSequencer>,
    login_task: Option<LoginTask>,
    queued_passes: u32,
    restart: Option<Pin<Box<Sleep>>>,
}

impl ConnectionSupervisor {
    /// Construct a supervisor (does not start the actor yet).
    #[must_use]
    pub fn new(
        identity: Arc<AgentIdentity>,
        connector: Arc<dyn SessionConnector>,
        telemetry: Arc<SubscriberSet>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            identity,
            connector,
            telemetry,
            settings,
            state: ConnectionState::Disconnected,
            flags: None,
            ready: false,
            session: None,
            events: None,
            sequencer: None,
            login_task: None,
            queued_passes: 0,
            restart: None,
        }
    }

    /// Spawn the actor task and return a handle for controlling it.
    ///
    /// The task ends after every handle has been dropped.
    #[must_use]
    pub fn spawn(self) -> (SupervisorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let name: Arc<str> = Arc::from(self.identity.name.as_str());
        let span = info_span!("supervisor", agent = %name);
        let task = tokio::spawn(self.run(rx).instrument(span));
        (SupervisorHandle { name, tx }, task)
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<SupervisorCommand>) {
        loop {
            tokio::select! {
                command = inbox.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command).await;
                }
                event = next_event(&mut self.events) => {
                    let event = event.unwrap_or_else(|| SessionEvent::Ended {
                        reason: "event stream closed".into(),
                    });
                    self.handle_event(event).await;
                }
                outcome = login_finished(&mut self.login_task) => {
                    self.login_task = None;
                    self.handle_login(outcome).await;
                }
                () = restart_due(&mut self.restart) => {
                    self.restart = None;
                    debug!("restart delay elapsed");
                    self.connect().await;
                }
            }
        }

        self.teardown().await;
        debug!("supervisor stopped");
    }

    async fn handle_command(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::Start(flags, reply) => {
                let outcome = self.start(flags).await;
                let _ = reply.send(outcome);
            }
            SupervisorCommand::Stop(reply) => {
                self.stop().await;
                let _ = reply.send(());
            }
            SupervisorCommand::Dispatch(command, reply) => {
                let result = self.dispatch(&command).await;
                if let Err(ref err) = result {
                    debug!(command = command.name(), %err, "command dispatch failed");
                }
                let _ = reply.send(result);
            }
            SupervisorCommand::State(reply) => {
                let _ = reply.send(self.state);
            }
        }
    }

    async fn start(&mut self, flags: BehaviorFlags) -> StartOutcome {
        if self.session.is_some() {
            info!(state = self.state.as_str(), "start ignored, session already active");
            return StartOutcome::AlreadyActive;
        }
        if self.restart.take().is_some() {
            info!("start supersedes pending restart");
        }

        self.flags = Some(flags);
        self.telemetry
            .broadcast(&ServerEvent::log(telemetry::started(&self.identity.name)));
        self.connect().await;
        StartOutcome::Started
    }

    async fn stop(&mut self) {
        if self.restart.take().is_some() {
            info!("pending restart cancelled");
        }
        self.teardown().await;
        self.flags = None;
        self.ready = false;
        self.state = ConnectionState::Terminating;
        info!("supervisor stopped session");
    }

    async fn dispatch(&self, command: &AgentCommand) -> Result<()> {
        let Some(session) = &self.session else {
            return Err(AppError::NoSession(format!(
                "{} has no active session",
                self.identity.name
            )));
        };
        match command {
            AgentCommand::Chat(text) => session.send_chat(text).await,
            AgentCommand::Navigate(goal) => session.set_goal(*goal).await,
            AgentCommand::Feed => session.feed_now().await,
        }
    }

    /// Open a new session with the stored flags.
    async fn connect(&mut self) {
        let Some(flags) = self.flags.clone() else {
            return;
        };
        // A new session is only created once the previous one is gone.
        if self.session.is_some() {
            return;
        }

        self.state = ConnectionState::Connecting;
        info!("connecting");

        match self.connector.connect(&self.identity).await {
            Ok((session, events)) => {
                self.session = Some(session);
                self.events = Some(events);
                self.sequencer = Some(LoginSequencer::new(
                    self.identity.name.clone(),
                    Arc::clone(&self.settings.login),
                    flags,
                ));
            }
            Err(err) => {
                warn!(%err, "connect failed");
                let cause = TerminationCause::Error(SessionError::new(None, err.to_string()));
                self.schedule_restart(&cause);
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                if self.login_task.is_some() {
                    self.queued_passes += 1;
                    debug!(queued = self.queued_passes, "login pass queued");
                } else {
                    self.begin_pass();
                }
            }
            SessionEvent::Kicked { reason } => {
                self.terminate(TerminationCause::Kicked(reason)).await;
            }
            SessionEvent::Error(err) => {
                self.terminate(TerminationCause::Error(err)).await;
            }
            SessionEvent::Ended { reason } => {
                self.terminate(TerminationCause::Ended(reason)).await;
            }
            SessionEvent::GoalReached => {
                self.telemetry
                    .broadcast(&ServerEvent::log(telemetry::goal_reached(&self.identity.name)));
            }
            SessionEvent::PathUpdate { status } => {
                if status == "success" {
                    self.telemetry
                        .broadcast(&ServerEvent::log(telemetry::path_found(&self.identity.name)));
                }
            }
        }
    }

    fn begin_pass(&mut self) {
        let (Some(session), Some(mut sequencer)) = (self.session.clone(), self.sequencer.take())
        else {
            return;
        };
        self.state = ConnectionState::authenticating(sequencer.next_pass());
        let span = info_span!("login_pass", pass = sequencer.next_pass());
        self.login_task = Some(tokio::spawn(
            async move {
                let progress = sequencer.run_pass(session.as_ref()).await;
                (sequencer, progress)
            }
            .instrument(span),
        ));
    }

    async fn handle_login(
        &mut self,
        outcome: std::result::Result<(LoginSequencer, LoginProgress), JoinError>,
    ) {
        match outcome {
            Ok((sequencer, LoginProgress::WarmingUp { pass })) => {
                debug!(pass, "waiting for next connect confirmation");
                self.state = ConnectionState::authenticating(sequencer.next_pass());
                self.sequencer = Some(sequencer);
            }
            Ok((sequencer, LoginProgress::Ready)) => {
                self.sequencer = Some(sequencer);
                self.state = ConnectionState::Ready;
                self.ready = true;
                info!("agent joined");
                self.telemetry.broadcast(&ServerEvent::log(telemetry::joined(
                    &self.identity.name,
                    &self.settings.service_name,
                )));
            }
            Ok((_, LoginProgress::Failed(err))) => {
                warn!(%err, "login pass failed");
                let cause = TerminationCause::Error(SessionError::new(None, err.to_string()));
                self.terminate(cause).await;
                return;
            }
            Err(err) if err.is_cancelled() => return,
            Err(err) => {
                warn!(%err, "login pass panicked");
                let cause = TerminationCause::Error(SessionError::new(None, err.to_string()));
                self.terminate(cause).await;
                return;
            }
        }

        if self.queued_passes > 0 {
            self.queued_passes -= 1;
            self.begin_pass();
        }
    }

    /// End the current session and schedule the reconnect.
    async fn terminate(&mut self, cause: TerminationCause) {
        if self.session.is_none() {
            return;
        }
        let reason = cause.reason();
        info!(%reason, "session terminated");

        self.teardown().await;

        if std::mem::take(&mut self.ready) {
            self.telemetry.broadcast(&ServerEvent::log(telemetry::kicked(
                &self.identity.name,
                &reason,
            )));
        }

        self.schedule_restart(&cause);
    }

    fn schedule_restart(&mut self, cause: &TerminationCause) {
        let delay = self.settings.restart_policy.delay_for(cause);
        if let TerminationCause::Error(err) = cause {
            debug!(class = ?err.class(), "classified session error");
        }
        info!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "restart scheduled");
        self.state = ConnectionState::Disconnected;
        self.restart = Some(Box::pin(tokio::time::sleep(delay)));
    }

    /// Detach listeners, stop the login pass and end the session.
    async fn teardown(&mut self) {
        if let Some(task) = self.login_task.take() {
            task.abort();
        }
        self.events = None;
        self.sequencer = None;
        self.queued_passes = 0;
        if let Some(session) = self.session.take() {
            session.end().await;
        }
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<SessionEvent>>) -> Option<SessionEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn login_finished(
    task: &mut Option<LoginTask>,
) -> std::result::Result<(LoginSequencer, LoginProgress), JoinError> {
    match task {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

async fn restart_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

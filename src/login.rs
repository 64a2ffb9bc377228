//! Post-connect login handshake.
//!
//! The remote service silently discards the first login attempt in some
//! session states, so a session is only trusted after a fixed number of
//! complete passes (at least two). Each pass submits the credential,
//! holds the presence signal for the settle window and releases it. The
//! final pass additionally equips the deferred behavior configuration and
//! holds presence for the shorter ready window.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{RemoteConfig, TimingConfig};
use crate::models::{AgentIdentity, BehaviorFlags};
use crate::session::SessionHandle;
use crate::AppError;

/// Fewest complete passes before a session is trusted.
pub const MIN_LOGIN_PASSES: u32 = 2;

/// Tunables of the login handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSettings {
    /// Login command with the secret already substituted.
    pub login_command: String,
    /// Settle window of every pass, in ticks.
    pub settle_ticks: u32,
    /// Settle window before ready, in ticks.
    pub ready_settle_ticks: u32,
    /// Passes required before the session is trusted; never fewer than
    /// [`MIN_LOGIN_PASSES`].
    pub passes: u32,
}

impl LoginSettings {
    /// Build settings for `identity` from the configuration sections.
    #[must_use]
    pub fn new(identity: &AgentIdentity, remote: &RemoteConfig, timing: &TimingConfig) -> Self {
        Self {
            login_command: remote.login_command_for(&identity.secret),
            settle_ticks: timing.settle_ticks,
            ready_settle_ticks: timing.ready_settle_ticks,
            passes: timing.login_passes.max(MIN_LOGIN_PASSES),
        }
    }
}

/// Result of one login pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginProgress {
    /// Pass `pass` finished; more passes are required.
    WarmingUp {
        /// 1-based number of the completed pass.
        pass: u32,
    },
    /// All passes completed; the agent has joined.
    Ready,
    /// The session failed mid-pass.
    Failed(AppError),
}

/// Drives the login handshake of one session instance.
///
/// A fresh sequencer is created for every session, so the pass counter
/// starts from zero after each reconnect and resets again once ready.
#[derive(Debug, Clone)]
pub struct LoginSequencer {
    agent: String,
    settings: Arc<LoginSettings>,
    flags: BehaviorFlags,
    completed: u32,
}

impl LoginSequencer {
    /// Create a sequencer for one session of `agent`.
    #[must_use]
    pub fn new(agent: impl Into<String>, settings: Arc<LoginSettings>, flags: BehaviorFlags) -> Self {
        Self {
            agent: agent.into(),
            settings,
            flags,
            completed: 0,
        }
    }

    /// Passes completed since the session started or last became ready.
    #[must_use]
    pub fn completed_passes(&self) -> u32 {
        self.completed
    }

    /// Number of the pass the next [`run_pass`](Self::run_pass) executes.
    #[must_use]
    pub fn next_pass(&self) -> u32 {
        self.completed + 1
    }

    /// Run one pass in response to a connect confirmation.
    ///
    /// Credential submission is best-effort: the remote service decides
    /// whether the login worked. Presence, wait and equip failures mean
    /// the session is gone and yield [`LoginProgress::Failed`].
    pub async fn run_pass(&mut self, session: &dyn SessionHandle) -> LoginProgress {
        let pass = self.next_pass();
        debug!(agent = %self.agent, pass, "login pass started");

        if let Err(err) = session.send_chat(&self.settings.login_command).await {
            warn!(agent = %self.agent, pass, %err, "credential submission failed");
        }

        if let Err(err) = hold_presence(session, self.settings.settle_ticks).await {
            return LoginProgress::Failed(err);
        }

        self.completed += 1;
        if self.completed < self.settings.passes.max(MIN_LOGIN_PASSES) {
            info!(agent = %self.agent, pass, "login pass complete, awaiting next connect");
            return LoginProgress::WarmingUp { pass };
        }

        if let Err(err) = session.equip_behaviors(&self.flags).await {
            return LoginProgress::Failed(err);
        }
        if let Err(err) = hold_presence(session, self.settings.ready_settle_ticks).await {
            return LoginProgress::Failed(err);
        }

        self.completed = 0;
        info!(agent = %self.agent, "login complete");
        LoginProgress::Ready
    }
}

async fn hold_presence(session: &dyn SessionHandle, ticks: u32) -> Result<(), AppError> {
    session.set_presence(true).await?;
    session.wait_ticks(ticks).await?;
    session.set_presence(false).await
}

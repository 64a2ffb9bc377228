//! Per-agent connection state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one agent's connection to the remote service.
///
/// Exactly one value is live per agent; the supervisor owns it. Session
/// termination always loops back to `Connecting` after the restart delay,
/// so only an explicit stop reaches `Terminating`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session and no restart pending.
    #[default]
    Disconnected,
    /// A session has been requested and is being established.
    Connecting,
    /// First login pass in progress.
    AuthenticatingStep1,
    /// Second login pass in progress.
    AuthenticatingStep2,
    /// Both login passes completed; the agent has joined.
    Ready,
    /// Explicitly stopped; no restart will follow.
    Terminating,
}

impl ConnectionState {
    /// Stable lowercase name, used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AuthenticatingStep1 => "authenticating_step1",
            Self::AuthenticatingStep2 => "authenticating_step2",
            Self::Ready => "ready",
            Self::Terminating => "terminating",
        }
    }

    /// State reported while login pass number `pass` (1-based) runs.
    #[must_use]
    pub fn authenticating(pass: u32) -> Self {
        if pass <= 1 {
            Self::AuthenticatingStep1
        } else {
            Self::AuthenticatingStep2
        }
    }
}

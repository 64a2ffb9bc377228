//! Session collaborator abstraction.
//!
//! The remote game protocol lives outside this crate. The supervisor only
//! sees a [`SessionConnector`] that opens sessions and the
//! [`SessionHandle`] plus event stream each connect returns. All actions
//! an operator or the login handshake performs go through this trait.

pub mod bridge;
pub mod codec;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::models::{AgentIdentity, BehaviorFlags, BlockGoal, SessionError};
use crate::Result;

/// Boxed future returned by session trait methods.
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lifecycle and telemetry events emitted by one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The remote service confirmed a login step. Drives one login pass.
    Connected,
    /// The remote service kicked the agent.
    Kicked {
        /// Kick reason as reported by the service.
        reason: String,
    },
    /// The session failed.
    Error(SessionError),
    /// The session is over.
    Ended {
        /// End reason as reported by the transport.
        reason: String,
    },
    /// The navigation goal was reached.
    GoalReached,
    /// The navigation capability recomputed its path.
    PathUpdate {
        /// Path status (`success`, `partial`, `noPath`, ...).
        status: String,
    },
}

/// One live connection to the remote service.
pub trait SessionHandle: Send + Sync {
    /// Send a chat line (also used for service commands such as `/login`).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the line
    /// cannot be delivered.
    fn send_chat(&self, text: &str) -> SessionFuture<'_, Result<()>>;

    /// Hand a goal to the navigation capability.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Unsupported`](crate::AppError::Unsupported) if the
    /// session has no navigation capability.
    fn set_goal(&self, goal: BlockGoal) -> SessionFuture<'_, Result<()>>;

    /// Hold or release the movement/presence signal.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) on delivery failure.
    fn set_presence(&self, active: bool) -> SessionFuture<'_, Result<()>>;

    /// Wait for `ticks` game ticks.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the session
    /// ends while waiting.
    fn wait_ticks(&self, ticks: u32) -> SessionFuture<'_, Result<()>>;

    /// Apply the navigation movement profile and auto-behavior options.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) on delivery failure.
    fn equip_behaviors(&self, flags: &BehaviorFlags) -> SessionFuture<'_, Result<()>>;

    /// Run the feed-now routine.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) on delivery failure.
    fn feed_now(&self) -> SessionFuture<'_, Result<()>>;

    /// End the session. Idempotent; resolves once teardown has completed.
    fn end(&self) -> SessionFuture<'_, ()>;
}

/// A freshly opened session and its event stream.
///
/// Dropping the receiver detaches every listener of that session.
pub type OpenedSession = (Arc<dyn SessionHandle>, mpsc::Receiver<SessionEvent>);

/// Opens sessions to the remote service.
pub trait SessionConnector: Send + Sync {
    /// Open a new session for `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the session
    /// cannot be created.
    fn connect<'a>(&'a self, identity: &'a AgentIdentity)
        -> SessionFuture<'a, Result<OpenedSession>>;
}

//! Why a session ended, and how its errors are classified.

use std::fmt::{Display, Formatter};

/// Error reported by a session, e.g. a refused connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    /// Transport error code when the collaborator supplies one
    /// (`ECONNREFUSED`, `ECONNRESET`, ...).
    pub code: Option<String>,
    /// Human-readable description.
    pub message: String,
}

impl SessionError {
    /// Construct an error with an optional code.
    #[must_use]
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Classify the error for restart policies.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self.code.as_deref() {
            Some("ECONNREFUSED") => ErrorClass::ConnectionRefused,
            Some(code) if code.starts_with("ERR_") || code == "EPROTO" => ErrorClass::Protocol,
            _ => ErrorClass::Other,
        }
    }
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Coarse error class. The default restart policy ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The remote service refused the TCP connection.
    ConnectionRefused,
    /// The remote service spoke something unexpected.
    Protocol,
    /// Anything else.
    Other,
}

/// Terminal event that ended one session instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCause {
    /// The remote service kicked the agent.
    Kicked(String),
    /// The session failed.
    Error(SessionError),
    /// The session ended on its own.
    Ended(String),
}

impl TerminationCause {
    /// Reason text shown to operators.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Kicked(reason) | Self::Ended(reason) => reason.clone(),
            Self::Error(err) => err.to_string(),
        }
    }
}

//! Agent identity loaded from the credentials file.

use std::fmt::{Debug, Formatter};

/// One configured account: the name the agent logs in as and the secret
/// submitted during the login handshake.
///
/// Immutable once loaded; shared read-only with the owning supervisor.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    /// Account name used to connect to the remote service.
    pub name: String,
    /// Secret submitted through the login command.
    pub secret: String,
}

impl AgentIdentity {
    /// Construct a new identity.
    #[must_use]
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
        }
    }
}

impl Debug for AgentIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentIdentity")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .finish()
    }
}

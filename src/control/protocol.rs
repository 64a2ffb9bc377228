//! JSON messages exchanged on the control channel.
//!
//! Every message is an object with a `type` discriminator.
//!
//! Client → server:
//! ```json
//! {"type": "ping"}
//! {"type": "start", "autoGap": true, "autoTotem": false, "autoTpa": ["alex"]}
//! {"type": "exit"}
//! {"type": "chat", "text": "hello"}
//! {"type": "goto", "pos": [100, 64, -200]}
//! {"type": "eat"}
//! ```
//!
//! Any request may carry `"agent": "<name>"` to address one agent on a
//! shared listener; without it the command goes to every hosted agent.
//!
//! Server → client:
//! ```json
//! {"type": "log", "message": "Bot {white}steve{gray} has joined 6b6t"}
//! {"type": "pong", "timestamp": 1700000000}
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::BehaviorFlags;

/// Operator command.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Liveness probe; answered with [`ServerEvent::Pong`].
    Ping,
    /// Start the agent session with the given behavior flags.
    Start(BehaviorFlags),
    /// Close every operator connection and end the process.
    Exit,
    /// Send chat text through the active session.
    Chat {
        /// Raw chat line.
        text: String,
    },
    /// Navigate to a block position.
    Goto {
        /// `[x, y, z]`.
        pos: [f64; 3],
    },
    /// Run the feed-now routine.
    Eat,
}

/// A request plus its optional agent address.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ControlEnvelope {
    /// Agent the request is addressed to; `None` addresses all.
    #[serde(default)]
    pub agent: Option<String>,
    /// The command itself.
    #[serde(flatten)]
    pub request: ControlRequest,
}

/// Parse one inbound text frame.
///
/// Returns `None` for malformed JSON and unrecognised `type` values; the
/// caller ignores those without replying.
#[must_use]
pub fn parse_request(raw: &str) -> Option<ControlEnvelope> {
    match serde_json::from_str::<ControlEnvelope>(raw) {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            debug!(%err, "ignoring unrecognised control message");
            None
        }
    }
}

/// Telemetry and replies sent to operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Human-readable status line, possibly with color tokens.
    Log {
        /// Message text.
        message: String,
    },
    /// Reply to [`ControlRequest::Ping`].
    Pong {
        /// Unix time in seconds.
        timestamp: i64,
    },
}

impl ServerEvent {
    /// A log line.
    #[must_use]
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
        }
    }

    /// A pong stamped with the current time.
    #[must_use]
    pub fn pong_now() -> Self {
        Self::Pong {
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Serialize to the wire form.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"log","message":""}"#.to_owned())
    }
}

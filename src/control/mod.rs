//! Operator control channel.
//!
//! An HTTP listener whose catch-all route answers plain requests with a
//! static acknowledgment and upgrades WebSocket requests into the
//! authenticated command/telemetry channel.

pub mod protocol;
pub mod server;
pub mod subscribers;

pub use protocol::{ControlEnvelope, ControlRequest, ServerEvent};
pub use server::{serve, ControlState};
pub use subscribers::{Outbound, SubscriberId, SubscriberSet};

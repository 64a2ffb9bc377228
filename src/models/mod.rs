//! Domain model module declarations.

pub mod flags;
pub mod goal;
pub mod identity;
pub mod state;
pub mod telemetry;
pub mod termination;

pub use flags::BehaviorFlags;
pub use goal::BlockGoal;
pub use identity::AgentIdentity;
pub use state::ConnectionState;
pub use termination::{ErrorClass, SessionError, TerminationCause};

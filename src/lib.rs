#![forbid(unsafe_code)]

//! Supervisor and operator control channel for a fleet of agents that
//! keep long-lived sessions with a remote game service.

pub mod config;
pub mod control;
pub mod errors;
pub mod fleet;
pub mod login;
pub mod models;
pub mod session;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

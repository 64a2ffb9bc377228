//! Behavior flags supplied with a `start` command.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Optional automated behaviors for one session instance.
///
/// Captured at `start`, immutable for the lifetime of that session and
/// reused unchanged by every automatic restart. A later `start` may
/// supply a new value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BehaviorFlags {
    /// Eat automatically when hungry.
    #[serde(rename = "autoGap", default)]
    pub auto_feed: bool,
    /// Keep a defensive item equipped.
    #[serde(rename = "autoTotem", default)]
    pub auto_defend: bool,
    /// Players whose teleport requests are accepted automatically.
    #[serde(rename = "autoTpa", default)]
    pub auto_accept_from: BTreeSet<String>,
}

impl BehaviorFlags {
    /// `true` when no optional behavior is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.auto_feed && !self.auto_defend && self.auto_accept_from.is_empty()
    }
}

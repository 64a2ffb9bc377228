//! Operator-facing log lines.
//!
//! Messages embed `{white}` / `{gray}` color tokens that operator
//! consoles render; [`strip_color_tokens`] removes them for plain output.

/// Tokens recognised by operator consoles.
const COLOR_TOKENS: &[&str] = &[
    "{white}", "{gray}", "{red}", "{green}", "{yellow}", "{aqua}",
];

/// `Started bot for <name>`.
#[must_use]
pub fn started(name: &str) -> String {
    format!("Started bot for {{white}}{name}{{gray}}")
}

/// Reply to a `start` for an agent whose session is already active.
#[must_use]
pub fn already_running(name: &str) -> String {
    format!("[{{white}}{name}{{gray}}] Bot is already running")
}

/// `Bot <name> has joined <service>`.
#[must_use]
pub fn joined(name: &str, service: &str) -> String {
    format!("Bot {{white}}{name}{{gray}} has joined {service}")
}

/// `Bot <name> got kicked with reason <reason>`.
#[must_use]
pub fn kicked(name: &str, reason: &str) -> String {
    format!("Bot {name} got kicked with reason {reason}")
}

/// `[<name>] Goal reached`.
#[must_use]
pub fn goal_reached(name: &str) -> String {
    format!("[{{white}}{name}{{gray}}] Goal reached")
}

/// `[<name>] Path found`.
#[must_use]
pub fn path_found(name: &str) -> String {
    format!("[{{white}}{name}{{gray}}] Path found")
}

/// Error raised by a named operator command.
#[must_use]
pub fn command_error(name: &str, command: &str, err: &impl std::fmt::Display) -> String {
    format!("[{{white}}{name}{{gray}}] An error occurred in {command}: {err}")
}

/// Closing notice sent to every operator before `exit` closes the channel.
pub const ENDING_CONNECTION: &str = "Ending connection";

/// Remove every color token from `message`.
#[must_use]
pub fn strip_color_tokens(message: &str) -> String {
    COLOR_TOKENS
        .iter()
        .fold(message.to_owned(), |acc, token| acc.replace(token, ""))
}

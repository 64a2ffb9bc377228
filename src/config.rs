//! Global configuration parsing, validation, and credential loading.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::login::MIN_LOGIN_PASSES;
use crate::models::AgentIdentity;
use crate::{AppError, Result};

/// Keychain service name used for the control password.
pub const KEYRING_SERVICE: &str = "agent-fleet";

/// Placeholder replaced with the agent secret in the login command.
pub const SECRET_PLACEHOLDER: &str = "{secret}";

/// Longest accepted game tick.
pub const MAX_TICK_MILLIS: u64 = 60_000;

/// Remote game service every agent connects to.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RemoteConfig {
    /// Host name of the remote service.
    #[serde(default = "default_remote_host")]
    pub host: String,
    /// Port of the remote service.
    #[serde(default = "default_remote_port")]
    pub port: u16,
    /// Protocol version requested from the session collaborator.
    #[serde(default = "default_remote_version")]
    pub version: String,
    /// Name of the service shown in the "joined" telemetry line.
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Chat command used to submit the credential; must contain `{secret}`.
    #[serde(default = "default_login_command")]
    pub login_command: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_remote_host(),
            port: default_remote_port(),
            version: default_remote_version(),
            display_name: default_display_name(),
            login_command: default_login_command(),
        }
    }
}

impl RemoteConfig {
    /// Render the login command for `secret`.
    #[must_use]
    pub fn login_command_for(&self, secret: &str) -> String {
        self.login_command.replace(SECRET_PLACEHOLDER, secret)
    }
}

/// Operator control-channel listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ControlConfig {
    /// Address the HTTP/WebSocket listener binds to.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Listener port; with `shared = false` agent `i` uses `port + i`.
    #[serde(default = "default_control_port")]
    pub port: u16,
    /// Host every agent on one listener.
    #[serde(default = "default_true")]
    pub shared: bool,
    /// Shared secret expected in the `password` query parameter.
    ///
    /// When absent it is loaded from the OS keychain or
    /// `FLEET_CONTROL_PASSWORD` by [`GlobalConfig::load_credentials`].
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_control_port(),
            shared: true,
            password: None,
        }
    }
}

/// Timing of the login handshake and restart loop.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimingConfig {
    /// Length of one game tick.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    /// Settle window of every login pass, in ticks.
    #[serde(default = "default_settle_ticks")]
    pub settle_ticks: u32,
    /// Settle window before the agent is declared ready, in ticks.
    #[serde(default = "default_ready_settle_ticks")]
    pub ready_settle_ticks: u32,
    /// Delay between a session ending and the next connect.
    #[serde(default = "default_restart_delay_millis")]
    pub restart_delay_millis: u64,
    /// Login passes required before the session is trusted.
    #[serde(default = "default_login_passes")]
    pub login_passes: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
            settle_ticks: default_settle_ticks(),
            ready_settle_ticks: default_ready_settle_ticks(),
            restart_delay_millis: default_restart_delay_millis(),
            login_passes: default_login_passes(),
        }
    }
}

impl TimingConfig {
    /// Duration of one tick.
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    /// Restart delay as a [`Duration`].
    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_millis)
    }
}

/// Sidecar process that speaks the remote protocol on behalf of a session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Executable launched once per session.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Whether the sidecar offers navigation (`goto`).
    #[serde(default = "default_true")]
    pub navigation: bool,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Newline-delimited `name:secret` credentials file.
    #[serde(default = "default_accounts_path")]
    pub accounts_path: PathBuf,
    /// Remote service settings.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Control-channel listener settings.
    #[serde(default)]
    pub control: ControlConfig,
    /// Login and restart timing.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Session sidecar settings.
    pub session: SessionConfig,
}

fn default_remote_host() -> String {
    "play.6b6t.org".into()
}

fn default_remote_port() -> u16 {
    25565
}

fn default_remote_version() -> String {
    "1.18".into()
}

fn default_display_name() -> String {
    "6b6t".into()
}

fn default_login_command() -> String {
    "/login {secret}".into()
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_control_port() -> u16 {
    25565
}

fn default_true() -> bool {
    true
}

fn default_tick_millis() -> u64 {
    50
}

fn default_settle_ticks() -> u32 {
    80
}

fn default_ready_settle_ticks() -> u32 {
    60
}

fn default_restart_delay_millis() -> u64 {
    2000
}

fn default_login_passes() -> u32 {
    2
}

fn default_accounts_path() -> PathBuf {
    PathBuf::from("accounts.txt")
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the control password when the TOML file omits it.
    ///
    /// Tries the `agent-fleet` keyring service first, then falls back to
    /// the `FLEET_CONTROL_PASSWORD` environment variable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no source provides a password.
    pub async fn load_credentials(&mut self) -> Result<()> {
        if self.control.password.as_deref().is_some_and(|p| !p.is_empty()) {
            return Ok(());
        }
        self.control.password =
            Some(load_credential("control_password", "FLEET_CONTROL_PASSWORD").await?);
        Ok(())
    }

    /// The resolved control password (empty until credentials load).
    #[must_use]
    pub fn control_password(&self) -> &str {
        self.control.password.as_deref().unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        if self.timing.login_passes < MIN_LOGIN_PASSES {
            return Err(AppError::Config(format!(
                "timing.login_passes must be at least {MIN_LOGIN_PASSES}"
            )));
        }

        if self.timing.tick_millis == 0 || self.timing.tick_millis > MAX_TICK_MILLIS {
            return Err(AppError::Config(format!(
                "timing.tick_millis must be between 1 and {MAX_TICK_MILLIS}"
            )));
        }

        if self.remote.host.trim().is_empty() {
            return Err(AppError::Config("remote.host must not be empty".into()));
        }

        if !self.remote.login_command.contains(SECRET_PLACEHOLDER) {
            return Err(AppError::Config(format!(
                "remote.login_command must contain {SECRET_PLACEHOLDER}"
            )));
        }

        if self.session.command.trim().is_empty() {
            return Err(AppError::Config("session.command must not be empty".into()));
        }

        Ok(())
    }
}

/// Read the credentials file at `path`.
///
/// # Errors
///
/// Returns `AppError::Config` if the file cannot be read or a line is
/// malformed.
pub fn load_accounts(path: impl AsRef<Path>) -> Result<Vec<AgentIdentity>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|err| {
        AppError::Config(format!("failed to read accounts {}: {err}", path.display()))
    })?;
    parse_accounts(&raw)
}

/// Parse newline-delimited `name:secret` pairs.
///
/// Blank lines are skipped and the secret is everything after the first
/// colon.
///
/// # Errors
///
/// Returns `AppError::Config` for a line without a colon, an empty name,
/// a duplicate name, or a file with no accounts at all.
pub fn parse_accounts(raw: &str) -> Result<Vec<AgentIdentity>> {
    let mut seen = HashSet::new();
    let mut accounts = Vec::new();

    for (index, line) in raw.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let line_no = index + 1;
        let (name, secret) = line.split_once(':').ok_or_else(|| {
            AppError::Config(format!("accounts line {line_no}: expected name:secret"))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Config(format!(
                "accounts line {line_no}: empty account name"
            )));
        }
        if !seen.insert(name.to_owned()) {
            return Err(AppError::Config(format!(
                "accounts line {line_no}: duplicate account {name}"
            )));
        }
        accounts.push(AgentIdentity::new(name, secret));
    }

    if accounts.is_empty() {
        return Err(AppError::Config("accounts file lists no accounts".into()));
    }

    Ok(accounts)
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}

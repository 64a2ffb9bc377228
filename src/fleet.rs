//! Fleet assembly: one supervisor per account, grouped onto control
//! listeners.
//!
//! With `control.shared = true` every agent is hosted on one listener and
//! operators address a single agent with the envelope's `agent` field.
//! Otherwise agent `i` (in credentials-file order) gets its own listener
//! on `control.port + i`.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::GlobalConfig;
use crate::control::server::bind_and_serve;
use crate::control::{ControlState, SubscriberSet};
use crate::models::AgentIdentity;
use crate::session::SessionConnector;
use crate::supervisor::{ConnectionSupervisor, SupervisorHandle, SupervisorSettings};
use crate::{AppError, Result};

/// Time given to operator writer tasks to flush closing notices.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Upper bound on waiting for a supervisor task after its session stopped.
const SUPERVISOR_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// One control listener and the agents it hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerPlan {
    /// Listener port.
    pub port: u16,
    /// Agents hosted on the listener.
    pub agents: Vec<AgentIdentity>,
}

/// Assign agents to listeners.
///
/// # Errors
///
/// Returns `AppError::Config` when per-agent ports overflow `u16`.
pub fn plan_listeners(config: &GlobalConfig, accounts: &[AgentIdentity]) -> Result<Vec<ListenerPlan>> {
    if config.control.shared {
        return Ok(vec![ListenerPlan {
            port: config.control.port,
            agents: accounts.to_vec(),
        }]);
    }

    accounts
        .iter()
        .enumerate()
        .map(|(index, identity)| {
            let port = u16::try_from(index)
                .ok()
                .and_then(|offset| config.control.port.checked_add(offset))
                .ok_or_else(|| {
                    AppError::Config(format!(
                        "no control port left for account {}",
                        identity.name
                    ))
                })?;
            Ok(ListenerPlan {
                port,
                agents: vec![identity.clone()],
            })
        })
        .collect()
}

/// All agents of this process.
pub struct AgentFleet {
    config: Arc<GlobalConfig>,
    accounts: Vec<AgentIdentity>,
    connector: Arc<dyn SessionConnector>,
}

impl AgentFleet {
    /// Create a fleet for `accounts`.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        accounts: Vec<AgentIdentity>,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        Self {
            config,
            accounts,
            connector,
        }
    }

    /// Run every supervisor and listener until `ct` fires, either from a
    /// signal or an operator `exit`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unusable listener layout.
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let plans = plan_listeners(&self.config, &self.accounts)?;
        let password = self.config.control_password().to_owned();

        let mut handles: Vec<SupervisorHandle> = Vec::new();
        let mut supervisor_tasks = Vec::new();
        let mut server_tasks: Vec<JoinHandle<()>> = Vec::new();

        for plan in plans {
            let subscribers = Arc::new(SubscriberSet::new());
            let mut agents = Vec::with_capacity(plan.agents.len());

            for identity in plan.agents {
                let settings = SupervisorSettings::from_config(&identity, &self.config);
                let supervisor = ConnectionSupervisor::new(
                    Arc::new(identity),
                    Arc::clone(&self.connector),
                    Arc::clone(&subscribers),
                    settings,
                );
                let (handle, task) = supervisor.spawn();
                agents.push(handle.clone());
                handles.push(handle);
                supervisor_tasks.push(task);
            }

            let state = Arc::new(ControlState::new(
                password.clone(),
                subscribers,
                agents,
                ct.clone(),
            ));
            let addr = format!("{}:{}", self.config.control.bind, plan.port);
            let server_ct = ct.clone();
            server_tasks.push(tokio::spawn(async move {
                if let Err(err) = bind_and_serve(&addr, state, server_ct.clone()).await {
                    error!(%err, "control listener failed");
                    server_ct.cancel();
                }
            }));
        }

        info!(agents = handles.len(), listeners = server_tasks.len(), "fleet running");

        ct.cancelled().await;
        info!("fleet shutting down");

        for handle in &handles {
            if let Err(err) = handle.stop().await {
                warn!(agent = handle.name(), %err, "failed to stop agent");
            }
        }
        drop(handles);

        for task in server_tasks {
            if let Err(err) = task.await {
                warn!(%err, "control listener task failed");
            }
        }
        for task in supervisor_tasks {
            match tokio::time::timeout(SUPERVISOR_EXIT_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(%err, "supervisor task failed"),
                Err(_) => warn!("supervisor task still running at shutdown"),
            }
        }

        tokio::time::sleep(DRAIN_GRACE).await;
        info!("fleet stopped");
        Ok(())
    }
}

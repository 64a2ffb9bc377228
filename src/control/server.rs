//! HTTP/WebSocket control listener.
//!
//! A single catch-all handler serves the whole port:
//! - plain HTTP requests get a static `success` body (reachability probe);
//! - WebSocket upgrades with the correct `password` query parameter join
//!   the [`SubscriberSet`] and have their frames dispatched as commands;
//! - upgrades with a wrong or missing password complete at the transport
//!   level but are never registered, and everything they send is dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::protocol::{parse_request, ControlRequest, ServerEvent};
use super::subscribers::{Outbound, SubscriberId, SubscriberSet};
use crate::models::{telemetry, BlockGoal};
use crate::supervisor::{AgentCommand, StartOutcome, SupervisorHandle};
use crate::{AppError, Result};

/// Shared state of one control listener.
pub struct ControlState {
    password: String,
    subscribers: Arc<SubscriberSet>,
    agents: Vec<SupervisorHandle>,
    shutdown: CancellationToken,
}

impl ControlState {
    /// Create listener state for `agents`.
    ///
    /// `shutdown` is cancelled by the `exit` command.
    #[must_use]
    pub fn new(
        password: impl Into<String>,
        subscribers: Arc<SubscriberSet>,
        agents: Vec<SupervisorHandle>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            password: password.into(),
            subscribers,
            agents,
            shutdown,
        }
    }

    /// The listener's operator connections.
    #[must_use]
    pub fn subscribers(&self) -> &Arc<SubscriberSet> {
        &self.subscribers
    }

    fn is_authorized(&self, provided: Option<&str>) -> bool {
        !self.password.is_empty() && provided == Some(self.password.as_str())
    }

    fn targets<'a>(
        &'a self,
        agent: Option<&'a str>,
    ) -> impl Iterator<Item = &'a SupervisorHandle> + 'a {
        self.agents
            .iter()
            .filter(move |handle| agent.is_none_or(|name| handle.name() == name))
    }

    /// Close every operator connection, stop hosted agents and trigger
    /// process shutdown.
    async fn exit(&self) {
        info!("exit requested by operator");
        let notified = self
            .subscribers
            .close_all(&ServerEvent::log(telemetry::ENDING_CONNECTION));
        debug!(notified, "operators notified of exit");
        for agent in &self.agents {
            if let Err(err) = agent.stop().await {
                warn!(agent = agent.name(), %err, "failed to stop agent on exit");
            }
        }
        self.shutdown.cancel();
    }
}

/// Build the control router.
pub fn router(state: Arc<ControlState>) -> Router {
    Router::new().fallback(catch_all).with_state(state)
}

/// Serve the control channel on an already-bound listener until `ct` fires.
///
/// As soon as `ct` fires every registered operator is sent the closing
/// notice and a close frame, before connections are drained.
///
/// # Errors
///
/// Returns `AppError::Control` if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<ControlState>, ct: CancellationToken) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|err| AppError::Control(format!("listener has no address: {err}")))?;
    info!(%addr, agents = state.agents.len(), "control channel listening");

    let subscribers = Arc::clone(&state.subscribers);
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        ct.cancelled().await;
        let notified = subscribers.close_all(&ServerEvent::log(telemetry::ENDING_CONNECTION));
        debug!(notified, "operators notified of shutdown");
    })
    .await
    .map_err(|err| AppError::Control(format!("control server error: {err}")))?;

    info!(%addr, "control channel shut down");
    Ok(())
}

/// Bind `addr` and serve until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Control` if binding or serving fails.
pub async fn bind_and_serve(addr: &str, state: Arc<ControlState>, ct: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Control(format!("failed to bind control channel on {addr}: {err}")))?;
    serve(listener, state, ct).await
}

/// Percent-decoded `password` query parameter of `uri`.
///
/// Returns `None` when the parameter is absent or the query is malformed.
fn query_password(uri: &Uri) -> Option<String> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .ok()
        .and_then(|Query(mut params)| params.remove("password"))
}

async fn catch_all(
    State(state): State<Arc<ControlState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(ws) = ws else {
        return "success".into_response();
    };

    let authorized = state.is_authorized(query_password(&uri).as_deref());
    ws.on_upgrade(move |socket| async move {
        if authorized {
            serve_operator(socket, state, peer).await;
        } else {
            drain_unauthorized(socket, &state.shutdown, peer).await;
        }
    })
}

/// Read and discard frames from a socket that failed authentication.
async fn drain_unauthorized(mut socket: WebSocket, shutdown: &CancellationToken, peer: SocketAddr) {
    debug!(%peer, "unauthenticated control connection left unregistered");
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => break,
            frame = socket.recv() => frame,
        };
        match frame {
            Some(Ok(Message::Close(_)) | Err(_)) | None => break,
            Some(Ok(_)) => {}
        }
    }
}

async fn serve_operator(socket: WebSocket, state: Arc<ControlState>, peer: SocketAddr) {
    let ip = peer.ip().to_canonical();
    let (id, outbound) = state.subscribers.subscribe();
    let span = info_span!("operator", %ip, subscriber = %id);

    async move {
        info!("operator connected to the control channel");
        let (sink, mut stream) = socket.split();
        tokio::spawn(write_outbound(sink, outbound).in_current_span());

        loop {
            let frame = tokio::select! {
                // Leave the queue registered: shutdown closes it with a notice.
                () = state.shutdown.cancelled() => return,
                frame = stream.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => handle_message(&state, id, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(%err, "control socket error");
                    break;
                }
            }
        }

        state.subscribers.remove(id);
        info!("operator disconnected");
    }
    .instrument(span)
    .await;
}

/// Drain one operator's queue into its socket.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Event(event) => {
                if sink.send(Message::Text(event.to_json().into())).await.is_err() {
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                break;
            }
        }
    }
}

/// Dispatch one text frame from an authenticated operator.
async fn handle_message(state: &ControlState, from: SubscriberId, raw: &str) {
    let Some(envelope) = parse_request(raw) else {
        return;
    };
    let agent = envelope.agent.as_deref();

    match envelope.request {
        ControlRequest::Ping => {
            state.subscribers.send_to(from, ServerEvent::pong_now());
        }
        ControlRequest::Start(flags) => {
            for handle in state.targets(agent) {
                match handle.start(flags.clone()).await {
                    Ok(StartOutcome::Started) => {}
                    Ok(StartOutcome::AlreadyActive) => {
                        state.subscribers.send_to(
                            from,
                            ServerEvent::log(telemetry::already_running(handle.name())),
                        );
                    }
                    Err(err) => warn!(agent = handle.name(), %err, "start failed"),
                }
            }
        }
        ControlRequest::Exit => state.exit().await,
        ControlRequest::Chat { text } => {
            for handle in state.targets(agent) {
                if let Err(err) = flatten(handle.dispatch(AgentCommand::Chat(text.clone())).await) {
                    warn!(agent = handle.name(), %err, "chat dropped");
                }
            }
        }
        ControlRequest::Goto { pos } => {
            let goal = BlockGoal::from_position(pos);
            for handle in state.targets(agent) {
                let result = match &goal {
                    Ok(goal) => flatten(handle.dispatch(AgentCommand::Navigate(*goal)).await),
                    Err(err) => Err(err.clone()),
                };
                if let Err(err) = result {
                    state.subscribers.send_to(
                        from,
                        ServerEvent::log(telemetry::command_error(handle.name(), "goto", &err)),
                    );
                }
            }
        }
        ControlRequest::Eat => {
            for handle in state.targets(agent) {
                if let Err(err) = flatten(handle.dispatch(AgentCommand::Feed).await) {
                    state.subscribers.broadcast(&ServerEvent::log(telemetry::command_error(
                        handle.name(),
                        "eat",
                        &err,
                    )));
                }
            }
        }
    }
}

fn flatten(result: Result<Result<()>>) -> Result<()> {
    result.and_then(|inner| inner)
}

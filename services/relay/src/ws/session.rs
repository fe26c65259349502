//! Manages the lifecycle of one relayed client connection.

use super::{
    client::{AxumTransport, ClientChannel, ClientTransport},
    error::{Outcome, RelayError},
    interrupt::{InterruptController, InterruptEvent, Transition},
    protocol::ClientMessage,
    registry::SessionRegistry,
    upstream::{ReconnectPolicy, Upstream},
};
use crate::{config::ReconnectSettings, state::AppState};
use axum::{
    extract::{Path, State, WebSocketUpgrade, ws::WebSocket},
    response::Response,
};
use gemini_realtime::{LiveConnection, ServerMessage as UpstreamMessage};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};
use tracing::{Instrument, debug, error, info, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

async fn handle_socket(socket: WebSocket, client_id: String, state: Arc<AppState>) {
    let span = tracing::info_span!("relay_session", %client_id);
    async move {
        info!("New WebSocket connection. Awaiting config...");
        let upstream: Arc<dyn Upstream> =
            Arc::new(LiveConnection::new(state.config.live_endpoint()));
        let session = RelaySession::new(
            client_id,
            ClientChannel::new(AxumTransport::new(socket)),
            upstream,
            state.registry.clone(),
            state.config.reconnect.clone(),
        );
        match session.run().await {
            Ok(()) => info!("Relay session finished."),
            Err(e) => error!(error = %e, "Relay session terminated with error."),
        }
    }
    .instrument(span)
    .await
}

/// One client connection bridged to one upstream connection.
///
/// Registered on construction; [`RelaySession::close`] runs exactly once,
/// from [`RelaySession::run`] or, if the session is dropped early, from
/// `Drop`.
pub struct RelaySession<T> {
    client_id: String,
    generation: u64,
    client: ClientChannel<T>,
    upstream: Arc<dyn Upstream>,
    interrupt: InterruptController,
    registry: Arc<SessionRegistry>,
    reconnect: ReconnectSettings,
    closed: AtomicBool,
}

impl<T: ClientTransport> RelaySession<T> {
    pub fn new(
        client_id: String,
        client: ClientChannel<T>,
        upstream: Arc<dyn Upstream>,
        registry: Arc<SessionRegistry>,
        reconnect: ReconnectSettings,
    ) -> Self {
        let generation = registry.register(&client_id, upstream.clone());
        Self {
            client_id,
            generation,
            client,
            upstream,
            interrupt: InterruptController::new(),
            registry,
            reconnect,
            closed: AtomicBool::new(false),
        }
    }

    /// Drives the session to completion and tears it down.
    ///
    /// Either side closing is a normal end and yields `Ok(())`.
    pub async fn run(&self) -> Result<(), RelayError> {
        let result = self.relay().await;
        self.close().await;
        match result {
            Err(e) if e.is_disconnect() => Ok(()),
            other => other,
        }
    }

    async fn relay(&self) -> Result<(), RelayError> {
        let config = self.client.accept_first_config().await?;
        info!(voice = %config.voice, "Received session config.");
        self.upstream.set_config(config)?;
        self.upstream.connect().await?;
        info!("Upstream connected. Relaying...");

        // Whichever pump stops first cancels the other by dropping it.
        let reason = tokio::select! {
            reason = self.client_pump() => {
                info!(%reason, "Client pump stopped.");
                reason
            }
            reason = self.upstream_pump() => {
                info!(%reason, "Upstream pump stopped.");
                reason
            }
        };
        Err(reason)
    }

    /// Forwards client messages upstream until a fatal condition.
    async fn client_pump(&self) -> RelayError {
        let mut reconnect = ReconnectPolicy::new(self.reconnect.clone());
        loop {
            let msg = match self.client.receive_next().await {
                Outcome::Ok(msg) => msg,
                Outcome::Skip(reason) => {
                    warn!(%reason, "Skipping client message.");
                    continue;
                }
                Outcome::Fatal(e) => return e,
            };
            match msg {
                ClientMessage::Audio { data } => {
                    if self.interrupt.apply(InterruptEvent::AudioReceived) == Transition::Resumed {
                        debug!("Audio after interrupt; forwarding output again.");
                    }
                    if !self.upstream.is_connected() {
                        if !reconnect.ready(Instant::now()) {
                            warn!("Upstream is down and reconnect is backing off; dropping audio.");
                            continue;
                        }
                        info!("Upstream connection is closed. Reconnecting...");
                        match self.upstream.connect().await {
                            Ok(_) => reconnect.record_success(),
                            Err(e) => {
                                warn!(error = %e, "Upstream reconnect failed; dropping audio.");
                                if let Err(fatal) = reconnect.record_failure(Instant::now()) {
                                    return fatal;
                                }
                                continue;
                            }
                        }
                    }
                    if let Err(e) = self.upstream.send_audio(&data).await {
                        warn!(error = %e, "Failed to forward audio upstream.");
                    }
                }
                ClientMessage::Image { data } => {
                    if let Err(e) = self.upstream.send_image(&data).await {
                        warn!(error = %e, "Failed to forward image upstream.");
                    }
                }
                ClientMessage::Interrupt => {
                    info!("Received interrupt from client; canceling current generation.");
                    if self.interrupt.apply(InterruptEvent::InterruptReceived)
                        == Transition::Acknowledge
                    {
                        if let Err(e) = self.client.acknowledge_interrupt().await {
                            return e;
                        }
                    }
                }
                ClientMessage::Config { .. } => {
                    warn!("Ignoring `config` after the session was configured.");
                }
                ClientMessage::Unknown => warn!("Ignoring client message of unknown type."),
            }
        }
    }

    /// Forwards generated audio and turn completions to the client until
    /// either transport closes.
    async fn upstream_pump(&self) -> RelayError {
        loop {
            let frame = match self.upstream.receive().await {
                Ok(frame) => frame,
                Err(e) => return e,
            };
            let msg = match UpstreamMessage::parse(&frame) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "Could not decode upstream frame.");
                    continue;
                }
            };

            for data in msg.inline_data() {
                if !self.interrupt.should_forward() {
                    debug!("Dropping audio fragment of interrupted turn.");
                    continue;
                }
                debug!(bytes = data.len(), "Sending audio response.");
                if let Err(e) = self.client.send_audio(data).await {
                    return e;
                }
            }

            if msg.is_turn_complete() && self.interrupt.should_forward() {
                if let Err(e) = self.client.send_turn_complete().await {
                    return e;
                }
            }
        }
    }
}

impl<T> RelaySession<T> {
    /// Closes the upstream and removes the registry entry. Runs once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.upstream.close().await;
        self.registry.release(&self.client_id, self.generation);
        info!(client_id = %self.client_id, "Session cleaned up.");
    }
}

impl<T> Drop for RelaySession<T> {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registry.release(&self.client_id, self.generation);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let upstream = self.upstream.clone();
            runtime.spawn(async move { upstream.close().await });
        }
    }
}

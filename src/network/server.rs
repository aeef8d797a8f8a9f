//! WebSocket transport (§5): accepts connections, assigns each one a
//! controller id, and pumps frames between the socket and
//! [`crate::network::dispatcher`]. Carries no game logic of its own.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{OutboundFrame, Subscriber};
use crate::error::CoreError;
use crate::lifecycle::{self, AppState};
use crate::network::protocol::{ClientMessage, ErrorPayload, ServerMessage};
use crate::network::ratelimit::RateLimiter;

/// Transport-level server configuration; the game-rule timers and storage
/// backend selection live on [`crate::config::Config`] instead.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to accept WebSocket connections on.
    pub bind_addr: String,
    /// Maximum concurrent connections before new ones are rejected.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:8080".to_string(), max_connections: 10_000 }
    }
}

/// Errors from running or binding the WebSocket server.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// The listener failed to bind.
    #[error("failed to bind {0}: {1}")]
    BindFailed(String, std::io::Error),

    /// Too many concurrent connections.
    #[error("connection limit reached")]
    ConnectionLimitReached,
}

#[allow(dead_code)]
struct ConnectedClient {
    controller_id: String,
    connected_at: Instant,
}

/// The WebSocket accept loop and per-connection dispatch glue.
pub struct GameServer {
    config: ServerConfig,
    state: Arc<AppState>,
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    ip_limiter: Arc<RateLimiter>,
    conn_limiter: Arc<RateLimiter>,
    next_subscriber_id: Arc<AtomicU64>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Construct a server around shared application state.
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            ip_limiter: Arc::new(RateLimiter::new()),
            conn_limiter: Arc::new(RateLimiter::new()),
            next_subscriber_id: Arc::new(AtomicU64::new(1)),
            shutdown_tx,
        }
    }

    /// Number of connections currently tracked.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Run the accept loop until [`GameServer::shutdown`] is called.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| GameServerError::BindFailed(self.config.bind_addr.clone(), e))?;
        info!(addr = %self.config.bind_addr, "websocket server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.clients.read().await.len() >= self.config.max_connections {
                                warn!(%addr, "connection limit reached, rejecting");
                                continue;
                            }
                            self.handle_connection(stream, addr);
                        }
                        Err(err) => error!(error = %err, "accept error"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Broadcast the shutdown signal and give in-flight connections their
    /// drain grace period (§4.8/§5).
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        lifecycle::drain_for_shutdown(crate::config::SHUTDOWN_DRAIN).await;
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let state = self.state.clone();
        let ip_limiter = self.ip_limiter.clone();
        let conn_limiter = self.conn_limiter.clone();
        let next_subscriber_id = self.next_subscriber_id.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let allowed_origins = state.config.clone();

        tokio::spawn(async move {
            let ws_stream = match accept_hdr_async(stream, move |req: &Request, response: Response| {
                let origin_ok = req
                    .headers()
                    .get("origin")
                    .and_then(|v| v.to_str().ok())
                    .map(|origin| allowed_origins.origin_allowed(origin))
                    .unwrap_or(true);
                if origin_ok {
                    Ok(response)
                } else {
                    let rejection: ErrorResponse = Response::builder()
                        .status(StatusCode::FORBIDDEN)
                        .body(Some("origin not allowed".to_string()))
                        .expect("building a static error response cannot fail");
                    Err(rejection)
                }
            })
            .await
            {
                Ok(ws) => ws,
                Err(err) => {
                    error!(%addr, error = %err, "websocket handshake failed");
                    return;
                }
            };

            let controller_id = uuid::Uuid::new_v4().to_string();
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundFrame>();

            clients.write().await.insert(
                addr,
                ConnectedClient { controller_id: controller_id.clone(), connected_at: Instant::now() },
            );

            let client_id_payload = ServerMessage::ClientId { client_id: controller_id.clone() }
                .to_json()
                .unwrap_or_default();
            let _ = out_tx.send(OutboundFrame::Data(client_id_payload.into_bytes().into()));

            let sender_task = tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    match frame {
                        OutboundFrame::Data(bytes) => {
                            let text = String::from_utf8_lossy(&bytes).into_owned();
                            if ws_sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        OutboundFrame::Close { code, reason } => {
                            let close_frame = CloseFrame { code: CloseCode::from(code), reason: reason.into() };
                            let _ = ws_sender.send(Message::Close(Some(close_frame))).await;
                            break;
                        }
                    }
                }
            });

            let mut session_id: Option<String> = None;
            let ip_key = addr.ip().to_string();
            let subscriber_id = next_subscriber_id.fetch_add(1, Ordering::SeqCst);

            loop {
                tokio::select! {
                    incoming = ws_receiver.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if !ip_limiter.check(&ip_key) || !conn_limiter.check(&controller_id) {
                                    send_error(&out_tx, CoreError::RateLimitExceeded);
                                    continue;
                                }
                                handle_frame(
                                    &state,
                                    &mut session_id,
                                    &controller_id,
                                    &text,
                                    &out_tx,
                                    subscriber_id,
                                ).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(%addr, "client disconnected");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(%addr, error = %err, "websocket read error");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            sender_task.abort();
            clients.write().await.remove(&addr);
            ip_limiter.forget(&ip_key);
            conn_limiter.forget(&controller_id);
            if let Some(id) = session_id {
                state.bus.unregister(&id, subscriber_id);
                if let Err(err) = lifecycle::auto_pause_if_abandoned(&state, &id).await {
                    warn!(session_id = %id, error = %err, "auto-pause on disconnect failed");
                }
            }
        });
    }
}

fn send_error(out_tx: &mpsc::UnboundedSender<OutboundFrame>, err: CoreError) {
    let payload = ServerMessage::Error(ErrorPayload { message: err.wire_message(), kind: err.kind().as_label() });
    if let Ok(json) = payload.to_json() {
        let _ = out_tx.send(OutboundFrame::Data(json.into_bytes().into()));
    }
}

async fn handle_frame(
    state: &Arc<AppState>,
    session_id: &mut Option<String>,
    controller_id: &str,
    text: &str,
    out_tx: &mpsc::UnboundedSender<OutboundFrame>,
    subscriber_id: u64,
) {
    let msg = match ClientMessage::from_json(text) {
        Ok(m) => m,
        Err(err) => {
            debug!(error = %err, "malformed inbound frame");
            send_error(out_tx, CoreError::InvalidJson(err.to_string()));
            return;
        }
    };

    if let ClientMessage::Create { name, mode, settings } = &msg {
        let parsed_settings = match settings.clone().into_settings() {
            Ok(s) => s,
            Err(err) => {
                send_error(out_tx, err);
                return;
            }
        };
        let name = crate::core::sanitize::sanitize_name(name);
        let mode = crate::network::protocol::parse_mode(mode);
        match state.create_session(name, mode, parsed_settings).await {
            Ok(session) => {
                attach_to_session(state, session_id, &session.id, out_tx, subscriber_id).await;
                let _ = crate::network::dispatcher::dispatch(state, &session.id, controller_id, ClientMessage::Join { game_id: session.id.clone() }).await;
            }
            Err(err) => send_error(out_tx, err),
        }
        return;
    }

    if let ClientMessage::Join { game_id } = &msg {
        match state.load(game_id).await {
            Ok(Some(_)) => attach_to_session(state, session_id, game_id, out_tx, subscriber_id).await,
            Ok(None) => {
                send_error(out_tx, CoreError::GameNotFound);
                return;
            }
            Err(err) => {
                send_error(out_tx, err);
                return;
            }
        }
    }

    let Some(id) = session_id.clone() else {
        send_error(out_tx, CoreError::GameNotFound);
        return;
    };

    match crate::network::dispatcher::dispatch(state, &id, controller_id, msg).await {
        Ok(replies) => {
            for reply in replies {
                if let Ok(json) = reply.to_json() {
                    let _ = out_tx.send(OutboundFrame::Data(json.into_bytes().into()));
                }
            }
        }
        Err(err) => send_error(out_tx, err),
    }
}

async fn attach_to_session(
    state: &Arc<AppState>,
    session_id: &mut Option<String>,
    id: &str,
    out_tx: &mpsc::UnboundedSender<OutboundFrame>,
    subscriber_id: u64,
) {
    if session_id.as_deref() == Some(id) {
        return;
    }
    if let Some(previous) = session_id.take() {
        state.bus.unregister(&previous, subscriber_id);
    }
    state.bus.register(
        id,
        Subscriber { id: subscriber_id, sender: out_tx.clone(), buffered_bytes: Arc::new(AtomicUsize::new(0)) },
    );
    state.ensure_invalidation_relay(id).await;
    state.bus.ensure_remote_relay(id).await;
    *session_id = Some(id.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_default_binds_all_interfaces() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
    }
}

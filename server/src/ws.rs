use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::participant::display_name;
use crate::protocol::{ClientMsg, Delivery, ServerMsg, Target};
use crate::relay_loop::{run_relay_loop, RelayCommand};

/// Per-connection abuse limits
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_message_bytes: usize,
    pub max_parse_errors: u32,
    pub max_messages_per_sec: u32,
}

impl From<&ServerConfig> for ConnectionLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_message_bytes: config.max_message_bytes,
            max_parse_errors: config.max_parse_errors,
            max_messages_per_sec: config.max_messages_per_sec,
        }
    }
}

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub relay_tx: mpsc::Sender<RelayCommand>,
    pub broadcast_tx: broadcast::Sender<Delivery>,
    pub limits: ConnectionLimits,
    pub connection_semaphore: Arc<Semaphore>,
    pub allowed_origins: Arc<Vec<String>>,
}

/// Spawn the relay loop and return the state the HTTP layer needs.
pub fn spawn_relay(config: &ServerConfig) -> AppState {
    let (relay_tx, relay_rx) = mpsc::channel::<RelayCommand>(config.command_capacity);
    let (broadcast_tx, _) = broadcast::channel::<Delivery>(config.broadcast_capacity);

    let loop_tx = broadcast_tx.clone();
    let loop_config = config.clone();
    tokio::spawn(async move {
        run_relay_loop(relay_rx, loop_tx, loop_config).await;
    });

    AppState {
        relay_tx,
        broadcast_tx,
        limits: ConnectionLimits::from(config),
        connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
        allowed_origins: Arc::new(config.allowed_origins.clone()),
    }
}

/// HTTP routes: `/ws` for the relay, `/health` for probes.
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn health() -> &'static str {
    "ok"
}

/// Query string accepted on `/ws`.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub name: Option<String>,
}

/// HTTP handler for WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
    State(app_state): State<AppState>,
) -> Response {
    if !origin_allowed(&headers, &app_state.allowed_origins) {
        tracing::warn!("Rejected connection from origin {:?}", headers.get("origin"));
        return StatusCode::FORBIDDEN.into_response();
    }

    let name = match params.name.as_deref().map(display_name).transpose() {
        Ok(name) => name.flatten(),
        Err(e) => {
            tracing::warn!("Rejected connection: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let permit = match app_state.connection_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!("Connection limit reached, rejecting");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, app_state, name, permit))
}

fn origin_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|origin| allowed.iter().any(|a| a == origin))
}

type WsSink = SplitSink<WebSocket, Message>;

async fn handle_socket(
    socket: WebSocket,
    app_state: AppState,
    name: Option<String>,
    _permit: OwnedSemaphorePermit,
) {
    let (mut sink, mut stream) = socket.split();

    // Subscribe before joining so nothing published after our init is missed
    let mut broadcast_rx = app_state.broadcast_tx.subscribe();

    let (resp_tx, resp_rx) = oneshot::channel();
    if app_state
        .relay_tx
        .send(RelayCommand::Join {
            name,
            response: resp_tx,
        })
        .await
        .is_err()
    {
        tracing::error!("Failed to send Join command");
        return;
    }

    let my_id = match resp_rx.await {
        Ok(id) => id,
        Err(_) => {
            tracing::error!("Failed to receive participant id");
            return;
        }
    };

    tracing::info!("Participant {} connected", my_id);

    let limiter = message_limiter(app_state.limits.max_messages_per_sec);
    let mut initialized = false;
    let mut parse_errors: u32 = 0;

    loop {
        tokio::select! {
            // Client -> Relay
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > app_state.limits.max_message_bytes {
                            tracing::warn!(
                                "Participant {} sent oversized message ({} bytes)",
                                my_id,
                                text.len()
                            );
                            close(&mut sink, close_code::SIZE, "message too large").await;
                            break;
                        }
                        if limiter.check().is_err() {
                            tracing::warn!("Participant {} exceeded message rate", my_id);
                            close(&mut sink, close_code::POLICY, "rate limit exceeded").await;
                            break;
                        }

                        match serde_json::from_str::<ClientMsg>(&text) {
                            Ok(client_msg) => {
                                parse_errors = 0;
                                let cmd = RelayCommand::Client { sender: my_id, msg: client_msg };
                                if app_state.relay_tx.send(cmd).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                parse_errors += 1;
                                tracing::warn!(
                                    "Participant {} sent malformed message ({}/{}): {}",
                                    my_id,
                                    parse_errors,
                                    app_state.limits.max_parse_errors,
                                    e
                                );
                                if parse_errors >= app_state.limits.max_parse_errors {
                                    close(&mut sink, close_code::POLICY, "too many malformed messages").await;
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        parse_errors += 1;
                        tracing::warn!("Participant {} sent binary frame", my_id);
                        if parse_errors >= app_state.limits.max_parse_errors {
                            close(&mut sink, close_code::UNSUPPORTED, "binary frames not supported").await;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!("Participant {} socket error: {}", my_id, e);
                        break;
                    }
                    _ => {} // Ignore ping/pong
                }
            }

            // Relay -> Client
            result = broadcast_rx.recv() => {
                match result {
                    Ok(delivery) => {
                        // Everything published before our own init predates the snapshot
                        if !initialized {
                            let is_own_init = delivery.target == Target::Only(my_id)
                                && matches!(delivery.msg, ServerMsg::Init(_));
                            if !is_own_init {
                                continue;
                            }
                            initialized = true;
                        }
                        if !delivery.target.includes(my_id) {
                            continue;
                        }
                        if send_msg(&mut sink, &delivery.msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        if !initialized {
                            tracing::warn!("Participant {} lost its init snapshot", my_id);
                            close(&mut sink, close_code::AGAIN, "server busy").await;
                            break;
                        }
                        // Best effort: the next playerUpdate resynchronizes positions
                        tracing::warn!("Participant {} lagged by {} messages", my_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    // Cleanup on disconnect
    let _ = app_state
        .relay_tx
        .send(RelayCommand::Leave { id: my_id })
        .await;
    tracing::info!("Participant {} disconnected", my_id);
}

fn message_limiter(per_sec: u32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(
        NonZeroU32::new(per_sec).unwrap_or(NonZeroU32::MIN),
    ))
}

async fn send_msg(sink: &mut WsSink, msg: &ServerMsg) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize {:?}: {}", msg, e);
            return Ok(());
        }
    };
    sink.send(Message::Text(json.into())).await
}

async fn close(sink: &mut WsSink, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}

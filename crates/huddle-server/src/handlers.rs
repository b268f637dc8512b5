//! HTTP and WebSocket handlers for the Huddle server.
//!
//! Long-poll clients use `/join`, `/send`, `/recv` and `/part`. Clients that
//! can hold a WebSocket open attach one at `/ws` after joining and receive
//! events as they happen; `/recv` keeps working for them as well.

use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::push::{encode_message, Outbox, WsPushChannel};
use crate::room::Room;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{codec, ClientFrame, ProtocolError, ServerFrame, WireFormat};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The chat room.
    pub room: Room,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            room: Room::new(&config),
            config,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NickQuery {
    nick: String,
}

#[derive(Debug, Deserialize)]
struct SendQuery {
    nick: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhoQuery {
    #[serde(default)]
    present: bool,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    nick: String,
    #[serde(default)]
    format: WireFormat,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/join", post(join_handler))
        .route("/part", post(part_handler))
        .route("/send", post(send_handler))
        .route("/recv", get(recv_handler))
        .route("/who", get(who_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler));

    if state.config.websocket.enabled {
        app = app.route(&state.config.websocket.path, get(ws_handler));
    }

    app.with_state(state)
}

/// Run the HTTP/WebSocket server until interrupted.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;

    info!("Huddle server listening on {}", addr);
    if config.websocket.enabled {
        info!("WebSocket endpoint: ws://{}{}", addr, config.websocket.path);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Huddle server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn join_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NickQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let members = state.room.join(&query.nick)?;
    Ok(Json(serde_json::json!({
        "identifier": query.nick,
        "members": members,
    })))
}

async fn part_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NickQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.room.part(&query.nick)?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn send_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SendQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let dispatch = state.room.say(&query.nick, &query.text)?;
    Ok(Json(serde_json::json!({
        "pushed": dispatch.pushed,
        "buffered": dispatch.buffered,
    })))
}

/// Long-poll handler.
async fn recv_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NickQuery>,
) -> Result<impl IntoResponse, ApiError> {
    debug!(nick = %query.nick, "Poll");
    let events = state.room.poll(&query.nick).await?;
    Ok(Json(events))
}

async fn who_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WhoQuery>,
) -> impl IntoResponse {
    Json(state.room.who(query.present))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.room.stats())
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.room.registry().has_identifier(&query.nick) {
        return Err(ApiError::UnknownNick(query.nick));
    }

    Ok(ws
        .max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, query.nick, query.format)))
}

/// Handle a WebSocket connection attached to `nick`.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    nick: String,
    format: WireFormat,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut outgoing) = mpsc::unbounded_channel::<Message>();

    // Writer task: owns the sink so the push channel never awaits.
    let writer = tokio::spawn(async move {
        while let Some(message) = outgoing.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    send_frame(&outbox, format, &ServerFrame::welcome(&nick));

    let participant = match state
        .room
        .attach(&nick, WsPushChannel::new(outbox.clone(), format))
    {
        Ok(participant) => participant,
        Err(e) => {
            warn!(nick = %nick, error = %e, "Push channel refused");
            let frame = ServerFrame::error(e.status().as_u16(), e.to_string());
            send_frame(&outbox, format, &frame);
            let _ = outbox.send(Message::Close(None));
            let _ = writer.await;
            return;
        }
    };

    debug!(nick = %nick, "WebSocket attached");

    // Read buffer for partial MessagePack frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                match codec::decode::<ClientFrame>(WireFormat::Json, text.as_bytes()) {
                    Ok(frame) => handle_frame(frame, &nick, &state, &outbox, format),
                    Err(e) => reject_frame(&outbox, format, &nick, &e),
                }
            }
            Ok(Message::Binary(data)) => {
                read_buffer.extend_from_slice(&data);
                loop {
                    match codec::decode_from::<ClientFrame>(&mut read_buffer) {
                        Ok(Some(frame)) => handle_frame(frame, &nick, &state, &outbox, format),
                        Ok(None) => break,
                        Err(e) => {
                            reject_frame(&outbox, format, &nick, &e);
                            read_buffer.clear();
                            break;
                        }
                    }
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // axum answers pings itself
            }
            Ok(Message::Close(_)) => {
                debug!(nick = %nick, "Received close frame");
                break;
            }
            Err(e) => {
                warn!(nick = %nick, error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
        }
    }

    // Cleanup: stop the writer, then detach our channel unless it was replaced.
    writer.abort();
    let _ = writer.await;
    participant.detach_if_closed();

    debug!(nick = %nick, "WebSocket disconnected");
}

/// Handle a decoded client frame.
fn handle_frame(
    frame: ClientFrame,
    nick: &str,
    state: &AppState,
    outbox: &Outbox,
    format: WireFormat,
) {
    match frame {
        ClientFrame::Send { text } => {
            if let Err(e) = state.room.say(nick, &text) {
                warn!(nick = %nick, error = %e, "Send failed");
                metrics::record_error(e.kind());
                let frame = ServerFrame::error(e.status().as_u16(), e.to_string());
                send_frame(outbox, format, &frame);
            }
        }
        ClientFrame::Ping { timestamp } => {
            send_frame(outbox, format, &ServerFrame::pong(timestamp));
        }
    }
}

fn reject_frame(outbox: &Outbox, format: WireFormat, nick: &str, error: &ProtocolError) {
    warn!(nick = %nick, error = %error, "Undecodable frame");
    metrics::record_error("protocol");
    send_frame(outbox, format, &ServerFrame::error(400, error.to_string()));
}

/// Queue a frame on the connection's outbox.
fn send_frame(outbox: &Outbox, format: WireFormat, frame: &ServerFrame) {
    match encode_message(format, frame) {
        Ok(message) => {
            // A closed outbox means the connection is already going away.
            let _ = outbox.send(message);
        }
        Err(e) => error!(error = %e, "Failed to encode frame"),
    }
}

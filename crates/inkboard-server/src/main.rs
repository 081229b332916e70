//! InkBoard WebSocket Relay Server
//!
//! Relays board events between clients in the same room and keeps each
//! room's event log so that clients can resync after a disconnect.
//!
//! ## Protocol
//!
//! Messages are JSON tagged by `type`:
//! ```json
//! { "type": "join", "room": "room-id", "participant": "optional-id" }
//! { "type": "publish", "event": { "kind": "clear", "participantId": "a", "logicalClock": 3, "timestampMillis": 0, "payload": {} } }
//! { "type": "resync", "since": { "a": 2 } }
//! ```

mod config;
mod session;
mod state;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use inkboard_core::{ClientMessage, ServerMessage};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::session::Session;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkboard_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let state = Arc::new(AppState::new(config.channel_capacity));

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("InkBoard relay server listening on {}", config.addr);
    info!("WebSocket endpoint: ws://{}/ws", config.addr);

    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "InkBoard Relay Server - Connect via WebSocket at /ws"
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    rooms: usize,
    peers: usize,
}

/// Health check
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        rooms: state.room_count(),
        peers: state.peer_count(),
    })
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_message(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New connection");

    let (mut sender, mut receiver) = socket.split();
    let mut session = Session::new();

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let replies = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => session.handle(&state, client_msg),
                            Err(e) => {
                                warn!("Invalid message: {}", e);
                                vec![ServerMessage::Error { message: format!("Invalid message: {}", e) }]
                            }
                        };
                        let mut failed = false;
                        for reply in &replies {
                            if send_message(&mut sender, reply).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ignore binary and ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }

            // Handle broadcast messages from room
            relayed = session.next_relayed() => {
                match relayed {
                    Ok(msg) => {
                        if send_message(&mut sender, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // The client resyncs on reconnect.
                        warn!("Peer {:?} lagged by {} messages, closing", session.participant(), skipped);
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    // Cleanup on disconnect
    session.leave(&state);
    info!("Connection closed: {:?}", session.participant());
}

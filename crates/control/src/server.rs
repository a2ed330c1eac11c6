//! HTTP control surface, modelled on this codebase's axum server pattern:
//! shared `Arc` state, CORS + tracing layers, and a websocket route for the
//! live broadcast feed.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::commands::{Command, CommandExecutor};
use crate::handle::EngineHandle;

/// Serves the control surface: `POST /control`, `GET /health`, `GET /ws`.
pub struct ControlServer {
    handle: EngineHandle,
}

impl ControlServer {
    #[must_use]
    pub fn new(handle: EngineHandle) -> Self {
        Self { handle }
    }

    #[must_use]
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(health))
            .route("/control", post(control))
            .route("/ws", get(ws_handler))
            .with_state(self.handle.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// # Errors
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("control surface listening on {}", addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn health(State(handle): State<EngineHandle>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "pair_base": handle.pair_base,
        "paused": handle.gate.is_paused(),
        "open_positions": handle.positions.open_count(),
        "uptime_seconds": handle.uptime_seconds(),
    }))
}

#[derive(Deserialize)]
struct ControlRequest {
    command: String,
}

/// Accepts any of the §6 commands as a raw string (e.g. `"set threshold
/// 18"`), so the same grammar works unchanged from a CLI REPL or a future
/// messaging-bot front end.
async fn control(
    State(handle): State<EngineHandle>,
    Json(req): Json<ControlRequest>,
) -> Response {
    match req.command.parse::<Command>() {
        Ok(command) => {
            let reply = CommandExecutor::new(handle).execute(command).await;
            Json(reply).into_response()
        }
        Err(err) => (StatusCode::BAD_REQUEST, Json(json!({ "ok": false, "error": err.to_string() })))
            .into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(handle): State<EngineHandle>) -> Response {
    ws.on_upgrade(|socket| ws_connection(socket, handle))
}

/// Streams every `BotEvent` (edge broadcasts and terminal notifications) as
/// a JSON text frame to one read-only observer, per the spec's broadcast
/// feed.
async fn ws_connection(mut socket: WebSocket, handle: EngineHandle) {
    let mut rx = handle.events.subscribe();
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let json = serde_json::to_string(&event).unwrap_or_default();
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }
    tracing::debug!("control surface websocket connection closed");
}

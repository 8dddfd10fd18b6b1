// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.

use crate::websocket::{ConnectionHandler, Role};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use rideshare_common::ServerEvent;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

/// Connection identity, resolved by the identity collaborator at the edge and
/// carried on the upgrade request. The subject is trusted for the lifetime of
/// the connection.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub role: Role,
    pub subject: String,
}

/// Create the WebSocket router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Handler for WebSocket connections
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    counter!(crate::metrics::WS_CONNECTION).increment(1);
    gauge!(crate::metrics::WS_ACTIVE).increment(1.0);

    ws.on_upgrade(move |socket| handle_connection(socket, state, query))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, query: ConnectQuery) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Outbound channel: everything addressed to this client funnels through
    // it, direct replies and room traffic alike.
    let (client_tx, mut client_rx) = mpsc::channel::<ServerEvent>(32);

    let send_task = tokio::spawn(async move {
        while let Some(event) = client_rx.recv().await {
            let Ok(json) = serde_json::to_string(&event) else {
                tracing::error!(?event, "failed to serialize outbound event");
                continue;
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    tracing::info!(subject = %query.subject, role = ?query.role, "client connected");
    let mut handler =
        ConnectionHandler::new(state, query.subject.clone(), query.role, client_tx.clone());

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => {
                let event = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(err) => {
                        let reply = ServerEvent::Error {
                            code: "MALFORMED_EVENT".to_string(),
                            message: err.to_string(),
                        };
                        if client_tx.send(reply).await.is_err() {
                            break;
                        }
                        continue;
                    },
                };

                match handler.handle_event(event).await {
                    Ok(Some(reply)) => {
                        if client_tx.send(reply).await.is_err() {
                            break;
                        }
                    },
                    Ok(None) => {},
                    Err(err) => {
                        tracing::debug!(subject = %query.subject, %err, "event rejected");
                        if client_tx.send(err.to_event()).await.is_err() {
                            break;
                        }
                    },
                }
            },
            Message::Close(_) => break,
            _ => {},
        }
    }

    // Cleanup: availability self-heal and active-ride cascade for drivers
    handler.disconnected().await;
    tracing::info!(subject = %query.subject, "client disconnected");

    gauge!(crate::metrics::WS_ACTIVE).decrement(1.0);
    send_task.abort();
}

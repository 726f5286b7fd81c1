//! The WebSocket surface.
//!
//! One duplex channel per client session: connect, receive
//! `connection_established`, then `monitoring_errors` pushes for as long
//! as the tenant's cycles report anything. Connects outside the trading
//! window are refused before the upgrade.

use crate::registry::ConnectionRegistry;
use crate::window::TradingWindow;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use log::{debug, error};
use recon_api::{MonitorMessage, TenantId};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub window: TradingWindow,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/:tenant_id", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ws_handler(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.window.is_open(Utc::now()) {
        return (StatusCode::FORBIDDEN, "outside trading window").into_response();
    }
    let tenant = TenantId::new(tenant_id);
    ws.on_upgrade(move |socket| handle_socket(socket, tenant, state))
}

async fn handle_socket(mut socket: WebSocket, tenant: TenantId, state: AppState) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = state.registry.register(tenant.clone(), tx);

    let hello = MonitorMessage::connection_established(id, tenant.clone());
    if send_json(&mut socket, &hello).await.is_err() {
        state.registry.unregister(id);
        return;
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    // Channel closed means the registry force-closed us.
                    None => break,
                    Some(message) => {
                        if send_json(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Clients only listen; anything else is ignored.
                    Some(Ok(other)) => debug!("ignoring inbound frame: {:?}", other),
                }
            }
        }
    }

    state.registry.unregister(id);
    debug!("socket closed for connection {}", id);
}

async fn send_json(socket: &mut WebSocket, message: &MonitorMessage) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(err) => {
            error!("failed to serialize monitor message: {}", err);
            return Ok(());
        }
    };
    socket.send(Message::Text(text)).await
}

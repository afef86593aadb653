//! WebSocket change feed
//!
//! Each upgraded connection becomes one [`Session`] in the configured
//! broadcast group.

use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::http::AppState;
use crate::session::{serve_socket, Session};

/// GET <ws_path> (upgrade)
async fn subscribe(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let session = Session::new(
        state.registry.clone(),
        state.relay.group.clone(),
        state.relay.session_buffer,
    );
    tracing::debug!(session_id = %session.id(), "websocket upgrade requested");
    ws.on_upgrade(move |socket| serve_socket(socket, session))
}

/// Change feed routes, mounted at `ws_path`.
pub fn router(ws_path: &str) -> Router<Arc<AppState>> {
    Router::new().route(ws_path, get(subscribe))
}

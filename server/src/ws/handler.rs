use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
};
use serde::Deserialize;

use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the WebSocket connection. A returning client rides
/// its reconnect token on the upgrade request; first-time clients omit it.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /ws?token=<reconnect_token>
///
/// WebSocket upgrade endpoint. There is nothing to authenticate: an unknown
/// or absent token just means a fresh identity, so the upgrade always
/// succeeds and the attach outcome is reported in-band (`welcome`,
/// `reconnect_success` or `reconnect_failed`).
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, params.token))
}

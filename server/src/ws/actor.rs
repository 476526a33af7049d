use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::ConnectionHandle;

/// Ping interval: server sends a WebSocket ping every 30 seconds so abrupt
/// client death cannot leak connections.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if no pong arrives within 10 seconds after a ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an accepted socket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from an mpsc channel
/// - Reader loop: decodes inbound text frames and dispatches them
///
/// The mpsc channel is what the registry stores as the socket handle; any
/// registry operation can queue a frame for this client without blocking on
/// its I/O.
pub async fn run_connection(socket: WebSocket, state: AppState, presented_token: Option<String>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let handle = ConnectionHandle {
        conn_id: state.registry.next_conn_id(),
        tx: tx.clone(),
    };
    let conn_id = handle.conn_id;

    // Identity attach is the implicit hello: the greeting frames (welcome or
    // reconnect_success, then the user count) are queued before the reader
    // sees any client frame.
    let attached = state
        .registry
        .attach(handle.clone(), presented_token.as_deref());
    let user_id = attached.user_id;

    tracing::info!(
        user_id = %user_id,
        conn_id = conn_id,
        "Signaling connection started"
    );

    // Spawn writer task: forwards mpsc frames to the WebSocket sink.
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception.
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses.
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket frames.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_frame(text.as_str(), &handle, &state, &user_id);
                }
                Message::Binary(_) => {
                    // The protocol is JSON text; binary frames are ignored.
                    tracing::debug!(user_id = %user_id, "Ignoring binary frame");
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks, run the disconnect lifecycle.
    writer_handle.abort();
    ping_handle.abort();
    state.registry.disconnect(&user_id, conn_id);

    tracing::info!(
        user_id = %user_id,
        conn_id = conn_id,
        "Signaling connection stopped"
    );
}

/// Writer task: receives frames from the mpsc channel and forwards them to
/// the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}

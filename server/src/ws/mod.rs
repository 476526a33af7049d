pub mod actor;
pub mod handler;
pub mod protocol;

use tokio::sync::mpsc;

use self::protocol::ServerMessage;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push frames to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// A live socket as seen by the registry.
///
/// `conn_id` is a process-wide monotonic counter assigned per accepted socket.
/// When the same identity reconnects, its token adopts a handle with a higher
/// `conn_id`; the old socket's disconnect is recognized as superseded by
/// comparing ids, so it cannot detach its successor.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: u64,
    pub tx: ConnectionSender,
}

impl ConnectionHandle {
    /// Serialize a server frame and queue it on this connection.
    ///
    /// Best-effort: a closed channel (peer gone) drops the frame. Signaling
    /// is recoverable by ICE or a re-match, so this is not an error.
    pub fn send(&self, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(text) => {
                let _ = self.tx.send(axum::extract::ws::Message::Text(text.into()));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize server frame");
            }
        }
    }
}

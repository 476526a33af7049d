//! Wire protocol for the signaling socket.
//!
//! Every frame is a single UTF-8 JSON object with a `type` discriminator.
//! Frames that fail to decode (unknown type, missing field, malformed JSON)
//! are logged at debug and ignored; they never close the socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::rooms::{JoinFailReason, Role};
use crate::state::AppState;
use crate::ws::ConnectionHandle;

/// Client → server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Enter matchmaking. Media flags are advisory and never influence pairing.
    FindPartner {
        #[serde(default)]
        audio_enabled: Option<bool>,
        #[serde(default)]
        video_enabled: Option<bool>,
    },
    /// Rebind this socket to a room the user is already a member of.
    JoinRoom { room: String },
    /// Leave the current room or waiting slot.
    Skip,
    Offer { room: String, offer: Value },
    Answer { room: String, answer: Value },
    #[serde(rename = "ice-candidate")]
    IceCandidate { room: String, candidate: Value },
    /// Ask the room's initiator to re-send an offer.
    RequestReoffer { room: String },
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        user_id: String,
        token: String,
    },
    ReconnectSuccess {
        user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
    ReconnectFailed,
    RoomAssigned {
        room: String,
        role: Role,
        partner_id: String,
    },
    RoomJoined {
        room: String,
        role: Role,
        partner_id: String,
    },
    JoinFailed {
        reason: JoinFailReason,
    },
    PartnerSkipped,
    PartnerDisconnected {
        room: String,
        partner_id: String,
    },
    PartnerReconnected {
        room: String,
        partner_id: String,
    },
    Offer {
        offer: Value,
        sender_id: String,
    },
    Answer {
        answer: Value,
        sender_id: String,
    },
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        candidate: Value,
        sender_id: String,
    },
    UserCount {
        count: usize,
    },
    RequestReoffer {
        room: String,
        requester: String,
    },
}

/// The three relayed signaling kinds. The payload is opaque to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
        }
    }
}

/// Handle one inbound text frame from an attached socket.
///
/// All registry calls below are synchronous: matchmaking, room creation and
/// relay routing never suspend, so no pairing can interleave with another.
pub fn handle_text_frame(text: &str, handle: &ConnectionHandle, state: &AppState, user_id: &str) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(
                user_id = %user_id,
                error = %e,
                "Ignoring undecodable frame"
            );
            return;
        }
    };

    match msg {
        ClientMessage::FindPartner {
            audio_enabled,
            video_enabled,
        } => {
            tracing::debug!(
                user_id = %user_id,
                audio = ?audio_enabled,
                video = ?video_enabled,
                "find_partner"
            );
            state.registry.find_partner(user_id);
        }
        ClientMessage::JoinRoom { room } => {
            state.registry.join_room(user_id, &room, handle);
        }
        ClientMessage::Skip => {
            state.registry.skip(user_id);
        }
        ClientMessage::Offer { room, offer } => {
            state.registry.relay(user_id, &room, SignalKind::Offer, offer);
        }
        ClientMessage::Answer { room, answer } => {
            state.registry.relay(user_id, &room, SignalKind::Answer, answer);
        }
        ClientMessage::IceCandidate { room, candidate } => {
            state
                .registry
                .relay(user_id, &room, SignalKind::IceCandidate, candidate);
        }
        ClientMessage::RequestReoffer { room } => {
            state.registry.request_reoffer(user_id, &room);
        }
    }
}

//! Identity issuance and reconnect tokens.
//!
//! Every logical user owns exactly one token for as long as it exists. A
//! token with no socket and no room is deleted by a one-shot reaper after
//! the idle TTL; reattaching bumps the token's epoch, which invalidates any
//! reaper already in flight.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use super::Registry;
use crate::ws::protocol::ServerMessage;
use crate::ws::ConnectionHandle;

/// One logical user: identity, current socket, current room.
pub(crate) struct TokenEntry {
    pub user_id: String,
    pub socket: Option<ConnectionHandle>,
    pub room_id: Option<String>,
    pub last_seen: DateTime<Utc>,
    /// Bumped whenever the reap precondition is invalidated (reattach).
    /// A reaper only acts if the epoch it captured is still current.
    pub epoch: u64,
}

/// What `attach` resolved the connection to.
pub struct AttachOutcome {
    pub user_id: String,
    pub token: String,
}

/// Mint a reconnect token: 32 random bytes, hex-encoded.
fn mint_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

impl Registry {
    /// Bind a freshly accepted socket to an identity.
    ///
    /// A known presented token is rebound: the socket handle is replaced,
    /// the pending idle reaper is cancelled, and if the token still names a
    /// live room the socket is rebound inside it and the partner is told the
    /// peer is back. An unknown presented token is treated as no token; the
    /// client asked to reconnect, so it gets `reconnect_failed` before the
    /// fresh `welcome`.
    pub fn attach(
        self: &Arc<Self>,
        socket: ConnectionHandle,
        presented_token: Option<&str>,
    ) -> AttachOutcome {
        let mut inner = self.lock();

        if let Some(presented) = presented_token {
            if inner.tokens.contains_key(presented) {
                let entry = inner.tokens.get_mut(presented).expect("checked above");
                entry.epoch += 1;
                entry.socket = Some(socket.clone());
                entry.last_seen = Utc::now();
                let user_id = entry.user_id.clone();
                let mut room_id = entry.room_id.clone();

                // A room pointer may outlive its room; treat as absence.
                if let Some(rid) = &room_id {
                    if !inner.rooms.contains_key(rid) {
                        inner
                            .tokens
                            .get_mut(presented)
                            .expect("checked above")
                            .room_id = None;
                        room_id = None;
                    }
                }

                socket.send(&ServerMessage::ReconnectSuccess {
                    user_id: user_id.clone(),
                    room: room_id.clone(),
                });

                if let Some(rid) = &room_id {
                    let room = inner.rooms.get_mut(rid).expect("checked above");
                    room.epoch += 1;
                    if let Some(member) = room.member_mut(&user_id) {
                        member.socket = Some(socket.clone());
                    }
                    if let Some(partner) = room.partner_of(&user_id) {
                        if let Some(partner_socket) = &partner.socket {
                            partner_socket.send(&ServerMessage::PartnerReconnected {
                                room: rid.clone(),
                                partner_id: user_id.clone(),
                            });
                        }
                    }
                }

                inner.broadcast_user_count();
                tracing::info!(user_id = %user_id, room = ?room_id, "Identity rebound");
                return AttachOutcome {
                    user_id,
                    token: presented.to_string(),
                };
            }

            tracing::debug!("Unknown reconnect token presented, minting fresh identity");
            socket.send(&ServerMessage::ReconnectFailed);
        }

        let user_id = Uuid::now_v7().to_string();
        let token = mint_token();
        inner.tokens.insert(
            token.clone(),
            TokenEntry {
                user_id: user_id.clone(),
                socket: Some(socket.clone()),
                room_id: None,
                last_seen: Utc::now(),
                epoch: 0,
            },
        );
        inner.user_index.insert(user_id.clone(), token.clone());

        socket.send(&ServerMessage::Welcome {
            user_id: user_id.clone(),
            token: token.clone(),
        });
        inner.broadcast_user_count();
        tracing::info!(user_id = %user_id, "Identity issued");

        AttachOutcome { user_id, token }
    }

    /// Run the disconnect lifecycle for a closed socket.
    ///
    /// A `conn_id` that no longer matches the token's socket belongs to a
    /// superseded connection (the identity already rebound elsewhere) and is
    /// ignored entirely.
    pub fn disconnect(self: &Arc<Self>, user_id: &str, conn_id: u64) {
        let mut inner = self.lock();

        let Some(token_key) = inner.user_index.get(user_id).cloned() else {
            return;
        };
        let Some(entry) = inner.tokens.get_mut(&token_key) else {
            return;
        };
        match &entry.socket {
            Some(handle) if handle.conn_id == conn_id => {}
            _ => return,
        }

        entry.socket = None;
        entry.last_seen = Utc::now();
        let epoch = entry.epoch;
        let room_id = entry.room_id.clone();
        self.schedule_token_reaper(token_key.clone(), epoch);

        inner.remove_from_waiting(user_id);

        if let Some(rid) = room_id {
            if let Some(room) = inner.rooms.get_mut(&rid) {
                if let Some(member) = room.member_mut(user_id) {
                    member.socket = None;
                }
                if let Some(partner) = room.partner_of(user_id) {
                    if let Some(partner_socket) = &partner.socket {
                        partner_socket.send(&ServerMessage::PartnerDisconnected {
                            room: rid.clone(),
                            partner_id: user_id.to_string(),
                        });
                    }
                }
                self.schedule_room_reaper(rid, room.epoch);
            } else if let Some(entry) = inner.tokens.get_mut(&token_key) {
                entry.room_id = None;
            }
        }

        inner.broadcast_user_count();
        tracing::info!(user_id = %user_id, "Socket detached");
    }

    pub(crate) fn schedule_token_reaper(self: &Arc<Self>, token: String, epoch: u64) {
        let registry = Arc::clone(self);
        let ttl = self.cfg.token_idle_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            registry.reap_token(&token, epoch);
        });
    }

    /// One-shot idle-token reaper body: re-checks the predicate under the
    /// same lock as every other mutation.
    fn reap_token(&self, token: &str, epoch: u64) {
        let mut inner = self.lock();
        let Some(entry) = inner.tokens.get(token) else {
            return;
        };
        if entry.epoch != epoch || entry.socket.is_some() || entry.room_id.is_some() {
            return;
        }
        let user_id = entry.user_id.clone();
        let idle_since = entry.last_seen;
        inner.tokens.remove(token);
        inner.user_index.remove(&user_id);
        tracing::debug!(user_id = %user_id, idle_since = %idle_since, "Idle token expired");
    }
}

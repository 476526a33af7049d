//! Pair rooms and the signaling relay.
//!
//! A room binds exactly two identities, one of them the initiator. Relay
//! authorization never trusts fields inside the payload: the sender's
//! token → room binding is authoritative and the `room` field of an inbound
//! signaling frame is advisory only.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::{matchmaking::first_is_initiator, Registry, RegistryInner};
use crate::ws::protocol::{ServerMessage, SignalKind};
use crate::ws::ConnectionHandle;

/// Which side of the WebRTC handshake a member drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

/// Why a `join_room` request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinFailReason {
    NoRoom,
    NotAuthorized,
}

pub(crate) struct RoomMember {
    pub user_id: String,
    pub socket: Option<ConnectionHandle>,
    pub is_initiator: bool,
}

pub(crate) struct Room {
    pub id: String,
    pub members: [RoomMember; 2],
    pub created_at: Instant,
    /// Bumped whenever a member's socket rebinds into the room; invalidates
    /// any grace-window reaper already in flight.
    pub epoch: u64,
}

impl Room {
    pub fn member_mut(&mut self, user_id: &str) -> Option<&mut RoomMember> {
        self.members.iter_mut().find(|m| m.user_id == user_id)
    }

    pub fn partner_of(&self, user_id: &str) -> Option<&RoomMember> {
        match (
            self.members[0].user_id == user_id,
            self.members[1].user_id == user_id,
        ) {
            (true, _) => Some(&self.members[1]),
            (_, true) => Some(&self.members[0]),
            _ => None,
        }
    }

    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        self.members
            .iter()
            .find(|m| m.user_id == user_id)
            .map(|m| {
                if m.is_initiator {
                    Role::Initiator
                } else {
                    Role::Responder
                }
            })
    }

    pub fn initiator(&self) -> &RoomMember {
        if self.members[0].is_initiator {
            &self.members[0]
        } else {
            &self.members[1]
        }
    }
}

impl Registry {
    /// Create a room for a completed pairing and notify both members.
    ///
    /// Both tokens' `room_id` is set in the same critical section as the
    /// room insertion, and `room_assigned` is queued on both sockets before
    /// the lock is released, so no relayed frame can overtake it.
    pub(crate) fn create_room(
        self: &Arc<Self>,
        inner: &mut RegistryInner,
        (a_id, a_joined): (&str, Instant),
        (b_id, b_joined): (&str, Instant),
    ) {
        let a_initiates = first_is_initiator(a_id, a_joined, b_id, b_joined);
        let room_id = Uuid::now_v7().to_string();

        let socket_of = |inner: &RegistryInner, user_id: &str| {
            inner
                .user_index
                .get(user_id)
                .and_then(|t| inner.tokens.get(t))
                .and_then(|t| t.socket.clone())
        };
        let a_socket = socket_of(inner, a_id);
        let b_socket = socket_of(inner, b_id);

        let room = Room {
            id: room_id.clone(),
            members: [
                RoomMember {
                    user_id: a_id.to_string(),
                    socket: a_socket.clone(),
                    is_initiator: a_initiates,
                },
                RoomMember {
                    user_id: b_id.to_string(),
                    socket: b_socket.clone(),
                    is_initiator: !a_initiates,
                },
            ],
            created_at: Instant::now(),
            epoch: 0,
        };
        inner.rooms.insert(room_id.clone(), room);

        for user_id in [a_id, b_id] {
            if let Some(token_key) = inner.user_index.get(user_id).cloned() {
                if let Some(entry) = inner.tokens.get_mut(&token_key) {
                    entry.room_id = Some(room_id.clone());
                }
            }
        }

        let (a_role, b_role) = if a_initiates {
            (Role::Initiator, Role::Responder)
        } else {
            (Role::Responder, Role::Initiator)
        };
        if let Some(socket) = &a_socket {
            socket.send(&ServerMessage::RoomAssigned {
                room: room_id.clone(),
                role: a_role,
                partner_id: b_id.to_string(),
            });
        }
        if let Some(socket) = &b_socket {
            socket.send(&ServerMessage::RoomAssigned {
                room: room_id.clone(),
                role: b_role,
                partner_id: a_id.to_string(),
            });
        }

        tracing::info!(
            room_id = %room_id,
            initiator = %if a_initiates { a_id } else { b_id },
            responder = %if a_initiates { b_id } else { a_id },
            "Room created"
        );
    }

    /// Rebind the caller's socket to a room it is a member of.
    pub fn join_room(&self, user_id: &str, room_id: &str, handle: &ConnectionHandle) {
        let mut inner = self.lock();
        let Some(room) = inner.rooms.get_mut(room_id) else {
            handle.send(&ServerMessage::JoinFailed {
                reason: JoinFailReason::NoRoom,
            });
            return;
        };
        let Some(role) = room.role_of(user_id) else {
            tracing::debug!(user_id = %user_id, room_id = %room_id, "join_room by non-member");
            handle.send(&ServerMessage::JoinFailed {
                reason: JoinFailReason::NotAuthorized,
            });
            return;
        };

        room.epoch += 1;
        if let Some(member) = room.member_mut(user_id) {
            member.socket = Some(handle.clone());
        }
        let partner_id = room
            .partner_of(user_id)
            .map(|p| p.user_id.clone())
            .unwrap_or_default();

        handle.send(&ServerMessage::RoomJoined {
            room: room_id.to_string(),
            role,
            partner_id,
        });
    }

    /// Forward an opaque signaling payload to the sender's partner.
    ///
    /// Drops silently when the sender has no room, the partner is detached,
    /// or the sender is not a member of any live room. A missing room behind
    /// a token's pointer is reconciled by clearing the stale field.
    pub fn relay(&self, sender_id: &str, advisory_room: &str, kind: SignalKind, payload: Value) {
        let mut inner = self.lock();
        let Some(token_key) = inner.user_index.get(sender_id).cloned() else {
            return;
        };
        let Some(entry) = inner.tokens.get(&token_key) else {
            return;
        };
        let Some(room_id) = entry.room_id.clone() else {
            tracing::debug!(
                user_id = %sender_id,
                kind = kind.as_str(),
                "Dropping signaling frame from user without a room"
            );
            return;
        };
        if advisory_room != room_id {
            tracing::debug!(
                user_id = %sender_id,
                advisory = %advisory_room,
                authoritative = %room_id,
                "Advisory room id differs from token binding"
            );
        }
        let Some(room) = inner.rooms.get(&room_id) else {
            if let Some(entry) = inner.tokens.get_mut(&token_key) {
                entry.room_id = None;
            }
            return;
        };
        let Some(partner) = room.partner_of(sender_id) else {
            return;
        };
        let Some(partner_socket) = &partner.socket else {
            return;
        };

        let forwarded = match kind {
            SignalKind::Offer => ServerMessage::Offer {
                offer: payload,
                sender_id: sender_id.to_string(),
            },
            SignalKind::Answer => ServerMessage::Answer {
                answer: payload,
                sender_id: sender_id.to_string(),
            },
            SignalKind::IceCandidate => ServerMessage::IceCandidate {
                candidate: payload,
                sender_id: sender_id.to_string(),
            },
        };
        partner_socket.send(&forwarded);
    }

    /// Deliver a re-offer request to the room's initiator.
    pub fn request_reoffer(&self, requester_id: &str, advisory_room: &str) {
        let inner = self.lock();
        let Some(room_id) = inner
            .user_index
            .get(requester_id)
            .and_then(|t| inner.tokens.get(t))
            .and_then(|t| t.room_id.clone())
        else {
            return;
        };
        if advisory_room != room_id {
            tracing::debug!(
                user_id = %requester_id,
                advisory = %advisory_room,
                "request_reoffer with mismatched room id"
            );
        }
        let Some(room) = inner.rooms.get(&room_id) else {
            return;
        };
        let initiator = room.initiator();
        if initiator.user_id == requester_id {
            tracing::debug!(user_id = %requester_id, "request_reoffer from the initiator itself");
            return;
        }
        if let Some(socket) = &initiator.socket {
            socket.send(&ServerMessage::RequestReoffer {
                room: room_id,
                requester: requester_id.to_string(),
            });
        }
    }

    /// Leave the current room or waiting slot. No-op for an idle user.
    pub fn skip(self: &Arc<Self>, user_id: &str) {
        let mut inner = self.lock();
        let room_id = inner
            .user_index
            .get(user_id)
            .and_then(|t| inner.tokens.get(t))
            .and_then(|t| t.room_id.clone());

        if let Some(room_id) = room_id {
            if let Some(room) = inner.rooms.remove(&room_id) {
                if let Some(partner) = room.partner_of(user_id) {
                    if let Some(partner_socket) = &partner.socket {
                        partner_socket.send(&ServerMessage::PartnerSkipped);
                    }
                }
                self.release_room(&mut inner, &room);
                tracing::info!(user_id = %user_id, room_id = %room_id, "Room skipped");
            } else if let Some(token_key) = inner.user_index.get(user_id).cloned() {
                if let Some(entry) = inner.tokens.get_mut(&token_key) {
                    entry.room_id = None;
                }
            }
            return;
        }

        if inner.remove_from_waiting(user_id) {
            tracing::debug!(user_id = %user_id, "Left the waiting queue");
            return;
        }

        tracing::debug!(user_id = %user_id, "skip while idle");
    }

    /// Clear both members' token room pointers after a room is removed, and
    /// start the idle clock for any member that no longer has a socket.
    pub(crate) fn release_room(self: &Arc<Self>, inner: &mut RegistryInner, room: &Room) {
        for member in &room.members {
            let Some(token_key) = inner.user_index.get(&member.user_id).cloned() else {
                continue;
            };
            let Some(entry) = inner.tokens.get_mut(&token_key) else {
                continue;
            };
            if entry.room_id.as_deref() == Some(room.id.as_str()) {
                entry.room_id = None;
            }
            if entry.socket.is_none() {
                self.schedule_token_reaper(token_key, entry.epoch);
            }
        }
    }

    pub(crate) fn schedule_room_reaper(self: &Arc<Self>, room_id: String, epoch: u64) {
        let registry = Arc::clone(self);
        let ttl = self.cfg.room_reconnect_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            registry.reap_room(&room_id, epoch);
        });
    }

    /// Grace-window reaper body: deletes the room only if nobody came back.
    fn reap_room(self: &Arc<Self>, room_id: &str, epoch: u64) {
        let mut inner = self.lock();
        let Some(room) = inner.rooms.get(room_id) else {
            return;
        };
        if room.epoch != epoch || room.members.iter().any(|m| m.socket.is_some()) {
            return;
        }
        if let Some(room) = inner.rooms.remove(room_id) {
            self.release_room(&mut inner, &room);
            tracing::info!(room_id = %room_id, "Room expired after reconnect grace window");
        }
    }
}

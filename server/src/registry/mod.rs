//! Single-lock registry over the authoritative signaling state.
//!
//! Five maps (tokens, user index, waiting set, waiting queue, rooms) live
//! behind one mutex. Every mutation goes through a synchronous registry
//! method that holds the lock for its whole duration, so no pairing, relay
//! or cleanup decision can interleave with another. Outbound frames are
//! pushed onto per-connection unbounded channels under the lock; that never
//! blocks and preserves delivery order relative to state changes.

pub mod matchmaking;
pub mod rooms;
pub mod tokens;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::ws::protocol::ServerMessage;
use self::matchmaking::WaitingEntry;
use self::rooms::Room;
use self::tokens::TokenEntry;

/// Timings governing token, room and queue garbage collection.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a token with no socket and no room survives before deletion.
    pub token_idle_ttl: Duration,
    /// Grace window during which a room survives a member's disconnect.
    pub room_reconnect_ttl: Duration,
    /// Hard cap on room age regardless of member state.
    pub room_max_age: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            token_idle_ttl: Duration::from_secs(300),
            room_reconnect_ttl: Duration::from_secs(120),
            room_max_age: Duration::from_secs(600),
        }
    }
}

/// The authoritative maps. Only registry methods touch these, under the lock.
#[derive(Default)]
pub(crate) struct RegistryInner {
    /// Reconnect token → token record.
    pub tokens: HashMap<String, TokenEntry>,
    /// user_id → reconnect token.
    pub user_index: HashMap<String, String>,
    /// user_id → waiting entry. Membership test and O(1) removal.
    pub waiting: HashMap<String, WaitingEntry>,
    /// FIFO queue of waiting user_ids, oldest at the front.
    pub queue: VecDeque<String>,
    /// room_id → pair room.
    pub rooms: HashMap<String, Room>,
}

impl RegistryInner {
    pub fn live_user_count(&self) -> usize {
        self.tokens.values().filter(|t| t.socket.is_some()).count()
    }

    /// Push the current live user count to every attached socket.
    pub fn broadcast_user_count(&self) {
        let msg = ServerMessage::UserCount {
            count: self.live_user_count(),
        };
        for entry in self.tokens.values() {
            if let Some(handle) = &entry.socket {
                handle.send(&msg);
            }
        }
    }
}

/// Point-in-time counts for the health endpoint.
#[derive(Debug, Clone, Copy)]
pub struct RegistryCounts {
    pub tokens: usize,
    pub waiting: usize,
    pub rooms: usize,
}

pub struct Registry {
    inner: Mutex<RegistryInner>,
    cfg: RegistryConfig,
    next_conn_id: AtomicU64,
}

impl Registry {
    pub fn new(cfg: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegistryInner::default()),
            cfg,
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Assign an id to a freshly accepted socket.
    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A poisoned lock is recovered rather than propagated: registry methods
    /// hold the guard only across map updates with no unwind points between
    /// them, so the maps remain usable and one bad connection must not take
    /// down signaling for everyone else.
    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn counts(&self) -> RegistryCounts {
        let inner = self.lock();
        RegistryCounts {
            tokens: inner.tokens.len(),
            waiting: inner.waiting.len(),
            rooms: inner.rooms.len(),
        }
    }

    /// Delete every room older than the hard age cap, regardless of member
    /// state. Safety net against leaks; returns how many rooms were deleted.
    pub fn sweep_aged_rooms(self: &Arc<Self>) -> usize {
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .rooms
            .values()
            .filter(|r| r.created_at.elapsed() >= self.cfg.room_max_age)
            .map(|r| r.id.clone())
            .collect();
        for room_id in &expired {
            if let Some(room) = inner.rooms.remove(room_id) {
                self.release_room(&mut inner, &room);
                tracing::warn!(room_id = %room_id, "Room exceeded hard age cap, deleting");
            }
        }
        expired.len()
    }

    /// Spawn the background task enforcing the hard room-age cap.
    pub fn spawn_room_age_sweeper(self: &Arc<Self>, interval: Duration) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let swept = registry.sweep_aged_rooms();
                if swept > 0 {
                    tracing::info!("Room age sweep deleted {} rooms", swept);
                }
            }
        });
    }
}

//! FIFO matchmaking over the waiting set and queue.
//!
//! A `find_partner` request either pairs the requester with the oldest
//! still-live waiter or appends the requester to the queue. Stale queue
//! entries (sockets that died while waiting) are dropped silently during the
//! pop scan. Everything here runs under the registry lock, so two
//! simultaneous requests cannot both claim the same waiter.

use std::sync::Arc;
use std::time::Instant;

use super::{Registry, RegistryInner};

/// One user parked in the waiting set. `joined_at` decides initiator role
/// when the pairing completes.
pub(crate) struct WaitingEntry {
    pub joined_at: Instant,
}

impl RegistryInner {
    /// Drop a user's waiting slot: the set entry and its queue position.
    /// The queue scan is linear; the queue is bounded by connected users.
    /// Returns whether the user was waiting.
    pub fn remove_from_waiting(&mut self, user_id: &str) -> bool {
        if self.waiting.remove(user_id).is_some() {
            self.queue.retain(|u| u != user_id);
            return true;
        }
        false
    }
}

/// Deterministic role assignment: the earlier joiner initiates; a timestamp
/// tie goes to the lexicographically smaller user id.
pub(crate) fn first_is_initiator(
    a_id: &str,
    a_joined: Instant,
    b_id: &str,
    b_joined: Instant,
) -> bool {
    match a_joined.cmp(&b_joined) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => a_id < b_id,
    }
}

impl Registry {
    /// Pair the requester with the oldest live waiter, or enqueue them.
    ///
    /// A no-op while the requester is already paired or already waiting, so
    /// a repeated `find_partner` cannot duplicate queue entries or rooms.
    pub fn find_partner(self: &Arc<Self>, user_id: &str) {
        let mut inner = self.lock();

        let Some(token_key) = inner.user_index.get(user_id).cloned() else {
            return;
        };
        let Some(entry) = inner.tokens.get(&token_key) else {
            return;
        };
        if entry.room_id.is_some() || inner.waiting.contains_key(user_id) {
            tracing::debug!(user_id = %user_id, "find_partner while already paired or waiting");
            return;
        }
        if entry.socket.is_none() {
            return;
        }
        let requester_joined = Instant::now();

        while let Some(candidate_id) = inner.queue.pop_front() {
            let Some(waiting) = inner.waiting.get(&candidate_id) else {
                continue;
            };
            let candidate_joined = waiting.joined_at;
            let live = inner
                .user_index
                .get(&candidate_id)
                .and_then(|t| inner.tokens.get(t))
                .map(|t| t.socket.is_some())
                .unwrap_or(false);
            if !live {
                inner.remove_from_waiting(&candidate_id);
                tracing::debug!(user_id = %candidate_id, "Dropping stale waiter");
                continue;
            }

            inner.remove_from_waiting(&candidate_id);
            self.create_room(
                &mut inner,
                (candidate_id.as_str(), candidate_joined),
                (user_id, requester_joined),
            );
            return;
        }

        inner.waiting.insert(
            user_id.to_string(),
            WaitingEntry {
                joined_at: requester_joined,
            },
        );
        inner.queue.push_back(user_id.to_string());
        tracing::debug!(
            user_id = %user_id,
            queue_len = inner.queue.len(),
            "Enqueued for matchmaking"
        );
    }
}

use std::sync::Arc;
use std::time::Instant;

use crate::registry::Registry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// The single-lock signaling registry (tokens, matchmaking, rooms).
    pub registry: Arc<Registry>,
    /// Process start, for the health endpoint's uptime.
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            started_at: Instant::now(),
        }
    }
}

//! Per-attempt anti-CSRF state for the OAuth redirect/callback pair

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Pending login attempts keyed by their state value
///
/// Each redirect gets a fresh random state. A callback is accepted only if it
/// presents a state that is still pending, and the entry is removed on first
/// use so a state cannot be replayed.
pub struct OAuthStateStore {
    ttl: Duration,
    pending: Mutex<HashMap<String, Instant>>,
}

impl OAuthStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn issue(&self) -> String {
        let state = Uuid::new_v4().simple().to_string();
        let now = Instant::now();

        let mut pending = self.pending.lock().await;
        pending.retain(|_, issued| now.duration_since(*issued) < self.ttl);
        pending.insert(state.clone(), now);

        debug!(pending = pending.len(), "Issued OAuth state");
        state
    }

    /// Returns true if `state` was pending and unexpired. Consumes it either way.
    pub async fn consume(&self, state: &str) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.remove(state) {
            Some(issued) => issued.elapsed() < self.ttl,
            None => false,
        }
    }
}

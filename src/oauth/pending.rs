//! CSRF state cache — pending authorization flows.
//!
//! Each in-flight authorization-code flow is keyed by a locally generated
//! state value. Consumption is atomic (`DashMap::remove` is a single
//! get-and-delete), so a state value completes the flow at most once even
//! when the provider delivers the callback twice. Entries older than ten
//! minutes are removed by [`StateCache::sweep`].

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::store::now_secs;

/// How long a pending authorization stays valid.
pub const STATE_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// One in-flight authorization-code flow.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// PKCE code verifier for the eventual code exchange
    pub verifier: String,
    /// When the flow started (Unix epoch seconds)
    pub created_at: u64,
    /// The client's own CSRF state, echoed back on hand-off
    pub client_state: Option<String>,
    /// Where to send the client once tokens are issued
    pub client_redirect_uri: String,
    /// The client's PKCE challenge, held for the hand-off
    pub client_code_challenge: Option<String>,
}

impl PendingAuthorization {
    /// Create an entry stamped with the current time.
    #[must_use]
    pub fn new(
        verifier: String,
        client_redirect_uri: String,
        client_state: Option<String>,
        client_code_challenge: Option<String>,
    ) -> Self {
        Self {
            verifier,
            created_at: now_secs(),
            client_state,
            client_redirect_uri,
            client_code_challenge,
        }
    }

    fn older_than(&self, max_age: Duration) -> bool {
        now_secs().saturating_sub(self.created_at) >= max_age.as_secs()
    }
}

/// Keyed store of pending authorizations.
pub struct StateCache {
    entries: DashMap<String, PendingAuthorization>,
    max_age: Duration,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCache {
    /// Create a cache with the standard ten-minute window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_age(STATE_MAX_AGE)
    }

    /// Create a cache with a custom entry lifetime.
    #[must_use]
    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_age,
        }
    }

    /// Store a pending authorization under its state value.
    pub fn put(&self, state: impl Into<String>, pending: PendingAuthorization) {
        self.entries.insert(state.into(), pending);
    }

    /// Atomically take the entry for `state`.
    ///
    /// At most one caller gets the entry; every later call returns `None`.
    /// An aged-out entry is dropped rather than returned.
    pub fn consume(&self, state: &str) -> Option<PendingAuthorization> {
        let (_, pending) = self.entries.remove(state)?;
        if pending.older_than(self.max_age) {
            debug!(state = %state, "Discarded expired pending authorization");
            return None;
        }
        Some(pending)
    }

    /// Remove entries older than the cache window. Returns how many were
    /// dropped.
    pub fn sweep(&self) -> usize {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().older_than(self.max_age))
            .map(|e| e.key().clone())
            .collect();

        let count = stale.len();
        for state in stale {
            self.entries.remove(&state);
        }
        count
    }

    /// Number of pending flows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no flows are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Spawn a background task sweeping stale pending authorizations every
/// `interval`. Exits when the `shutdown` receiver fires.
pub fn spawn_state_sweeper(
    cache: Arc<StateCache>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = cache.sweep();
                    if swept > 0 {
                        debug!(count = swept, "Swept stale pending authorizations");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("State sweeper shutting down");
                    break;
                }
            }
        }
    });
}

//! Transport session registry.
//!
//! Tracks live client connections to the tool-calling protocol, each
//! optionally linked to an authentication-session id. Two indices are kept
//! under a single lock so they can never disagree: session id → session,
//! and authentication-session id → session id. Idle sessions are evicted by
//! a periodic sweep; deleting a session never touches the token store,
//! since authentication outlives any one connection.
//!
//! Linking is last-wins: pointing an authentication-session id at a new
//! transport session overwrites the reverse entry, and deleting a session
//! removes the reverse entry only while it still points at that session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::store::now_secs;

/// One live client connection.
#[derive(Debug, Clone)]
pub struct Session<C> {
    /// Transport session id
    pub id: String,
    /// Opaque per-session context (transport handle, API client)
    pub context: Arc<C>,
    /// When the session was created (Unix epoch seconds)
    pub created_at: u64,
    /// Last request touching this session (Unix epoch seconds)
    pub last_accessed: u64,
    /// Linked authentication-session id, if the client has authenticated
    pub auth_session: Option<String>,
}

struct Indices<C> {
    sessions: HashMap<String, Session<C>>,
    by_auth: HashMap<String, String>,
}

/// Registry of live transport sessions.
pub struct SessionRegistry<C> {
    inner: RwLock<Indices<C>>,
    idle_timeout: Duration,
}

impl<C> SessionRegistry<C> {
    /// Create a registry evicting sessions idle longer than `idle_timeout`.
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Indices {
                sessions: HashMap::new(),
                by_auth: HashMap::new(),
            }),
            idle_timeout,
        }
    }

    /// Register a new session around the given context, returning its id.
    pub fn create(&self, context: C) -> String {
        let id = Uuid::new_v4().to_string();
        let now = now_secs();
        let session = Session {
            id: id.clone(),
            context: Arc::new(context),
            created_at: now,
            last_accessed: now,
            auth_session: None,
        };

        self.inner.write().sessions.insert(id.clone(), session);
        debug!(session = %id, "Transport session created");
        id
    }

    /// Whether a session exists for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().sessions.contains_key(id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }

    /// The session context for `id`, marking the session as accessed.
    pub fn context(&self, id: &str) -> Option<Arc<C>> {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(id)?;
        session.last_accessed = now_secs();
        Some(Arc::clone(&session.context))
    }

    /// Update the last-accessed timestamp. Returns `false` for unknown ids.
    pub fn touch(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.sessions.get_mut(id) {
            Some(session) => {
                session.last_accessed = now_secs();
                true
            }
            None => false,
        }
    }

    /// Link a session to an authentication-session id, updating both
    /// indices together.
    ///
    /// Returns `false` for unknown session ids. A prior link from the same
    /// authentication-session id to another session is overwritten.
    pub fn link_auth(&self, id: &str, auth_session: impl Into<String>) -> bool {
        let auth_session = auth_session.into();
        let mut inner = self.inner.write();
        let Some(session) = inner.sessions.get_mut(id) else {
            return false;
        };

        session.auth_session = Some(auth_session.clone());
        let id = session.id.clone();
        inner.by_auth.insert(auth_session, id);
        true
    }

    /// The authentication-session id linked to `id`, if any.
    pub fn auth_session(&self, id: &str) -> Option<String> {
        self.inner.read().sessions.get(id)?.auth_session.clone()
    }

    /// Reverse lookup: the transport session an authentication-session id
    /// currently resolves to.
    pub fn session_for_auth(&self, auth_session: &str) -> Option<String> {
        self.inner.read().by_auth.get(auth_session).cloned()
    }

    /// Delete a session, cleaning the reverse index when it still points at
    /// this session. The linked token record is untouched.
    pub fn remove(&self, id: &str) -> Option<Session<C>> {
        let mut inner = self.inner.write();
        let session = inner.sessions.remove(id)?;

        if let Some(ref auth) = session.auth_session
            && inner.by_auth.get(auth).is_some_and(|owner| owner == id)
        {
            inner.by_auth.remove(auth);
        }

        debug!(session = %id, "Transport session removed");
        Some(session)
    }

    /// Evict sessions idle longer than the timeout. Returns how many were
    /// removed.
    pub fn sweep_idle(&self) -> usize {
        let cutoff = now_secs().saturating_sub(self.idle_timeout.as_secs());
        let mut inner = self.inner.write();

        let idle: Vec<String> = inner
            .sessions
            .values()
            .filter(|s| s.last_accessed <= cutoff)
            .map(|s| s.id.clone())
            .collect();

        for id in &idle {
            if let Some(session) = inner.sessions.remove(id)
                && let Some(ref auth) = session.auth_session
                && inner.by_auth.get(auth).is_some_and(|owner| owner == id)
            {
                inner.by_auth.remove(auth);
            }
        }

        idle.len()
    }
}

/// Spawn a background task evicting idle sessions every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_idle_sweeper<C: Send + Sync + 'static>(
    registry: Arc<SessionRegistry<C>>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = registry.sweep_idle();
                    if evicted > 0 {
                        debug!(count = evicted, "Evicted idle transport sessions");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session sweeper shutting down");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn create_and_lookup() {
        let registry = SessionRegistry::new(HOUR);
        let id = registry.create("ctx");

        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);
        assert_eq!(*registry.context(&id).unwrap(), "ctx");
    }

    #[test]
    fn link_auth_populates_both_indices() {
        let registry = SessionRegistry::new(HOUR);
        let id = registry.create(());

        assert!(registry.link_auth(&id, "mcpauth_a"));

        assert_eq!(registry.auth_session(&id).as_deref(), Some("mcpauth_a"));
        assert_eq!(registry.session_for_auth("mcpauth_a"), Some(id));
    }

    #[test]
    fn link_auth_unknown_session_is_rejected() {
        let registry: SessionRegistry<()> = SessionRegistry::new(HOUR);
        assert!(!registry.link_auth("missing", "mcpauth_a"));
        assert!(registry.session_for_auth("mcpauth_a").is_none());
    }

    #[test]
    fn remove_cleans_the_reverse_index() {
        let registry = SessionRegistry::new(HOUR);
        let id = registry.create(());
        registry.link_auth(&id, "mcpauth_a");

        let removed = registry.remove(&id).unwrap();

        assert_eq!(removed.auth_session.as_deref(), Some("mcpauth_a"));
        assert!(registry.session_for_auth("mcpauth_a").is_none());
        assert!(!registry.contains(&id));
    }

    #[test]
    fn relinked_auth_survives_removal_of_the_stale_session() {
        // Two sessions linked the same auth id in turn; deleting the stale
        // one must not unlink the current one.
        let registry = SessionRegistry::new(HOUR);
        let t1 = registry.create(());
        let t2 = registry.create(());

        registry.link_auth(&t1, "mcpauth_a");
        registry.link_auth(&t2, "mcpauth_a");
        assert_eq!(registry.session_for_auth("mcpauth_a"), Some(t2.clone()));

        registry.remove(&t1);

        assert_eq!(registry.session_for_auth("mcpauth_a"), Some(t2));
    }

    #[test]
    fn sweep_evicts_only_idle_sessions() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let idle = registry.create(());
        let busy = registry.create(());
        registry.link_auth(&idle, "mcpauth_idle");

        {
            let mut inner = registry.inner.write();
            inner.sessions.get_mut(&idle).unwrap().last_accessed = now_secs() - 120;
        }

        let evicted = registry.sweep_idle();

        assert_eq!(evicted, 1);
        assert!(!registry.contains(&idle));
        assert!(registry.contains(&busy));
        assert!(registry.session_for_auth("mcpauth_idle").is_none());
    }

    #[test]
    fn touch_defers_idle_eviction() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let id = registry.create(());

        {
            let mut inner = registry.inner.write();
            inner.sessions.get_mut(&id).unwrap().last_accessed = now_secs() - 120;
        }

        assert!(registry.touch(&id));
        assert_eq!(registry.sweep_idle(), 0);
        assert!(registry.contains(&id));
    }

    #[test]
    fn touch_unknown_session_is_false() {
        let registry: SessionRegistry<()> = SessionRegistry::new(HOUR);
        assert!(!registry.touch("missing"));
    }
}

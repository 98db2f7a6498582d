//! Token store — persistence layer for provider OAuth grants.
//!
//! Records are keyed by **authentication-session id**, the opaque value the
//! proxy hands to clients in place of the provider's real tokens. The
//! [`TokenBackend`] trait abstracts over storage backends:
//!
//! - [`MemoryBackend`] — in-process `DashMap`, lost on restart
//! - [`FileBackend`] — one JSON file per session id, single host only
//! - [`RedisBackend`] — shared TTL store for multi-instance deployments
//!
//! Refresh logic lives once, in [`TokenStore`], above the raw backends, so
//! all three behave identically: [`TokenStore::get_access_token`] refreshes
//! transparently when the remaining lifetime drops below five minutes, and a
//! failed refresh deletes the record instead of handing out a token that is
//! about to die.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::oauth::provider::ProviderClient;
use crate::{Error, Result};

pub mod file;
pub mod memory;
pub mod redis;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use redis::RedisBackend;

/// Remaining lifetime below which an access token is refreshed before use.
pub const REFRESH_THRESHOLD_SECS: u64 = 5 * 60;

/// How long a record is retained past its access-token expiry.
///
/// A record is *invalid* after `expires_at` but remains *refreshable* until
/// retention lapses. Thirty days matches the default refresh-token lifetime
/// of Cognito-class providers.
pub const RETENTION_AFTER_EXPIRY_SECS: u64 = 30 * 24 * 3600;

/// Access-token lifetime assumed when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Current Unix time in seconds.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// The provider's OAuth grant for one authentication session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Provider access token
    pub access_token: String,

    /// Provider refresh token; a record without one cannot be refreshed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// OIDC identity token, when the provider issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Absolute access-token expiry (Unix epoch seconds)
    pub expires_at: u64,

    /// When the record was created (Unix epoch seconds)
    pub created_at: u64,

    /// Token type, constant `"Bearer"`
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

impl TokenRecord {
    /// Build a record from a provider token response.
    pub fn from_response(
        access_token: String,
        refresh_token: Option<String>,
        id_token: Option<String>,
        expires_in: Option<u64>,
    ) -> Self {
        let now = now_secs();
        Self {
            access_token,
            refresh_token,
            id_token,
            expires_at: now + expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            created_at: now,
            token_type: default_token_type(),
        }
    }

    /// Returns `true` if the access token has passed its expiry time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        now_secs() >= self.expires_at
    }

    /// Remaining access-token lifetime in seconds (0 when expired).
    #[must_use]
    pub fn remaining_secs(&self) -> u64 {
        self.expires_at.saturating_sub(now_secs())
    }

    /// Returns `true` if the remaining lifetime is below the refresh threshold.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.remaining_secs() < REFRESH_THRESHOLD_SECS
    }

    /// The moment the record stops being worth keeping: expiry plus the
    /// refresh-retention window.
    #[must_use]
    pub fn retention_deadline(&self) -> u64 {
        self.expires_at.saturating_add(RETENTION_AFTER_EXPIRY_SECS)
    }

    /// Returns `true` once the record is past its retention deadline.
    #[must_use]
    pub fn retention_lapsed(&self) -> bool {
        now_secs() >= self.retention_deadline()
    }
}

/// Trait abstracting the token storage backend.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// async tasks. Persistence errors propagate: a silently lost record would
/// force an unnoticed re-authentication.
#[async_trait::async_trait]
pub trait TokenBackend: Send + Sync + 'static {
    /// Write or overwrite the record for `id`, setting the backend's
    /// expiry-derived retention window.
    async fn put(&self, id: &str, record: &TokenRecord) -> Result<()>;

    /// Look up the record for `id`. Returns the raw record even when the
    /// access token is expired, since expired records may still be
    /// refreshable.
    async fn get(&self, id: &str) -> Result<Option<TokenRecord>>;

    /// Delete the record for `id`. Deleting a missing id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;

    /// Remove all records.
    async fn clear(&self) -> Result<()>;

    /// Remove records past their retention deadline. Backends with native
    /// per-key expiry return 0.
    async fn sweep(&self) -> Result<usize>;

    /// Release underlying resources. Further operations may fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Refresh-aware token store shared by the proxy handler and the session
/// boundary.
///
/// Cheap to clone; all clones share the same backend and per-id refresh
/// locks.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn TokenBackend>,
    provider: Arc<ProviderClient>,
    /// Per-id single-flight guards so concurrent accessors trigger at most
    /// one provider refresh per session.
    refresh_locks: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenStore {
    /// Create a store over the given backend and provider adapter.
    pub fn new(backend: Arc<dyn TokenBackend>, provider: Arc<ProviderClient>) -> Self {
        Self {
            backend,
            provider,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    /// Write or overwrite the record for `id`.
    pub async fn store(&self, id: &str, record: &TokenRecord) -> Result<()> {
        self.backend.put(id, record).await
    }

    /// The raw record for `id`, expired or not.
    pub async fn get_tokens(&self, id: &str) -> Result<Option<TokenRecord>> {
        self.backend.get(id).await
    }

    /// Whether a record exists for `id`.
    pub async fn has(&self, id: &str) -> Result<bool> {
        Ok(self.backend.get(id).await?.is_some())
    }

    /// Delete the record for `id`.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.refresh_locks.remove(id);
        self.backend.delete(id).await
    }

    /// Access-token expiry for `id`, if a record exists.
    pub async fn expiry(&self, id: &str) -> Result<Option<u64>> {
        Ok(self.backend.get(id).await?.map(|r| r.expires_at))
    }

    /// Whether the record for `id` is past expiry. A missing record counts
    /// as expired.
    pub async fn is_expired(&self, id: &str) -> Result<bool> {
        Ok(self
            .backend
            .get(id)
            .await?
            .is_none_or(|r| r.is_expired()))
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<usize> {
        self.backend.count().await
    }

    /// Remove all records.
    pub async fn clear_all(&self) -> Result<()> {
        self.refresh_locks.clear();
        self.backend.clear().await
    }

    /// A currently valid access token for `id`, refreshing first when the
    /// remaining lifetime is below the threshold.
    ///
    /// Returns `None` when no record exists or the record could not be
    /// refreshed; in the latter case the record is deleted so the client is
    /// forced to re-authenticate rather than receive a token about to
    /// expire. Storage failures propagate.
    pub async fn get_access_token(&self, id: &str) -> Result<Option<String>> {
        let Some(record) = self.backend.get(id).await? else {
            return Ok(None);
        };
        if !record.needs_refresh() {
            return Ok(Some(record.access_token));
        }

        let lock = self.refresh_lock(id);
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent caller may have refreshed or
        // deleted the record while we waited.
        let Some(record) = self.backend.get(id).await? else {
            return Ok(None);
        };
        if !record.needs_refresh() {
            return Ok(Some(record.access_token));
        }

        match self.refresh_record(id, &record).await {
            Ok(refreshed) => Ok(Some(refreshed.access_token)),
            Err(e @ (Error::Storage(_) | Error::Io(_) | Error::Json(_))) => Err(e),
            Err(e) => {
                warn!(session = %id, error = %e, "Refresh failed, deleting token record");
                self.backend.delete(id).await?;
                self.refresh_locks.remove(id);
                Ok(None)
            }
        }
    }

    /// Refresh the record for `id` when its remaining lifetime is below the
    /// threshold.
    ///
    /// Idempotent: a no-op (zero network calls) when the token is not near
    /// expiry. Fails with [`Error::NoTokenRecord`] when no record exists and
    /// [`Error::NoRefreshToken`] when the record cannot be refreshed. A
    /// provider-rejected refresh deletes the record before the error is
    /// returned.
    pub async fn refresh_if_needed(&self, id: &str) -> Result<()> {
        let Some(record) = self.backend.get(id).await? else {
            return Err(Error::NoTokenRecord(id.to_string()));
        };
        if !record.needs_refresh() {
            return Ok(());
        }

        let lock = self.refresh_lock(id);
        let _guard = lock.lock().await;

        let Some(record) = self.backend.get(id).await? else {
            return Err(Error::NoTokenRecord(id.to_string()));
        };
        if !record.needs_refresh() {
            return Ok(());
        }

        match self.refresh_record(id, &record).await {
            Ok(_) => Ok(()),
            Err(e @ (Error::NoRefreshToken(_) | Error::Storage(_) | Error::Io(_) | Error::Json(_))) => {
                Err(e)
            }
            Err(e) => {
                warn!(session = %id, error = %e, "Refresh failed, deleting token record");
                self.backend.delete(id).await?;
                self.refresh_locks.remove(id);
                Err(e)
            }
        }
    }

    /// A no-argument accessor the downstream tool handler polls for a live
    /// access token on each authenticated call.
    #[must_use]
    pub fn accessor(&self, id: impl Into<String>) -> AccessTokenProvider {
        AccessTokenProvider {
            store: self.clone(),
            id: id.into(),
        }
    }

    fn refresh_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Perform one provider refresh and overwrite the stored record.
    ///
    /// The old refresh token is carried forward when the provider does not
    /// rotate it. Only the local store mutation happens under the caller's
    /// per-id lock; unrelated ids are never serialized behind this call.
    async fn refresh_record(&self, id: &str, record: &TokenRecord) -> Result<TokenRecord> {
        let Some(refresh_token) = record.refresh_token.as_deref() else {
            return Err(Error::NoRefreshToken(id.to_string()));
        };

        let refreshed = self.provider.refresh(refresh_token).await?;
        self.backend.put(id, &refreshed).await?;
        debug!(session = %id, expires_at = refreshed.expires_at, "Token record refreshed");
        Ok(refreshed)
    }
}

/// Handle to the access token of one authentication session.
///
/// The downstream protocol handler holds one per session and calls
/// [`token`](AccessTokenProvider::token) on each request; an absent token
/// means "unauthenticated", not an error.
#[derive(Clone)]
pub struct AccessTokenProvider {
    store: TokenStore,
    id: String,
}

impl AccessTokenProvider {
    /// A currently valid access token, refreshed if necessary.
    pub async fn token(&self) -> Result<Option<String>> {
        self.store.get_access_token(&self.id).await
    }

    /// The authentication-session id this accessor resolves.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.id
    }
}

/// Spawn a background task sweeping lapsed records every `interval`.
///
/// The task exits when the `shutdown` receiver fires. Backends with native
/// expiry make this a cheap no-op.
pub fn spawn_sweeper(
    backend: Arc<dyn TokenBackend>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match backend.sweep().await {
                        Ok(0) => {}
                        Ok(n) => debug!(count = n, "Swept lapsed token records"),
                        Err(e) => warn!(error = %e, "Token sweep failed"),
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Token sweeper shutting down");
                    break;
                }
            }
        }
    });
}

//! Distributed token store backend (Redis-class TTL store).
//!
//! The only backend visible across proxy instances, and therefore the one
//! required for multi-instance deployments. Each record is a JSON string
//! under a namespaced key with a per-key TTL set at write time, so expiry is
//! native and the periodic sweep has nothing to do.
//!
//! The connection is released explicitly via [`TokenBackend::close`] on
//! shutdown rather than left to drop order.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{TokenBackend, TokenRecord, now_secs};
use crate::{Error, Result};

/// Default key namespace, separating token records from unrelated data in a
/// shared store.
pub const DEFAULT_KEY_PREFIX: &str = "mcp-auth-proxy:tokens:";

fn storage_err(context: &str, e: &redis::RedisError) -> Error {
    Error::Storage(format!("{context}: {e}"))
}

/// Redis-backed token store.
pub struct RedisBackend {
    conn: RwLock<Option<ConnectionManager>>,
    prefix: String,
}

impl RedisBackend {
    /// Connect to the store at `url` using the given key prefix.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| storage_err("Invalid Redis URL", &e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| storage_err("Failed to connect to Redis", &e))?;

        info!(url = %url, "Connected to distributed token store");
        Ok(Self {
            conn: RwLock::new(Some(conn)),
            prefix: prefix.into(),
        })
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// A clone of the managed connection, or a storage error after close.
    async fn conn(&self) -> Result<ConnectionManager> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Storage("Token store connection is closed".to_string()))
    }

    /// All token-record keys under the namespace prefix.
    async fn scan_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}*", self.prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| storage_err("Failed to scan token keys", &e))?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

#[async_trait::async_trait]
impl TokenBackend for RedisBackend {
    async fn put(&self, id: &str, record: &TokenRecord) -> Result<()> {
        let content = serde_json::to_string(record)
            .map_err(|e| Error::Storage(format!("Failed to serialize token record: {e}")))?;

        // Retention is the native TTL: the key disappears once the record is
        // no longer refreshable.
        let ttl = record.retention_deadline().saturating_sub(now_secs()).max(1);

        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(self.key(id), content, ttl)
            .await
            .map_err(|e| storage_err("Failed to write token record", &e))?;

        debug!(session = %id, ttl, "Saved token record");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TokenRecord>> {
        let mut conn = self.conn().await?;
        let content: Option<String> = conn
            .get(self.key(id))
            .await
            .map_err(|e| storage_err("Failed to read token record", &e))?;

        match content {
            Some(json) => {
                let record = serde_json::from_str(&json)
                    .map_err(|e| Error::Storage(format!("Failed to parse token record: {e}")))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(self.key(id))
            .await
            .map_err(|e| storage_err("Failed to delete token record", &e))?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.scan_keys().await?.len())
    }

    async fn clear(&self) -> Result<()> {
        let keys = self.scan_keys().await?;
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn().await?;
        conn.del::<_, ()>(keys)
            .await
            .map_err(|e| storage_err("Failed to clear token records", &e))?;
        Ok(())
    }

    async fn sweep(&self) -> Result<usize> {
        // Native per-key expiry; nothing to collect.
        Ok(0)
    }

    async fn close(&self) -> Result<()> {
        if self.conn.write().await.take().is_some() {
            info!("Closed distributed token store connection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Connection-dependent behavior is covered by deployments with a live
    // store; these tests pin the pure parts of the backend.

    #[test]
    fn keys_are_namespaced() {
        let prefix = DEFAULT_KEY_PREFIX;
        let key = format!("{prefix}mcpauth_abc");
        assert!(key.starts_with("mcp-auth-proxy:tokens:"));
        assert!(key.ends_with("mcpauth_abc"));
    }

    #[test]
    fn ttl_covers_expiry_plus_retention() {
        let record = TokenRecord::from_response(
            "tok".to_string(),
            Some("ref".to_string()),
            None,
            Some(3600),
        );
        let ttl = record.retention_deadline().saturating_sub(now_secs());
        assert!(ttl > 3600, "TTL must outlive the access token");
    }
}

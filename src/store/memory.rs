//! In-process token store backend.
//!
//! Records live in a `DashMap` and are lost on restart; a record past its
//! retention deadline is lazily evicted on read and collected by the
//! periodic sweep. Suitable for single-instance deployments and tests.

use dashmap::DashMap;
use tracing::debug;

use super::{TokenBackend, TokenRecord};
use crate::Result;

/// In-memory backend backed by a concurrent map.
#[derive(Default)]
pub struct MemoryBackend {
    records: DashMap<String, TokenRecord>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TokenBackend for MemoryBackend {
    async fn put(&self, id: &str, record: &TokenRecord) -> Result<()> {
        self.records.insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TokenRecord>> {
        let Some(entry) = self.records.get(id) else {
            return Ok(None);
        };
        let record = entry.clone();
        drop(entry);

        if record.retention_lapsed() {
            // Lazy eviction: remove on access
            self.records.remove(id);
            debug!(session = %id, "Lazy-evicted lapsed token record");
            return Ok(None);
        }

        Ok(Some(record))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.remove(id);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.len())
    }

    async fn clear(&self) -> Result<()> {
        self.records.clear();
        Ok(())
    }

    async fn sweep(&self) -> Result<usize> {
        let lapsed: Vec<String> = self
            .records
            .iter()
            .filter(|e| e.value().retention_lapsed())
            .map(|e| e.key().clone())
            .collect();

        let count = lapsed.len();
        for id in lapsed {
            self.records.remove(&id);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RETENTION_AFTER_EXPIRY_SECS, now_secs};

    fn valid_record() -> TokenRecord {
        TokenRecord::from_response("tok".to_string(), Some("ref".to_string()), None, Some(3600))
    }

    fn lapsed_record() -> TokenRecord {
        let mut r = valid_record();
        r.expires_at = now_secs() - RETENTION_AFTER_EXPIRY_SECS - 10;
        r
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let backend = MemoryBackend::new();
        let record = valid_record();

        backend.put("s1", &record).await.unwrap();
        let found = backend.get("s1").await.unwrap();

        assert_eq!(found, Some(record));
    }

    #[tokio::test]
    async fn get_unknown_id_is_none() {
        let backend = MemoryBackend::new();
        assert!(backend.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing_record() {
        let backend = MemoryBackend::new();
        backend.put("s1", &valid_record()).await.unwrap();

        let mut updated = valid_record();
        updated.access_token = "tok2".to_string();
        backend.put("s1", &updated).await.unwrap();

        assert_eq!(
            backend.get("s1").await.unwrap().unwrap().access_token,
            "tok2"
        );
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_but_retained_record_is_returned() {
        // Refresh needs the raw record even after access-token expiry
        let backend = MemoryBackend::new();
        let mut record = valid_record();
        record.expires_at = now_secs() - 60;

        backend.put("s1", &record).await.unwrap();
        assert!(backend.get("s1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lapsed_record_is_lazily_evicted() {
        let backend = MemoryBackend::new();
        backend.put("s1", &lapsed_record()).await.unwrap();

        assert!(backend.get("s1").await.unwrap().is_none());
        assert_eq!(backend.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_only_lapsed() {
        let backend = MemoryBackend::new();
        backend.put("live", &valid_record()).await.unwrap();
        backend.put("gone1", &lapsed_record()).await.unwrap();
        backend.put("gone2", &lapsed_record()).await.unwrap();

        let swept = backend.sweep().await.unwrap();

        assert_eq!(swept, 2);
        assert_eq!(backend.count().await.unwrap(), 1);
        assert!(backend.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let backend = MemoryBackend::new();
        backend.put("a", &valid_record()).await.unwrap();
        backend.put("b", &valid_record()).await.unwrap();

        backend.delete("a").await.unwrap();
        assert!(backend.get("a").await.unwrap().is_none());

        backend.clear().await.unwrap();
        assert_eq!(backend.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_missing_id_is_ok() {
        let backend = MemoryBackend::new();
        backend.delete("missing").await.unwrap();
    }
}

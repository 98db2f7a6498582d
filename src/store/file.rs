//! Single-host file token store backend.
//!
//! One JSON file per authentication-session id under a dedicated directory.
//! Files are written with owner-only permissions. Not safe for concurrent
//! multi-process access; use the Redis backend for multi-instance
//! deployments.

use std::fs;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{TokenBackend, TokenRecord};
use crate::{Error, Result};

/// File-backed token store.
pub struct FileBackend {
    /// Directory holding one `<key>.json` per session id
    base_dir: PathBuf,
}

impl FileBackend {
    /// Create a backend rooted at `base_dir`, creating the directory if
    /// needed.
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)
                .map_err(|e| Error::Storage(format!("Failed to create token dir: {e}")))?;
        }
        Ok(Self { base_dir })
    }

    /// Filesystem-safe key for a session id.
    fn storage_key(id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(id.as_bytes());
        let hash = hasher.finalize();
        format!("{hash:x}")[..16].to_string()
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", Self::storage_key(id)))
    }
}

#[async_trait::async_trait]
impl TokenBackend for FileBackend {
    async fn put(&self, id: &str, record: &TokenRecord) -> Result<()> {
        let path = self.record_path(id);

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| Error::Storage(format!("Failed to serialize token record: {e}")))?;

        fs::write(&path, content)
            .map_err(|e| Error::Storage(format!("Failed to write token file: {e}")))?;

        // Restrictive permissions (owner read/write only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            let _ = fs::set_permissions(&path, perms);
        }

        debug!(session = %id, "Saved token record");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TokenRecord>> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Storage(format!("Failed to read token file: {e}")))?;

        match serde_json::from_str::<TokenRecord>(&content) {
            Ok(record) if record.retention_lapsed() => {
                let _ = fs::remove_file(&path);
                debug!(session = %id, "Lazy-evicted lapsed token record");
                Ok(None)
            }
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // Tolerant load: a corrupt file is logged and treated as absent
                warn!(session = %id, error = %e, "Failed to parse token file");
                Ok(None)
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.record_path(id);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| Error::Storage(format!("Failed to delete token file: {e}")))?;
            debug!(session = %id, "Deleted token record");
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.record_files()?.len())
    }

    async fn clear(&self) -> Result<()> {
        for path in self.record_files()? {
            fs::remove_file(&path)
                .map_err(|e| Error::Storage(format!("Failed to delete token file: {e}")))?;
        }
        Ok(())
    }

    async fn sweep(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.record_files()? {
            let lapsed = match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<TokenRecord>(&content) {
                    Ok(record) => record.retention_lapsed(),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Sweeping unreadable token file");
                        true
                    }
                },
                Err(_) => continue,
            };

            if lapsed && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl FileBackend {
    fn record_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.base_dir)
            .map_err(|e| Error::Storage(format!("Failed to read token dir: {e}")))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| Error::Storage(format!("Failed to read token dir entry: {e}")))?
                .path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RETENTION_AFTER_EXPIRY_SECS, now_secs};
    use tempfile::tempdir;

    fn valid_record() -> TokenRecord {
        TokenRecord::from_response(
            "access".to_string(),
            Some("refresh".to_string()),
            Some("identity".to_string()),
            Some(3600),
        )
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path().to_path_buf()).unwrap();
        let record = valid_record();

        backend.put("s1", &record).await.unwrap();
        assert_eq!(backend.get("s1").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn absent_optionals_survive_the_disk_round_trip() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path().to_path_buf()).unwrap();
        let record = TokenRecord::from_response("only-access".to_string(), None, None, Some(60));

        backend.put("s1", &record).await.unwrap();
        let loaded = backend.get("s1").await.unwrap().unwrap();

        assert!(loaded.refresh_token.is_none());
        assert!(loaded.id_token.is_none());
    }

    #[tokio::test]
    async fn records_survive_backend_reopen() {
        let dir = tempdir().unwrap();
        let record = valid_record();

        {
            let backend = FileBackend::new(dir.path().to_path_buf()).unwrap();
            backend.put("s1", &record).await.unwrap();
        }

        let reopened = FileBackend::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.get("s1").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn corrupt_file_is_treated_as_absent() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path().to_path_buf()).unwrap();
        let path = backend.record_path("s1");
        fs::write(&path, "not json at all").unwrap();

        assert!(backend.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_the_file() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path().to_path_buf()).unwrap();

        backend.put("s1", &valid_record()).await.unwrap();
        backend.delete("s1").await.unwrap();

        assert!(backend.get("s1").await.unwrap().is_none());
        assert_eq!(backend.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_lapsed_and_corrupt_files() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path().to_path_buf()).unwrap();

        backend.put("live", &valid_record()).await.unwrap();

        let mut lapsed = valid_record();
        lapsed.expires_at = now_secs() - RETENTION_AFTER_EXPIRY_SECS - 10;
        backend.put("lapsed", &lapsed).await.unwrap();

        fs::write(dir.path().join("garbage.json"), "{broken").unwrap();

        let swept = backend.sweep().await.unwrap();

        assert_eq!(swept, 2);
        assert_eq!(backend.count().await.unwrap(), 1);
        assert!(backend.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_empties_the_directory() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path().to_path_buf()).unwrap();

        backend.put("a", &valid_record()).await.unwrap();
        backend.put("b", &valid_record()).await.unwrap();
        backend.clear().await.unwrap();

        assert_eq!(backend.count().await.unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn token_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path().to_path_buf()).unwrap();
        backend.put("s1", &valid_record()).await.unwrap();

        let mode = fs::metadata(backend.record_path("s1"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

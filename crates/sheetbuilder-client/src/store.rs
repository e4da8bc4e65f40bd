//! Client-side persisted state: `fingerprint-digest → {jobId, status,
//! updatedAt}` (spec.md §4.E). Freshness (the 1 h staleness window) is
//! enforced by the caller, not the store.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sheetbuilder_core::FingerprintDigest;
use tokio::sync::{Mutex, RwLock};

use crate::error::ClientError;

/// Mirrors the job's last-known stage, coarsened to what the reattachment
/// protocol needs to decide its next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryStatus {
    Processing,
    Completed,
    Failed,
}

/// A single persisted reattachment entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub job_id: String,
    pub status: EntryStatus,
    pub updated_at_epoch_ms: i64,
}

/// Pluggable persistence for reattachment entries. Implementations must be
/// safe to share across concurrently-submitting tasks.
pub trait JobStore: Send + Sync {
    fn get(&self, digest: FingerprintDigest) -> impl Future<Output = Result<Option<StoredEntry>, ClientError>> + Send;

    fn put(&self, digest: FingerprintDigest, entry: StoredEntry) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn remove(&self, digest: FingerprintDigest) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// In-memory store: entries do not survive process restart. Useful for
/// tests and for hosts that don't need cross-reload reattachment.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<FingerprintDigest, StoredEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryStore {
    async fn get(&self, digest: FingerprintDigest) -> Result<Option<StoredEntry>, ClientError> {
        Ok(self.entries.read().await.get(&digest).cloned())
    }

    async fn put(&self, digest: FingerprintDigest, entry: StoredEntry) -> Result<(), ClientError> {
        self.entries.write().await.insert(digest, entry);
        Ok(())
    }

    async fn remove(&self, digest: FingerprintDigest) -> Result<(), ClientError> {
        self.entries.write().await.remove(&digest);
        Ok(())
    }
}

/// Durable store backed by a single JSON file, keyed by the digest's hex
/// string. The whole file is read and rewritten on every operation, which is
/// fine at the scale of one browser tab's worth of reattachment entries.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: Arc<PathBuf>,
    // Serializes read-modify-write cycles against the file; a plain
    // per-operation read+write would lose concurrent updates.
    lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, StoredEntry>, ClientError> {
        match tokio::fs::read(self.path.as_path()).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| ClientError::Store(err.to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(ClientError::Store(err.to_string())),
        }
    }

    async fn write_all(&self, entries: &HashMap<String, StoredEntry>) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ClientError::Store(err.to_string()))?;
        }
        let bytes = serde_json::to_vec_pretty(entries).map_err(|err| ClientError::Store(err.to_string()))?;
        tokio::fs::write(self.path.as_path(), bytes)
            .await
            .map_err(|err| ClientError::Store(err.to_string()))
    }
}

impl JobStore for JsonFileStore {
    async fn get(&self, digest: FingerprintDigest) -> Result<Option<StoredEntry>, ClientError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.get(&digest.to_hex()).cloned())
    }

    async fn put(&self, digest: FingerprintDigest, entry: StoredEntry) -> Result<(), ClientError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(digest.to_hex(), entry);
        self.write_all(&entries).await
    }

    async fn remove(&self, digest: FingerprintDigest) -> Result<(), ClientError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.remove(&digest.to_hex());
        self.write_all(&entries).await
    }
}

#[cfg(test)]
mod tests {
    use sheetbuilder_core::{Fingerprint, Order};

    use super::*;

    fn digest() -> FingerprintDigest {
        Fingerprint::new("report.pdf", 4096, 0, Order::Norm).digest()
    }

    #[tokio::test]
    async fn memory_store_roundtrips() {
        let store = MemoryStore::new();
        let digest = digest();
        assert!(store.get(digest).await.unwrap().is_none());

        store
            .put(
                digest,
                StoredEntry {
                    job_id: "abc123".into(),
                    status: EntryStatus::Processing,
                    updated_at_epoch_ms: 1000,
                },
            )
            .await
            .unwrap();

        let entry = store.get(digest).await.unwrap().unwrap();
        assert_eq!(entry.job_id, "abc123");
        assert_eq!(entry.status, EntryStatus::Processing);

        store.remove(digest).await.unwrap();
        assert!(store.get(digest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reattach.json");
        let digest = digest();

        let store = JsonFileStore::new(&path);
        store
            .put(
                digest,
                StoredEntry {
                    job_id: "def456".into(),
                    status: EntryStatus::Completed,
                    updated_at_epoch_ms: 2000,
                },
            )
            .await
            .unwrap();

        let reopened = JsonFileStore::new(&path);
        let entry = reopened.get(digest).await.unwrap().unwrap();
        assert_eq!(entry.job_id, "def456");
        assert_eq!(entry.status, EntryStatus::Completed);
    }

    #[tokio::test]
    async fn json_file_store_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert!(store.get(digest()).await.unwrap().is_none());
    }
}

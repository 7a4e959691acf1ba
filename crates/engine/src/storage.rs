//! Storage adapter capability plus in-memory and filesystem implementations.
//!
//! The filesystem adapter writes one JSON file per key, writing to a tmp
//! file first and renaming to avoid partial writes on crash.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use reflex_core::EngineError;

/// Current on-disk schema version. Loads with a different major version
/// are rejected.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageMetadata {
    pub persisted_at: DateTime<Utc>,
    pub server_id: String,
    pub schema_version: u32,
}

impl StorageMetadata {
    pub fn now(server_id: impl Into<String>) -> Self {
        Self {
            persisted_at: Utc::now(),
            server_id: server_id.into(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageRecord {
    pub state: Value,
    pub metadata: StorageMetadata,
}

/// Persistence capability consumed by the engine (snapshots, audit).
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn save(&self, key: &str, record: StorageRecord) -> Result<(), EngineError>;
    async fn load(&self, key: &str) -> Result<Option<StorageRecord>, EngineError>;
    async fn delete(&self, key: &str) -> Result<bool, EngineError>;
    async fn exists(&self, key: &str) -> Result<bool, EngineError>;
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, EngineError>;
}

// ── In-memory adapter ────────────────────────────────────────────────

/// Map-backed adapter for tests and ephemeral deployments.
pub struct MemoryStorageAdapter {
    records: Mutex<HashMap<String, StorageRecord>>,
}

impl MemoryStorageAdapter {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStorageAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn save(&self, key: &str, record: StorageRecord) -> Result<(), EngineError> {
        self.records
            .lock()
            .expect("storage lock poisoned")
            .insert(key.to_string(), record);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<StorageRecord>, EngineError> {
        Ok(self
            .records
            .lock()
            .expect("storage lock poisoned")
            .get(key)
            .cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, EngineError> {
        Ok(self
            .records
            .lock()
            .expect("storage lock poisoned")
            .remove(key)
            .is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, EngineError> {
        Ok(self
            .records
            .lock()
            .expect("storage lock poisoned")
            .contains_key(key))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, EngineError> {
        let mut keys: Vec<String> = self
            .records
            .lock()
            .expect("storage lock poisoned")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ── Filesystem adapter ───────────────────────────────────────────────

/// One JSON file per key under a root directory.
pub struct FileStorageAdapter {
    dir: PathBuf,
}

impl FileStorageAdapter {
    /// Create the adapter, creating the directory (and parents) if needed.
    pub fn new(dir: PathBuf) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys may carry ':' and '.'; only path separators need escaping.
        let safe = key.replace(['/', '\\'], "_");
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl StorageAdapter for FileStorageAdapter {
    async fn save(&self, key: &str, record: StorageRecord) -> Result<(), EngineError> {
        let final_path = self.path_for(key);
        let tmp_path = final_path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&record)?;
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        debug!(key = %key, path = %final_path.display(), "persisted record");
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<StorageRecord>, EngineError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let record: StorageRecord = serde_json::from_slice(&bytes)
                    .map_err(|e| EngineError::Storage(format!("corrupt record '{}': {}", key, e)))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, EngineError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, EngineError> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await.unwrap_or(false))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, EngineError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(key) = name.strip_suffix(".json") {
                if key.starts_with(prefix) {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn roundtrip(adapter: &dyn StorageAdapter) {
        let record = StorageRecord {
            state: json!({"facts": [{"key": "k", "value": 1}]}),
            metadata: StorageMetadata::now("test-server"),
        };
        adapter.save("engine:facts", record.clone()).await.unwrap();

        assert!(adapter.exists("engine:facts").await.unwrap());
        let loaded = adapter.load("engine:facts").await.unwrap().unwrap();
        assert_eq!(loaded, record);

        assert_eq!(
            adapter.list_keys("engine:").await.unwrap(),
            vec!["engine:facts".to_string()]
        );

        assert!(adapter.delete("engine:facts").await.unwrap());
        assert!(!adapter.delete("engine:facts").await.unwrap());
        assert!(adapter.load("engine:facts").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_adapter_roundtrip() {
        roundtrip(&MemoryStorageAdapter::new()).await;
    }

    #[tokio::test]
    async fn file_adapter_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileStorageAdapter::new(dir.path().to_path_buf()).unwrap();
        roundtrip(&adapter).await;
    }

    #[tokio::test]
    async fn file_adapter_rejects_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileStorageAdapter::new(dir.path().to_path_buf()).unwrap();
        std::fs::write(dir.path().join("bad.json"), b"not json").unwrap();
        assert!(matches!(
            adapter.load("bad").await,
            Err(EngineError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn list_keys_filters_by_prefix() {
        let adapter = MemoryStorageAdapter::new();
        for key in ["engine:facts", "engine:rules", "audit:1"] {
            adapter
                .save(
                    key,
                    StorageRecord {
                        state: Value::Null,
                        metadata: StorageMetadata::now("s"),
                    },
                )
                .await
                .unwrap();
        }
        assert_eq!(adapter.list_keys("engine:").await.unwrap().len(), 2);
        assert_eq!(adapter.list_keys("").await.unwrap().len(), 3);
    }
}

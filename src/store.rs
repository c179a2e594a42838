//! Credential storage for OAuth token records.
//!
//! The store is a narrow collaborator: durable per-`(provider, alias)`
//! key-value storage of [`TokenRecord`]s, safe to call concurrently for
//! different keys. The backing implementation is swappable — the default
//! is a JSON file, tests use an in-memory map — and invisible to the
//! search core.
//!
//! A broken store is the one failure mode a search must not route around:
//! [`StoreError`] propagates as a hard error all the way to the caller,
//! unlike the soft "not authenticated" state which is represented by an
//! absent record.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::models::{Provider, TokenRecord};

/// Hard failure of the credential storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("credential store I/O failure at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable token record storage keyed by `(provider, alias)`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, provider: Provider, alias: &str)
        -> Result<Option<TokenRecord>, StoreError>;
    async fn save(
        &self,
        provider: Provider,
        alias: &str,
        record: TokenRecord,
    ) -> Result<(), StoreError>;
    /// Returns whether a record existed.
    async fn delete(&self, provider: Provider, alias: &str) -> Result<bool, StoreError>;
}

fn record_key(provider: Provider, alias: &str) -> String {
    format!("{}:{}", provider, alias)
}

// ============ File-backed store ============

/// JSON-file credential store. The whole map is read and rewritten per
/// mutation, serialized by one async lock; token files are small and the
/// write path is rare (refresh or connect).
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_all(&self) -> Result<HashMap<String, TokenRecord>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn write_all(&self, records: &HashMap<String, TokenRecord>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let content = serde_json::to_string_pretty(records)?;
        std::fs::write(&self.path, content).map_err(|e| self.io_err(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms).map_err(|e| self.io_err(e))?;
        }

        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(
        &self,
        provider: Provider,
        alias: &str,
    ) -> Result<Option<TokenRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        let records = self.read_all()?;
        Ok(records.get(&record_key(provider, alias)).cloned())
    }

    async fn save(
        &self,
        provider: Provider,
        alias: &str,
        record: TokenRecord,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all()?;
        records.insert(record_key(provider, alias), record);
        self.write_all(&records)
    }

    async fn delete(&self, provider: Provider, alias: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all()?;
        let existed = records.remove(&record_key(provider, alias)).is_some();
        if existed {
            self.write_all(&records)?;
        }
        Ok(existed)
    }
}

// ============ In-memory store ============

/// Map-backed store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, TokenRecord>>,
}

impl MemoryStore {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(
        &self,
        provider: Provider,
        alias: &str,
    ) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .get(&record_key(provider, alias))
            .cloned())
    }

    async fn save(
        &self,
        provider: Provider,
        alias: &str,
        record: TokenRecord,
    ) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .insert(record_key(provider, alias), record);
        Ok(())
    }

    async fn delete(&self, provider: Provider, alias: &str) -> Result<bool, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .remove(&record_key(provider, alias))
            .is_some())
    }
}

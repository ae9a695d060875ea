//! Durable record store behind the permission system and the global
//! enable flag.
//!
//! The trait keeps the orchestration layer independent of where records
//! actually live. Two backends ship: an in-memory store for tests and
//! embedding hosts that persist elsewhere, and a JSON file store for
//! standalone deployments.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use crate::core::permissions::UserPermission;

/// Errors that can occur during record-store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Trait defining the durable store interface.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read a global boolean flag (e.g. the TTS kill-switch).
    async fn get_flag(&self, key: &str) -> StoreResult<Option<bool>>;

    /// Write a global boolean flag.
    async fn set_flag(&self, key: &str, value: bool) -> StoreResult<()>;

    /// Fetch a user's permission record.
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserPermission>>;

    /// Insert or replace a user's permission record.
    async fn put_user(&self, record: UserPermission) -> StoreResult<()>;

    /// Delete a user's permission record; returns whether it existed.
    async fn delete_user(&self, user_id: &str) -> StoreResult<bool>;

    /// All stored permission records.
    async fn list_users(&self) -> StoreResult<Vec<UserPermission>>;

    /// Backend identifier for logging.
    fn backend_type(&self) -> &str;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreState {
    flags: HashMap<String, bool>,
    users: HashMap<String, UserPermission>,
}

/// In-memory record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    state: RwLock<StoreState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_flag(&self, key: &str) -> StoreResult<Option<bool>> {
        Ok(self.state.read().flags.get(key).copied())
    }

    async fn set_flag(&self, key: &str, value: bool) -> StoreResult<()> {
        self.state.write().flags.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserPermission>> {
        Ok(self.state.read().users.get(user_id).cloned())
    }

    async fn put_user(&self, record: UserPermission) -> StoreResult<()> {
        self.state
            .write()
            .users
            .insert(record.user_id.clone(), record);
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> StoreResult<bool> {
        Ok(self.state.write().users.remove(user_id).is_some())
    }

    async fn list_users(&self) -> StoreResult<Vec<UserPermission>> {
        Ok(self.state.read().users.values().cloned().collect())
    }

    fn backend_type(&self) -> &str {
        "memory"
    }
}

/// JSON-file-backed record store.
///
/// The whole state is held in memory and flushed to disk after every
/// mutation; writes go through a temp file followed by a rename so a crash
/// mid-write never leaves a truncated store behind.
pub struct FileRecordStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl FileRecordStore {
    /// Open (or create) a store at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let state = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "record store file missing, starting empty");
                StoreState::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    async fn persist(&self) -> StoreResult<()> {
        let snapshot = self.state.read().clone();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn get_flag(&self, key: &str) -> StoreResult<Option<bool>> {
        Ok(self.state.read().flags.get(key).copied())
    }

    async fn set_flag(&self, key: &str, value: bool) -> StoreResult<()> {
        self.state.write().flags.insert(key.to_string(), value);
        self.persist().await
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserPermission>> {
        Ok(self.state.read().users.get(user_id).cloned())
    }

    async fn put_user(&self, record: UserPermission) -> StoreResult<()> {
        self.state
            .write()
            .users
            .insert(record.user_id.clone(), record);
        self.persist().await
    }

    async fn delete_user(&self, user_id: &str) -> StoreResult<bool> {
        let existed = self.state.write().users.remove(user_id).is_some();
        if existed {
            self.persist().await?;
        }
        Ok(existed)
    }

    async fn list_users(&self) -> StoreResult<Vec<UserPermission>> {
        Ok(self.state.read().users.values().cloned().collect())
    }

    fn backend_type(&self) -> &str {
        "file"
    }
}

/// Open the configured backend: file-backed when a path is set, memory
/// otherwise. Falls back to memory (with a warning) when the file cannot
/// be opened, so a corrupt store never blocks startup.
pub async fn open_store(path: Option<PathBuf>) -> Arc<dyn RecordStore> {
    match path {
        Some(path) => match FileRecordStore::open(path.clone()).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "falling back to in-memory record store");
                Arc::new(MemoryRecordStore::new())
            }
        },
        None => Arc::new(MemoryRecordStore::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user_id: &str) -> UserPermission {
        UserPermission::new(user_id, user_id)
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryRecordStore::new();
        assert!(store.get_user("u1").await.unwrap().is_none());

        store.put_user(record("u1")).await.unwrap();
        assert_eq!(store.get_user("u1").await.unwrap().unwrap().user_id, "u1");

        assert!(store.delete_user("u1").await.unwrap());
        assert!(!store.delete_user("u1").await.unwrap());
    }

    #[tokio::test]
    async fn flags_default_to_absent() {
        let store = MemoryRecordStore::new();
        assert_eq!(store.get_flag("tts_enabled").await.unwrap(), None);
        store.set_flag("tts_enabled", false).await.unwrap();
        assert_eq!(store.get_flag("tts_enabled").await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");

        {
            let store = FileRecordStore::open(&path).await.unwrap();
            store.set_flag("tts_enabled", true).await.unwrap();
            let mut rec = record("u2");
            rec.is_blacklisted = true;
            store.put_user(rec).await.unwrap();
        }

        let reopened = FileRecordStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_flag("tts_enabled").await.unwrap(), Some(true));
        assert!(reopened.get_user("u2").await.unwrap().unwrap().is_blacklisted);
    }

    #[tokio::test]
    async fn open_store_falls_back_to_memory_on_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = open_store(Some(path)).await;
        assert_eq!(store.backend_type(), "memory");
    }
}

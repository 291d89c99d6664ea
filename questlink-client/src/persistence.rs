//! Key/value persistence for the last endpoint, the auth token and a registry
//! snapshot for offline viewing.

use crate::registry::Registries;
use crate::transport::Endpoint;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

pub const LAST_ENDPOINT_KEY: &str = "questlink.last_endpoint";
pub const AUTH_TOKEN_KEY: &str = "questlink.auth_token";
pub const REGISTRIES_KEY: &str = "questlink.registries";

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Asynchronous string key/value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    async fn set(&self, key: &str, value: String) -> Result<(), PersistenceError>;

    async fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// In-memory store for tests and sessions that should leave nothing behind.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON document, rewritten on every change.
///
/// The document is read on first access. Writes go to a sibling temp file
/// that is then renamed over the original.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<BTreeMap<String, String>, PersistenceError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_document(
        &self,
        document: &BTreeMap<String, String>,
    ) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), keys = document.len(), "State file written");
        Ok(())
    }

    async fn update<F>(&self, change: F) -> Result<(), PersistenceError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) + Send,
    {
        let mut cache = self.cache.lock().await;
        let mut document = match cache.take() {
            Some(document) => document,
            None => self.read_document().await?,
        };
        change(&mut document);
        let written = self.write_document(&document).await;
        *cache = Some(document);
        written
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_document().await?);
        }
        Ok(cache.as_ref().and_then(|document| document.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        let key = key.to_string();
        self.update(move |document| {
            document.insert(key, value);
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.update(|document| {
            document.remove(key);
        })
        .await
    }
}

async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, PersistenceError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

async fn save_json<T: Serialize + ?Sized + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), PersistenceError> {
    store.set(key, serde_json::to_string(value)?).await
}

pub async fn load_endpoint(
    store: &dyn KeyValueStore,
) -> Result<Option<Endpoint>, PersistenceError> {
    load_json(store, LAST_ENDPOINT_KEY).await
}

pub async fn save_endpoint(
    store: &dyn KeyValueStore,
    endpoint: &Endpoint,
) -> Result<(), PersistenceError> {
    save_json(store, LAST_ENDPOINT_KEY, endpoint).await
}

pub async fn load_token(store: &dyn KeyValueStore) -> Result<Option<String>, PersistenceError> {
    store.get(AUTH_TOKEN_KEY).await
}

pub async fn save_token(store: &dyn KeyValueStore, token: &str) -> Result<(), PersistenceError> {
    store.set(AUTH_TOKEN_KEY, token.to_string()).await
}

pub async fn clear_token(store: &dyn KeyValueStore) -> Result<(), PersistenceError> {
    store.remove(AUTH_TOKEN_KEY).await
}

pub async fn load_registries(
    store: &dyn KeyValueStore,
) -> Result<Option<Registries>, PersistenceError> {
    load_json(store, REGISTRIES_KEY).await
}

pub async fn save_registries(
    store: &dyn KeyValueStore,
    registries: &Registries,
) -> Result<(), PersistenceError> {
    save_json(store, REGISTRIES_KEY, registries).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use questlink_core::{Agent, AgentClass, AgentId};

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("k").await.unwrap().is_none());
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = FileStore::new(&path);
        let endpoint = Endpoint::new("ws://desk.local:4000/ws", "Desk");
        save_endpoint(&store, &endpoint).await.unwrap();
        save_token(&store, "secret").await.unwrap();

        let mut registries = Registries::default();
        let agent = Agent::new(AgentId::new("a1"), "Merlin", AgentClass::Mage, Utc::now());
        registries.upsert_agent(agent);
        save_registries(&store, &registries).await.unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(load_endpoint(&reopened).await.unwrap(), Some(endpoint));
        assert_eq!(load_token(&reopened).await.unwrap().as_deref(), Some("secret"));
        assert_eq!(load_registries(&reopened).await.unwrap(), Some(registries));

        clear_token(&reopened).await.unwrap();
        assert!(load_token(&FileStore::new(&path)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent.json"));
        assert!(load_registries(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let store = FileStore::new(&path);
        assert!(matches!(store.get(REGISTRIES_KEY).await, Err(PersistenceError::Serde(_))));
    }
}

//! Persistent key-value store trait and implementations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

/// Errors that can occur in key-value store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to read from storage.
    #[error("Failed to read from store: {0}")]
    Read(String),

    /// Failed to write to storage.
    #[error("Failed to write to store: {0}")]
    Write(String),

    /// IO error during storage operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for string key-value stores.
///
/// The offline queue keeps its whole state under one key, so stores only
/// need whole-value reads and writes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-memory store.
///
/// Values are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: parking_lot::RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// File-based store.
///
/// All keys live in one JSON object on disk. The file is created, along with
/// any missing parent directories, on the first write.
pub struct FileStore {
    path: PathBuf,
    cache: tokio::sync::Mutex<Option<HashMap<String, String>>>,
}

impl FileStore {
    /// Create a new file-based store at the given path.
    ///
    /// The file does not need to exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: tokio::sync::Mutex::new(None),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn read_file(&self) -> Result<HashMap<String, String>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::Read(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write_file(&self, values: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(values)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| StoreError::Write(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_file().await?);
        }
        Ok(cache.as_ref().and_then(|values| values.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let mut values = match cache.take() {
            Some(values) => values,
            None => self.read_file().await?,
        };
        values.insert(key.to_string(), value.to_string());
        let written = self.write_file(&values).await;
        *cache = Some(values);
        written
    }
}

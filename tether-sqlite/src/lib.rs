//! SQLite storage for the tether offline queue
//!
//! [`SqliteStore`] implements [`KeyValueStore`] on a single `kv` table, so a
//! host that already keeps a local database can store pending requests
//! alongside its other state.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_core::queue::{OfflineQueue, QueueConfig};
//! use tether_sqlite::SqliteStore;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteStore::new(".tether/queue.db")?;
//! let queue = OfflineQueue::new(Arc::new(store), QueueConfig::default());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tether_core::store::{KeyValueStore, StoreError};

/// SQLite-based key-value store
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create new SQLite store at path
    ///
    /// Creates the database file, its parent directory and the table if they
    /// don't exist.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)
            .map_err(|e| StoreError::Read(format!("Failed to open database: {}", e)))?;
        Self::with_connection(conn)
    }

    /// Create a store that lives only as long as this value
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Read(format!("Failed to open database: {}", e)))?;
        Self::with_connection(conn)
    }

    /// Use an already open connection, e.g. the host's own database
    ///
    /// The `kv` table is created if missing; other tables are left alone.
    pub fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(include_str!("schema.sql"))
            .map_err(|e| StoreError::Write(format!("Failed to initialize schema: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map_err(|e| StoreError::Read(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Read(format!("Storage task failed: {}", e)))?
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, strftime('%s', 'now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value],
            )
            .map(|_| ())
            .map_err(|e| StoreError::Write(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Write(format!("Storage task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::queue::{OfflineQueue, QueueConfig, QueuedMessage};
    use tether_core::Message;

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = SqliteStore::in_memory().unwrap();

        store.set("queue", "[]").await.unwrap();
        store.set("queue", "[1]").await.unwrap();
        store.set("other", "x").await.unwrap();

        assert_eq!(store.get("queue").await.unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.get("other").await.unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_persists_across_connections() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested/queue.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store.set("key", "value").await.unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.get("key").await.unwrap().as_deref(), Some("value"));
    }

    #[tokio::test]
    async fn test_shares_host_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("app.db");

        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE notes (body TEXT); INSERT INTO notes VALUES ('kept');")
            .unwrap();
        let store = SqliteStore::with_connection(conn).unwrap();
        store.set("queue", "[]").await.unwrap();

        let conn = Connection::open(&path).unwrap();
        let body: String = conn
            .query_row("SELECT body FROM notes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(body, "kept");
        drop(conn);
        assert_eq!(store.get("queue").await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_backs_offline_queue() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("queue.db");

        let first = QueuedMessage::new("helper", vec![Message::user("one")]);
        let second = QueuedMessage::new("helper", vec![Message::user("two")]);
        {
            let queue = OfflineQueue::new(
                Arc::new(SqliteStore::new(&path).unwrap()),
                QueueConfig::default(),
            );
            queue.enqueue(first.clone()).await.unwrap();
            queue.enqueue(second.clone()).await.unwrap();
            queue.mark_failed(&first.id, Some("offline".into())).await.unwrap();
        }

        let queue = OfflineQueue::new(
            Arc::new(SqliteStore::new(&path).unwrap()),
            QueueConfig::default(),
        );
        let restored = queue.get_all().await.unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].id, first.id);
        assert_eq!(restored[0].attempt_count, 1);
        assert_eq!(restored[1].id, second.id);
        assert_eq!(restored[1].messages[0].text(), "two");
    }
}

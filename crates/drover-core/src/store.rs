//! Durable queue and draft storage
//!
//! The engine's only shared mutable resource. Two implementations of
//! the [`Store`] contract:
//!
//! - [`SqliteStore`]: a key-value table in SQLite, WAL mode, fronted by
//!   a dedicated writer thread receiving commands over an mpsc channel
//!   and answering on oneshot channels. Each `save_queue` writes the
//!   full serialized queue in one statement, so the caller observes
//!   either the new queue or the prior one, never a torn write.
//! - [`MemoryStore`]: an in-process map for tests and CLI rehearsals.
//!
//! Draft writes are suppressed while a queue is actively running so
//! transient progress text never clobbers the operator's script; the
//! suppression lives in the trait's `save_draft` default so every
//! implementation honors it.
//!
//! Concurrent writers (two processes racing on the same store) are not
//! reconciled — last write wins.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::script::Queue;

/// Store key for the serialized queue
const KEY_QUEUE: &str = "queue";
/// Store key for the operator's draft script text
const KEY_DRAFT: &str = "draft";
/// Settings key prefix (operator-tunable overrides)
const KEY_SETTING_PREFIX: &str = "setting.";

/// Contract for the durable queue store.
///
/// `load_queue` returns an empty queue when absent. `save_draft` is
/// suppressed while the stored queue has pending items; `write_draft`
/// is the raw slot write the engine itself uses when restoring state
/// after a storage wipe.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a raw value by key.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Write a raw value by key.
    async fn put(&self, key: &str, value: String) -> Result<()>;
    /// Delete a raw value by key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Persist the full queue atomically.
    async fn save_queue(&self, queue: &Queue) -> Result<()> {
        let json = serde_json::to_string(queue)?;
        self.put(KEY_QUEUE, json).await
    }

    /// Load the queue; empty if absent.
    async fn load_queue(&self) -> Result<Queue> {
        match self.get(KEY_QUEUE).await? {
            None => Ok(Queue::default()),
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                StorageError::Corrupt {
                    key: KEY_QUEUE.to_string(),
                    details: e.to_string(),
                }
                .into()
            }),
        }
    }

    /// Remove the queue from the store.
    async fn clear_queue(&self) -> Result<()> {
        self.delete(KEY_QUEUE).await
    }

    /// Save the operator's draft text, unless a queue is running.
    async fn save_draft(&self, text: &str) -> Result<()> {
        if self.load_queue().await?.is_active() {
            debug!(key = KEY_DRAFT, "draft write suppressed while a queue is active");
            return Ok(());
        }
        self.write_draft(text).await
    }

    /// Raw draft write, bypassing the running-queue guard.
    async fn write_draft(&self, text: &str) -> Result<()> {
        self.put(KEY_DRAFT, text.to_string()).await
    }

    /// Load the draft; empty string if absent.
    async fn load_draft(&self) -> Result<String> {
        Ok(self.get(KEY_DRAFT).await?.unwrap_or_default())
    }

    /// Read an operator-tunable setting override.
    async fn get_setting(&self, name: &str) -> Result<Option<String>> {
        self.get(&format!("{KEY_SETTING_PREFIX}{name}")).await
    }

    /// Write an operator-tunable setting override.
    async fn set_setting(&self, name: &str, value: &str) -> Result<()> {
        self.put(&format!("{KEY_SETTING_PREFIX}{name}"), value.to_string())
            .await
    }
}

// =============================================================================
// SQLite implementation
// =============================================================================

/// Schema initialization SQL.
///
/// WAL mode for concurrent reads with single-writer semantics; the
/// updated_at column is epoch milliseconds.
const SCHEMA_SQL: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// Write commands sent to the writer thread.
enum Command {
    Get {
        key: String,
        respond: oneshot::Sender<Result<Option<String>>>,
    },
    Put {
        key: String,
        value: String,
        respond: oneshot::Sender<Result<()>>,
    },
    Delete {
        key: String,
        respond: oneshot::Sender<Result<()>>,
    },
}

/// SQLite-backed store.
///
/// All access is serialized through a dedicated writer thread owning
/// the connection; handles communicate over a bounded channel.
pub struct SqliteStore {
    tx: mpsc::Sender<Command>,
    writer_handle: Option<JoinHandle<()>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, initialize the schema,
    /// and start the writer thread.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the schema
    /// fails to apply.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Database(format!("Failed to create directory: {e}"))
                })?;
            }
        }

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)
                .map_err(|e| StorageError::Database(format!("Failed to open database: {e}")))?;
            conn.execute_batch(SCHEMA_SQL)
                .map_err(|e| StorageError::Database(format!("Failed to apply schema: {e}")))?;
            Ok(conn)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {e}")))??;

        let (tx, mut rx) = mpsc::channel::<Command>(32);
        let writer_handle = thread::spawn(move || writer_loop(&conn, &mut rx));

        Ok(Self {
            tx,
            writer_handle: Some(writer_handle),
        })
    }

    /// Shut down the writer thread, waiting for queued writes to land.
    pub fn shutdown(self) {
        let Self { tx, writer_handle } = self;
        // Dropping the sender ends the writer loop.
        drop(tx);
        if let Some(handle) = writer_handle {
            let _ = handle.join();
        }
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| StorageError::Database("Writer thread not available".to_string()).into())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let (respond, rx) = oneshot::channel();
        self.send(Command::Get {
            key: key.to_string(),
            respond,
        })
        .await?;
        rx.await
            .map_err(|_| StorageError::Database("Writer response channel closed".to_string()))?
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        let (respond, rx) = oneshot::channel();
        self.send(Command::Put {
            key: key.to_string(),
            value,
            respond,
        })
        .await?;
        rx.await
            .map_err(|_| StorageError::Database("Writer response channel closed".to_string()))?
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let (respond, rx) = oneshot::channel();
        self.send(Command::Delete {
            key: key.to_string(),
            respond,
        })
        .await?;
        rx.await
            .map_err(|_| StorageError::Database("Writer response channel closed".to_string()))?
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

fn writer_loop(conn: &Connection, rx: &mut mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            Command::Get { key, respond } => {
                let result: Result<Option<String>> = conn
                    .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()
                    .map_err(|e| StorageError::Database(e.to_string()).into());
                let _ = respond.send(result);
            }
            Command::Put {
                key,
                value,
                respond,
            } => {
                let result: Result<()> = conn
                    .execute(
                        "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                         ON CONFLICT(key) DO UPDATE SET
                             value = excluded.value,
                             updated_at = excluded.updated_at",
                        params![key, value, now_ms()],
                    )
                    .map(|_| ())
                    .map_err(|e| StorageError::Database(e.to_string()).into());
                let _ = respond.send(result);
            }
            Command::Delete { key, respond } => {
                let result: Result<()> = conn
                    .execute("DELETE FROM kv WHERE key = ?1", params![key])
                    .map(|_| ())
                    .map_err(|e| StorageError::Database(e.to_string()).into());
                let _ = respond.send(result);
            }
        }
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// In-process store for tests and CLI rehearsal runs.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .lock()
            .expect("store lock poisoned")
            .get(key)
            .cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        self.values
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values
            .lock()
            .expect("store lock poisoned")
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse_script;
    use tempfile::TempDir;

    fn temp_db() -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("drover.db");
        (dir, path)
    }

    #[tokio::test]
    async fn sqlite_queue_round_trips() {
        let (_dir, path) = temp_db();
        let store = SqliteStore::open(&path).await.expect("open store");

        assert!(store.load_queue().await.expect("load").is_empty());

        let mut queue = parse_script("click #a\nwait 10");
        queue.items[0].done = true;
        queue.items[1].attempts = 2;
        store.save_queue(&queue).await.expect("save");

        let loaded = store.load_queue().await.expect("load");
        assert_eq!(loaded, queue);

        store.clear_queue().await.expect("clear");
        assert!(store.load_queue().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn sqlite_store_survives_reopen() {
        let (_dir, path) = temp_db();
        let queue = parse_script("find .x");
        {
            let store = SqliteStore::open(&path).await.expect("open store");
            store.save_queue(&queue).await.expect("save");
            store.shutdown();
        }
        let store = SqliteStore::open(&path).await.expect("reopen store");
        assert_eq!(store.load_queue().await.expect("load"), queue);
    }

    #[tokio::test]
    async fn draft_round_trips_when_idle() {
        let store = MemoryStore::new();
        assert_eq!(store.load_draft().await.expect("load"), "");
        store.save_draft("click #a\n").await.expect("save");
        assert_eq!(store.load_draft().await.expect("load"), "click #a\n");
    }

    #[tokio::test]
    async fn draft_write_suppressed_while_queue_active() {
        let store = MemoryStore::new();
        store.save_draft("original").await.expect("save");

        let queue = parse_script("click #a");
        store.save_queue(&queue).await.expect("save queue");

        store.save_draft("🛠️ click #a").await.expect("suppressed save");
        assert_eq!(store.load_draft().await.expect("load"), "original");

        // Once the queue is done, drafts flow again.
        let mut done = queue;
        done.mark_all_done();
        store.save_queue(&done).await.expect("save queue");
        store.save_draft("updated").await.expect("save");
        assert_eq!(store.load_draft().await.expect("load"), "updated");
    }

    #[tokio::test]
    async fn write_draft_bypasses_suppression() {
        let store = MemoryStore::new();
        store.save_queue(&parse_script("click #a")).await.expect("save queue");
        store.write_draft("restored").await.expect("raw write");
        assert_eq!(store.load_draft().await.expect("load"), "restored");
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let (_dir, path) = temp_db();
        let store = SqliteStore::open(&path).await.expect("open store");
        assert_eq!(store.get_setting("default_tries").await.expect("get"), None);
        store.set_setting("default_tries", "3").await.expect("set");
        assert_eq!(
            store.get_setting("default_tries").await.expect("get"),
            Some("3".to_string())
        );
    }

    #[tokio::test]
    async fn corrupt_queue_surfaces_storage_error() {
        let store = MemoryStore::new();
        store.put("queue", "not json".to_string()).await.expect("put");
        let err = store.load_queue().await.expect_err("corrupt");
        assert!(matches!(
            err,
            crate::Error::Storage(StorageError::Corrupt { .. })
        ));
    }
}

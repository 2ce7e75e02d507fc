//! Persistent store trait and its SQLite and in-memory implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::ContentRecord;

/// Durable key -> record storage. No business logic lives here.
///
/// Implementations need not be transactional across keys; per-key read-modify-write
/// atomicity is provided one level up by the record table.
pub trait PersistentStore: Send + Sync {
  /// Read the record stored under `key`.
  fn read(&self, key: &str) -> Result<Option<ContentRecord>>;

  /// Insert or replace the record under `key`.
  fn write(&self, key: &str, record: &ContentRecord) -> Result<()>;

  /// Delete the record under `key`. Deleting a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;

  /// All stored keys, in ascending order.
  fn keys(&self) -> Result<Vec<String>>;
}

/// Store that keeps records in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
  records: Mutex<BTreeMap<String, ContentRecord>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn records(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, ContentRecord>>> {
    self
      .records
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl PersistentStore for MemoryStore {
  fn read(&self, key: &str) -> Result<Option<ContentRecord>> {
    Ok(self.records()?.get(key).cloned())
  }

  fn write(&self, key: &str, record: &ContentRecord) -> Result<()> {
    self.records()?.insert(key.to_string(), record.clone());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.records()?.remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.records()?.keys().cloned().collect())
  }
}

/// SQLite-based persistent store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Store backed by a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("refcache").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the record table. `status` and `version` are copied out of the JSON
/// blob so the table can be inspected without decoding it.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS content_records (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    version TEXT NOT NULL,
    status TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl PersistentStore for SqliteStore {
  fn read(&self, key: &str) -> Result<Option<ContentRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM content_records WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read record {}: {}", key, e))?;

    match data {
      Some(data) => {
        let record = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize record {}: {}", key, e))?;
        Ok(Some(record))
      }
      None => Ok(None),
    }
  }

  fn write(&self, key: &str, record: &ContentRecord) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let data =
      serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;
    let status = serde_json::to_value(record.status)
      .ok()
      .and_then(|v| v.as_str().map(String::from))
      .unwrap_or_default();

    conn
      .execute(
        "INSERT OR REPLACE INTO content_records (key, data, version, status, stored_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![key, data, record.version.to_string(), status],
      )
      .map_err(|e| eyre!("Failed to store record {}: {}", key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM content_records WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete record {}: {}", key, e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key FROM content_records ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key row: {}", e))?;

    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::{ContentHints, RecordStatus};
  use chrono::Utc;
  use serde_json::json;

  fn record(key: &str) -> ContentRecord {
    ContentRecord::first_version(
      key,
      &ContentHints::new("cardiologia", "protocol"),
      json!({"title": "Infarto Agudo do Miocárdio"}),
      "hash".to_string(),
      Utc::now(),
    )
  }

  fn exercise(store: &dyn PersistentStore) {
    assert!(store.read("iam").unwrap().is_none());

    let mut rec = record("iam");
    store.write("iam", &rec).unwrap();
    assert_eq!(store.read("iam").unwrap(), Some(rec.clone()));

    rec.status = RecordStatus::StalePending;
    rec.access_count = 3;
    store.write("iam", &rec).unwrap();
    assert_eq!(store.read("iam").unwrap(), Some(rec));

    store.write("avc", &record("avc")).unwrap();
    assert_eq!(store.keys().unwrap(), vec!["avc", "iam"]);

    store.remove("iam").unwrap();
    store.remove("missing").unwrap();
    assert!(store.read("iam").unwrap().is_none());
    assert_eq!(store.keys().unwrap(), vec!["avc"]);
  }

  #[test]
  fn test_memory_store() {
    exercise(&MemoryStore::new());
  }

  #[test]
  fn test_sqlite_store() {
    exercise(&SqliteStore::open_in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let store = SqliteStore::open_at(&path).unwrap();
      store.write("sepse", &record("sepse")).unwrap();
    }

    let store = SqliteStore::open_at(&path).unwrap();
    let rec = store.read("sepse").unwrap().unwrap();
    assert_eq!(rec.key, "sepse");
    assert_eq!(rec.title(), "Infarto Agudo do Miocárdio");
  }
}

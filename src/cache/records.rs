//! Per-key atomic access to the persistent store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::CacheError;

use super::storage::PersistentStore;
use super::traits::ContentRecord;

/// Wraps a [`PersistentStore`] so that every read-modify-write on one key is atomic
/// with respect to other writes to that key. Different keys never contend.
pub struct RecordTable {
  store: Arc<dyn PersistentStore>,
  locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RecordTable {
  pub fn new(store: Arc<dyn PersistentStore>) -> Self {
    Self {
      store,
      locks: Mutex::new(HashMap::new()),
    }
  }

  fn locks(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
    self.locks.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Run `f` holding the lock for `key`. The lock entry is dropped again once no other
  /// caller holds or waits on it, so the map only holds keys with work in progress.
  fn with_key_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
    let lock = self
      .locks()
      .entry(key.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone();

    let result = {
      let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
      f()
    };
    drop(lock);

    let mut locks = self.locks();
    if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
      locks.remove(key);
    }
    result
  }

  pub fn read(&self, key: &str) -> Result<Option<ContentRecord>, CacheError> {
    self.store.read(key).map_err(|e| CacheError::storage(&e))
  }

  /// Atomically transform the record under `key`.
  ///
  /// `f` sees the current record (if any) and returns the record to write, or `None` to
  /// leave the store untouched. Returns what was written.
  pub fn update<F>(&self, key: &str, f: F) -> Result<Option<ContentRecord>, CacheError>
  where
    F: FnOnce(Option<ContentRecord>) -> Result<Option<ContentRecord>, CacheError>,
  {
    self.with_key_lock(key, || -> Result<Option<ContentRecord>, CacheError> {
      let current = self.read(key)?;
      let next = f(current)?;
      if let Some(record) = &next {
        self
          .store
          .write(key, record)
          .map_err(|e| CacheError::storage(&e))?;
      }
      Ok(next)
    })
  }

  /// Mutate an existing record in place. Missing keys are left alone.
  pub fn modify<F>(&self, key: &str, f: F) -> Result<Option<ContentRecord>, CacheError>
  where
    F: FnOnce(&mut ContentRecord),
  {
    self.update(key, |current| {
      Ok(current.map(|mut record| {
        f(&mut record);
        record
      }))
    })
  }

  pub fn remove(&self, key: &str) -> Result<(), CacheError> {
    self.with_key_lock(key, || {
      self.store.remove(key).map_err(|e| CacheError::storage(&e))
    })
  }

  /// Snapshot of every stored record, ordered by key.
  ///
  /// Records that fail to load are skipped with a warning.
  pub fn all(&self) -> Result<Vec<ContentRecord>, CacheError> {
    let keys = self.store.keys().map_err(|e| CacheError::storage(&e))?;
    let mut records = Vec::with_capacity(keys.len());
    for key in keys {
      match self.read(&key) {
        Ok(Some(record)) => records.push(record),
        Ok(None) => {}
        Err(e) => tracing::warn!(key = %key, "Skipping unreadable record: {}", e),
      }
    }
    Ok(records)
  }
}

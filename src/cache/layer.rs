//! Content cache: local-first reads with background synchronization.

use futures::FutureExt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::schedule::{Clock, SystemClock, TaskHandle, TaskScheduler, TokioScheduler};
use crate::search::{lock_index, IndexSettings, IndexStats, SearchHit, SearchIndex, SharedIndex};
use crate::source::ContentSource;
use crate::sync::{SyncOutcome, SyncScheduler, SyncSettings};

use super::hash::{ContentHasher, Sha256Hasher};
use super::records::RecordTable;
use super::storage::PersistentStore;
use super::traits::{CacheResult, ContentHints, ContentRecord, RecordStatus};

/// Settings for a [`ContentCache`].
#[derive(Debug, Clone, Default)]
pub struct CacheSettings {
  pub sync: SyncSettings,
  pub index: IndexSettings,
}

/// Builder for [`ContentCache`]; every collaborator can be swapped out.
pub struct ContentCacheBuilder {
  store: Arc<dyn PersistentStore>,
  source: Arc<dyn ContentSource>,
  settings: CacheSettings,
  hasher: Arc<dyn ContentHasher>,
  clock: Arc<dyn Clock>,
  tasks: Arc<dyn TaskScheduler>,
}

impl ContentCacheBuilder {
  pub fn with_settings(mut self, settings: CacheSettings) -> Self {
    self.settings = settings;
    self
  }

  /// Set how long records stay fresh after a check.
  pub fn with_staleness_window(mut self, window: chrono::Duration) -> Self {
    self.settings.sync.staleness_window = window;
    self
  }

  pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
    self.hasher = hasher;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_scheduler(mut self, tasks: Arc<dyn TaskScheduler>) -> Self {
    self.tasks = tasks;
    self
  }

  /// Build the cache and index every stored record.
  pub fn build(self) -> Result<ContentCache, CacheError> {
    let records = Arc::new(RecordTable::new(self.store));
    let index: SharedIndex = Arc::new(Mutex::new(SearchIndex::new(self.settings.index)));
    let sync = Arc::new(SyncScheduler::new(
      records.clone(),
      self.source,
      self.hasher,
      self.clock,
      self.tasks.clone(),
      index.clone(),
      self.settings.sync,
    ));

    let cache = ContentCache {
      records,
      sync,
      index,
      tasks: self.tasks,
      background: Arc::new(Mutex::new(Vec::new())),
    };
    cache.load_index()?;
    Ok(cache)
  }
}

/// Local-first cache of clinical reference content.
///
/// Reads are served from the persistent store without waiting on the network; a
/// background check then refreshes the record if it has gone stale. Only a miss with
/// no reachable source surfaces an error.
#[derive(Clone)]
pub struct ContentCache {
  records: Arc<RecordTable>,
  sync: Arc<SyncScheduler>,
  index: SharedIndex,
  tasks: Arc<dyn TaskScheduler>,
  background: Arc<Mutex<Vec<TaskHandle>>>,
}

impl ContentCache {
  pub fn builder(
    store: Arc<dyn PersistentStore>,
    source: Arc<dyn ContentSource>,
  ) -> ContentCacheBuilder {
    ContentCacheBuilder {
      store,
      source,
      settings: CacheSettings::default(),
      hasher: Arc::new(Sha256Hasher),
      clock: Arc::new(SystemClock),
      tasks: Arc::new(TokioScheduler),
    }
  }

  /// Cache with default settings, SHA-256 hashing, the system clock and tokio tasks.
  pub fn new(
    store: Arc<dyn PersistentStore>,
    source: Arc<dyn ContentSource>,
  ) -> Result<Self, CacheError> {
    Self::builder(store, source).build()
  }

  /// Get the record for `key`.
  ///
  /// Fails only with [`CacheError::NotFoundAndOffline`] (nothing stored and the
  /// first-access fetch failed) or a storage error.
  pub async fn get(&self, key: &str, hints: &ContentHints) -> Result<ContentRecord, CacheError> {
    self.get_with_source(key, hints).await.map(|result| result.data)
  }

  /// Like [`ContentCache::get`], also reporting where the record came from.
  pub async fn get_with_source(
    &self,
    key: &str,
    hints: &ContentHints,
  ) -> Result<CacheResult<ContentRecord>, CacheError> {
    let local = match self.records.read(key) {
      Ok(local) => local,
      Err(e) => {
        warn!(key = %key, "Failed to read cached record, treating as miss: {}", e);
        None
      }
    };

    if let Some(record) = local {
      if record.is_obsolete() {
        debug!(key = %key, "Serving obsolete record, no newer version exists");
      }
      self.schedule_check(key);
      return Ok(CacheResult::from_cache(record));
    }

    // First access: the caller waits for this fetch
    let outcome = self
      .sync
      .check_and_update(key, hints)
      .await
      .map_err(CacheError::into_offline)?;
    Ok(CacheResult::from_network(outcome.record))
  }

  /// Fire-and-forget staleness check with its own error boundary.
  fn schedule_check(&self, key: &str) {
    let sync = Arc::clone(&self.sync);
    let key = key.to_string();
    let task = async move {
      match sync.refresh_if_stale(&key).await {
        Ok(Some(outcome)) if outcome.changed => {
          debug!(key = %key, version = %outcome.version, "Background check updated record")
        }
        Ok(_) => {}
        Err(CacheError::Storage(e)) => warn!(key = %key, "Background check failed: {}", e),
        // Fetch and normalization failures are logged by the sync itself
        Err(_) => {}
      }
    }
    .boxed();

    let handle = self.tasks.schedule(task, Duration::ZERO);
    let mut background = self.background();
    background.retain(|h| !h.is_finished());
    background.push(handle);
  }

  fn background(&self) -> std::sync::MutexGuard<'_, Vec<TaskHandle>> {
    self.background.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Mark `key` stale so its next `get` forces a background check. Never fails;
  /// obsolete records are left as they are.
  pub fn invalidate(&self, key: &str) {
    let result = self.records.modify(key, |record| {
      if record.status != RecordStatus::Obsolete {
        record.status = RecordStatus::StalePending;
      }
    });
    if let Err(e) = result {
      warn!(key = %key, "Failed to invalidate record: {}", e);
    }
  }

  /// Count one access to `key`. Missing keys are ignored.
  pub fn track_access(&self, key: &str) {
    let result = self.records.modify(key, |record| {
      record.access_count = record.access_count.saturating_add(1);
    });
    if let Err(e) = result {
      warn!(key = %key, "Failed to track access: {}", e);
    }
  }

  /// Fetch and commit `key` now, bypassing the staleness window.
  ///
  /// Shares the fetch of any sync already outstanding for `key`.
  pub async fn check_and_update(
    &self,
    key: &str,
    hints: &ContentHints,
  ) -> Result<SyncOutcome, CacheError> {
    self.sync.check_and_update(key, hints).await
  }

  /// Ranked search over the cached corpus. Synchronous, no I/O.
  pub fn search(&self, query: &str) -> Vec<SearchHit> {
    lock_index(&self.index).search(query)
  }

  /// Soft-delete `key`: it stays readable through `get` but leaves the index.
  /// Returns whether a record existed.
  pub fn mark_obsolete(&self, key: &str) -> Result<bool, CacheError> {
    let written = self
      .records
      .modify(key, |record| record.status = RecordStatus::Obsolete)?;
    lock_index(&self.index).remove(key);
    if written.is_some() {
      info!(key = %key, "Record marked obsolete");
    }
    Ok(written.is_some())
  }

  /// Delete `key` from the store and the index.
  pub fn purge(&self, key: &str) -> Result<(), CacheError> {
    self.records.remove(key)?;
    lock_index(&self.index).remove(key);
    info!(key = %key, "Record purged");
    Ok(())
  }

  /// The stored record for `key`, without scheduling a check or touching the source.
  pub fn peek(&self, key: &str) -> Result<Option<ContentRecord>, CacheError> {
    self.records.read(key)
  }

  /// Snapshot of every stored record, ordered by key.
  pub fn records(&self) -> Result<Vec<ContentRecord>, CacheError> {
    self.records.all()
  }

  /// (Re)index every stored record that is not obsolete. Returns how many were indexed.
  pub fn load_index(&self) -> Result<usize, CacheError> {
    let records = self.records.all()?;
    let mut index = lock_index(&self.index);
    let mut indexed = 0;
    for record in records.iter().filter(|r| !r.is_obsolete()) {
      match index.upsert(record) {
        Ok(_) => indexed += 1,
        Err(e) => warn!(key = %record.key, "Record not indexed: {}", e),
      }
    }
    debug!("Indexed {} of {} stored records", indexed, records.len());
    Ok(indexed)
  }

  /// Shared handle to the search index, for query engines.
  pub fn index(&self) -> SharedIndex {
    Arc::clone(&self.index)
  }

  pub fn index_stats(&self) -> IndexStats {
    lock_index(&self.index).stats()
  }

  pub fn sync(&self) -> &Arc<SyncScheduler> {
    &self.sync
  }

  /// Wait for every background check scheduled so far.
  pub async fn settle(&self) {
    loop {
      let pending: Vec<TaskHandle> = self.background().drain(..).collect();
      if pending.is_empty() {
        break;
      }
      for handle in pending {
        handle.join().await;
      }
    }
  }

  /// Cancel background checks and stop committing fetched content.
  pub fn shutdown(&self) {
    self.sync.shutdown();
    for handle in self.background().drain(..) {
      handle.cancel();
    }
  }
}

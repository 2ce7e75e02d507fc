//! Sync scheduler: staleness policy, guarded fetches and version commits.
//!
//! A sync for one key is a single shared future. Manual checks join an outstanding
//! sync for the same key and receive its outcome; background checks that find one
//! outstanding are dropped. Either way the remote source sees at most one fetch per key
//! at a time, while different keys sync independently.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{
  normalize_payload, ContentHasher, ContentHints, ContentRecord, ContentVersion, RecordStatus,
  RecordTable,
};
use crate::error::CacheError;
use crate::schedule::{Clock, TaskScheduler};
use crate::search::{lock_index, SharedIndex};
use crate::source::ContentSource;

type SyncFuture = Shared<BoxFuture<'static, Result<SyncOutcome, CacheError>>>;

/// Result of one completed sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
  /// Whether the payload changed (or the record was created)
  pub changed: bool,
  pub version: ContentVersion,
  /// The record as committed
  pub record: ContentRecord,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
  /// How long after the last check a record becomes eligible for a refresh
  pub staleness_window: chrono::Duration,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      staleness_window: chrono::Duration::days(7),
    }
  }
}

pub struct SyncScheduler {
  records: Arc<RecordTable>,
  source: Arc<dyn ContentSource>,
  hasher: Arc<dyn ContentHasher>,
  clock: Arc<dyn Clock>,
  tasks: Arc<dyn TaskScheduler>,
  index: SharedIndex,
  settings: SyncSettings,
  in_flight: Mutex<HashMap<String, SyncFuture>>,
  closed: AtomicBool,
  fetches: AtomicU64,
}

impl SyncScheduler {
  pub fn new(
    records: Arc<RecordTable>,
    source: Arc<dyn ContentSource>,
    hasher: Arc<dyn ContentHasher>,
    clock: Arc<dyn Clock>,
    tasks: Arc<dyn TaskScheduler>,
    index: SharedIndex,
    settings: SyncSettings,
  ) -> Self {
    Self {
      records,
      source,
      hasher,
      clock,
      tasks,
      index,
      settings,
      in_flight: Mutex::new(HashMap::new()),
      closed: AtomicBool::new(false),
      fetches: AtomicU64::new(0),
    }
  }

  /// A record is stale when its last check is older than the staleness window, or a
  /// caller invalidated it.
  pub fn is_stale(&self, record: &ContentRecord) -> bool {
    record.status == RecordStatus::StalePending
      || self.clock.now() - record.last_checked_at > self.settings.staleness_window
  }

  pub fn is_in_flight(&self, key: &str) -> bool {
    self.in_flight().contains_key(key)
  }

  /// Number of fetches issued to the remote source.
  pub fn fetch_count(&self) -> u64 {
    self.fetches.load(Ordering::SeqCst)
  }

  /// Stop committing. Syncs still in flight finish their fetch but discard the result.
  pub fn shutdown(&self) {
    self.closed.store(true, Ordering::SeqCst);
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  /// Fetch and commit `key` now, regardless of the staleness window.
  ///
  /// If a sync for `key` is already outstanding, no second fetch is made; the caller
  /// gets that sync's outcome. Creates the record when the key is unknown.
  pub async fn check_and_update(
    self: &Arc<Self>,
    key: &str,
    hints: &ContentHints,
  ) -> Result<SyncOutcome, CacheError> {
    let sync = {
      let mut in_flight = self.in_flight();
      match in_flight.get(key) {
        Some(existing) => {
          debug!(key = %key, "Joining in-flight sync");
          existing.clone()
        }
        None => self.start(&mut in_flight, key, hints.clone()),
      }
    };
    sync.await
  }

  /// Background staleness check for a stored record.
  ///
  /// Returns `Ok(None)` when the record is missing, obsolete or fresh, or when a sync for
  /// the key is already outstanding (the check is dropped, not queued).
  pub async fn refresh_if_stale(
    self: &Arc<Self>,
    key: &str,
  ) -> Result<Option<SyncOutcome>, CacheError> {
    let Some(record) = self.records.read(key)? else {
      return Ok(None);
    };
    if record.is_obsolete() {
      debug!(key = %key, "Record is obsolete, skipping staleness check");
      return Ok(None);
    }
    if !self.is_stale(&record) {
      return Ok(None);
    }

    let sync = {
      let mut in_flight = self.in_flight();
      if in_flight.contains_key(key) {
        debug!(key = %key, "Sync already in flight, dropping staleness check");
        return Ok(None);
      }
      self.start(&mut in_flight, key, record.hints())
    };
    sync.await.map(Some)
  }

  fn in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, SyncFuture>> {
    self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register and spawn a sync. The spawned task drives it to completion even if every
  /// waiter goes away, so the in-flight entry is always cleared.
  fn start(
    self: &Arc<Self>,
    in_flight: &mut HashMap<String, SyncFuture>,
    key: &str,
    hints: ContentHints,
  ) -> SyncFuture {
    let this = Arc::clone(self);
    let owned_key = key.to_string();
    let sync = async move {
      let result = this.fetch_and_commit(&owned_key, &hints).await;
      this.in_flight().remove(&owned_key);
      result
    }
    .boxed()
    .shared();

    in_flight.insert(key.to_string(), sync.clone());
    // Detached; waiters observe the outcome through the shared future
    let _ = self
      .tasks
      .schedule(sync.clone().map(|_| ()).boxed(), Duration::ZERO);
    sync
  }

  async fn fetch_and_commit(
    &self,
    key: &str,
    hints: &ContentHints,
  ) -> Result<SyncOutcome, CacheError> {
    if self.is_closed() {
      return Err(CacheError::Cancelled {
        key: key.to_string(),
      });
    }

    // A record purged while the fetch is out is not re-created
    let existed = self.records.read(key)?.is_some();

    self.fetches.fetch_add(1, Ordering::SeqCst);
    let fetched = self
      .source
      .fetch_content(key, hints)
      .await
      .map_err(|e| CacheError::fetch(key, &e))
      .and_then(|raw| normalize_payload(key, raw));
    let normalized = match fetched {
      Ok(normalized) => normalized,
      Err(e) => {
        warn!(key = %key, "Sync failed, keeping cached record: {}", e);
        return Err(e);
      }
    };
    let hash = self.hasher.digest(normalized.canonical.as_bytes());

    if self.is_closed() {
      debug!(key = %key, "Cache closed, discarding fetched content");
      return Err(CacheError::Cancelled {
        key: key.to_string(),
      });
    }

    let now = self.clock.now();
    let mut changed = false;
    let written = self.records.update(key, |current| {
      let next = match current {
        None if existed => {
          debug!(key = %key, "Record removed during sync, discarding fetched content");
          return Err(CacheError::Cancelled {
            key: key.to_string(),
          });
        }
        None => {
          changed = true;
          ContentRecord::first_version(key, hints, normalized.value, hash, now)
        }
        Some(mut record) => {
          let now = now.max(record.last_checked_at);
          if record.content_hash == hash {
            record.last_checked_at = now;
            if record.status == RecordStatus::StalePending {
              record.status = RecordStatus::Active;
            }
          } else {
            changed = true;
            record.version = record.version.bump();
            record.content_hash = hash;
            record.payload = normalized.value;
            record.fetched_at = now;
            record.last_changed_at = now;
            record.last_checked_at = now;
            if record.status != RecordStatus::Obsolete {
              record.status = RecordStatus::Active;
            }
          }
          record
        }
      };
      Ok(Some(next))
    })?;
    let record = written.ok_or_else(|| CacheError::Storage(format!("no record written for {}", key)))?;

    if changed {
      info!(key = %key, version = %record.version, "Committed new content version");
      if let Err(e) = lock_index(&self.index).upsert(&record) {
        warn!(key = %key, "Record not indexed: {}", e);
      }
    } else {
      debug!(key = %key, version = %record.version, "Content unchanged");
    }

    Ok(SyncOutcome {
      changed,
      version: record.version,
      record,
    })
  }
}

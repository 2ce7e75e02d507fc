//! Query engine: minimum-length gating and keystroke debouncing.
//!
//! Each keystroke cancels the evaluation scheduled by the previous one, so the search
//! index runs at most once per quiet window and only for the settled query. Results
//! arrive over a channel and are picked up with [`QueryEngine::poll`] from the event
//! loop tick, or awaited with [`QueryEngine::settled`].
//!
//! # Example
//!
//! ```ignore
//! let mut engine = QueryEngine::new(cache.index(), Arc::new(TokioScheduler), EngineSettings::default());
//!
//! // On every keystroke
//! engine.input(&text);
//!
//! // In event loop tick
//! if engine.poll() {
//!     render(engine.hits());
//! }
//!
//! // On selection, and only then, load the payload
//! let record = engine.open(&cache, &engine.hits()[0]).await?;
//! ```

use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::{ContentCache, ContentHints, ContentRecord};
use crate::error::CacheError;
use crate::schedule::{TaskHandle, TaskScheduler};

use super::index::SearchHit;
use super::{lock_index, SharedIndex};

#[derive(Debug, Clone)]
pub struct EngineSettings {
  /// Queries shorter than this (after trimming) never reach the index
  pub min_query_chars: usize,
  /// Quiet period before a query is evaluated
  pub debounce: Duration,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      min_query_chars: 2,
      debounce: Duration::from_millis(300),
    }
  }
}

/// The state of the current query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueryState {
  /// No input yet
  #[default]
  Idle,
  /// Waiting for the debounce window to pass
  Pending(String),
  /// Results for the settled query
  Ready { query: String, hits: Vec<SearchHit> },
}

impl QueryState {
  pub fn is_pending(&self) -> bool {
    matches!(self, QueryState::Pending(_))
  }

  pub fn hits(&self) -> &[SearchHit] {
    match self {
      QueryState::Ready { hits, .. } => hits,
      _ => &[],
    }
  }
}

type Evaluated = (u64, String, Vec<SearchHit>);

pub struct QueryEngine {
  index: SharedIndex,
  tasks: Arc<dyn TaskScheduler>,
  settings: EngineSettings,
  state: QueryState,
  pending: Option<TaskHandle>,
  generation: u64,
  tx: mpsc::UnboundedSender<Evaluated>,
  rx: mpsc::UnboundedReceiver<Evaluated>,
}

impl QueryEngine {
  pub fn new(index: SharedIndex, tasks: Arc<dyn TaskScheduler>, settings: EngineSettings) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      index,
      tasks,
      settings,
      state: QueryState::Idle,
      pending: None,
      generation: 0,
      tx,
      rx,
    }
  }

  pub fn state(&self) -> &QueryState {
    &self.state
  }

  pub fn hits(&self) -> &[SearchHit] {
    self.state.hits()
  }

  /// Handle the current contents of the search box.
  pub fn input(&mut self, text: &str) {
    self.cancel_pending();
    let query = text.trim().to_string();

    if self.is_gated(&query) {
      self.state = QueryState::Ready {
        query,
        hits: Vec::new(),
      };
      return;
    }

    let generation = self.generation;
    let index = Arc::clone(&self.index);
    let tx = self.tx.clone();
    let evaluated_query = query.clone();
    let task = async move {
      let hits = lock_index(&index).search(&evaluated_query);
      // Receiver may have been dropped
      let _ = tx.send((generation, evaluated_query, hits));
    }
    .boxed();

    self.pending = Some(self.tasks.schedule(task, self.settings.debounce));
    self.state = QueryState::Pending(query);
  }

  /// Evaluate `text` immediately (e.g. on Enter), still applying the length gate.
  pub fn search_now(&mut self, text: &str) -> &[SearchHit] {
    self.cancel_pending();
    let query = text.trim().to_string();
    let hits = if self.is_gated(&query) {
      Vec::new()
    } else {
      lock_index(&self.index).search(&query)
    };
    self.state = QueryState::Ready { query, hits };
    self.state.hits()
  }

  /// Pick up finished evaluations without blocking.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Ok(evaluated) = self.rx.try_recv() {
      changed |= self.apply(evaluated);
    }
    changed
  }

  /// Wait until the pending query (if any) has been evaluated.
  pub async fn settled(&mut self) -> &QueryState {
    while self.state.is_pending() {
      match self.rx.recv().await {
        Some(evaluated) => {
          self.apply(evaluated);
        }
        None => break,
      }
    }
    &self.state
  }

  /// Load the full record behind a result. This is the only place a payload is read.
  pub async fn open(
    &self,
    cache: &ContentCache,
    hit: &SearchHit,
  ) -> Result<ContentRecord, CacheError> {
    let hints = ContentHints {
      category: None,
      content_type: Some(hit.content_type.clone()).filter(|t| !t.is_empty()),
    };
    let record = cache.get(&hit.key, &hints).await?;
    cache.track_access(&hit.key);
    Ok(record)
  }

  fn is_gated(&self, query: &str) -> bool {
    query.chars().count() < self.settings.min_query_chars
  }

  fn apply(&mut self, (generation, query, hits): Evaluated) -> bool {
    // Results from a superseded keystroke are ignored
    if generation != self.generation {
      return false;
    }
    self.pending = None;
    self.state = QueryState::Ready { query, hits };
    true
  }

  fn cancel_pending(&mut self) {
    self.generation += 1;
    if let Some(handle) = self.pending.take() {
      handle.cancel();
    }
  }
}

impl Drop for QueryEngine {
  fn drop(&mut self) {
    if let Some(handle) = self.pending.take() {
      handle.cancel();
    }
  }
}

impl std::fmt::Debug for QueryEngine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryEngine")
      .field("state", &self.state)
      .field("settings", &self.settings)
      .field("generation", &self.generation)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::schedule::TokioScheduler;
  use crate::search::SearchIndex;
  use crate::testing::ScriptedSource;
  use chrono::Utc;
  use serde_json::json;
  use std::sync::Mutex;

  fn index_with(titles: &[(&str, &str)]) -> SharedIndex {
    let mut index = SearchIndex::default();
    for (key, title) in titles {
      let record = ContentRecord::first_version(
        key,
        &ContentHints::new("cardiologia", "protocol"),
        json!({ "title": title }),
        String::new(),
        Utc::now(),
      );
      index.upsert(&record).unwrap();
    }
    Arc::new(Mutex::new(index))
  }

  fn engine(index: &SharedIndex) -> QueryEngine {
    QueryEngine::new(index.clone(), Arc::new(TokioScheduler), EngineSettings::default())
  }

  #[tokio::test(start_paused = true)]
  async fn test_short_query_never_reaches_index() {
    let index = index_with(&[("iam", "IAM")]);
    let mut engine = engine(&index);

    engine.input(" i ");
    assert_eq!(
      engine.state(),
      &QueryState::Ready {
        query: "i".to_string(),
        hits: Vec::new()
      }
    );
    assert!(engine.search_now("i").is_empty());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!engine.poll());
    assert_eq!(lock_index(&index).stats().searches, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_keystrokes_debounce_to_one_evaluation() {
    let index = index_with(&[("iam", "IAM com supra"), ("ia", "Insuficiência aórtica")]);
    let mut engine = engine(&index);

    engine.input("i");
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.input("ia");
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.input("iam");
    assert!(engine.state().is_pending());

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(engine.poll());
    match engine.state() {
      QueryState::Ready { query, hits } => {
        assert_eq!(query, "iam");
        assert_eq!(hits[0].key, "iam");
      }
      other => panic!("unexpected state: {:?}", other),
    }

    let stats = lock_index(&index).stats();
    assert_eq!(stats.searches, 1);
    assert_eq!(stats.evaluations, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_evaluation_waits_for_quiet_window() {
    let index = index_with(&[("iam", "IAM")]);
    let mut engine = engine(&index);

    engine.input("iam");
    tokio::time::sleep(Duration::from_millis(299)).await;
    assert!(!engine.poll());
    assert!(engine.state().is_pending());

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(engine.poll());
    assert_eq!(engine.hits().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_settled_queries_hit_result_cache() {
    let index = index_with(&[("iam", "IAM")]);
    let mut engine = engine(&index);

    engine.input("iam");
    let first = engine.settled().await.clone();
    engine.input("iam ");
    let second = engine.settled().await.clone();

    assert_eq!(first, second);
    let stats = lock_index(&index).stats();
    assert_eq!(stats.evaluations, 1);
    assert_eq!(stats.cache_hits, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropping_engine_cancels_pending_query() {
    let index = index_with(&[("iam", "IAM")]);
    let mut engine = engine(&index);
    engine.input("iam");
    drop(engine);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(lock_index(&index).stats().searches, 0);
  }

  #[tokio::test]
  async fn test_payload_loaded_only_on_open() {
    let source = Arc::new(ScriptedSource::new());
    source.set(
      "iam",
      json!({"title": "Infarto Agudo do Miocárdio", "conduta": ["AAS", "heparina"]}),
    );
    let cache = ContentCache::new(Arc::new(MemoryStore::new()), source.clone()).unwrap();
    cache
      .get("iam", &ContentHints::new("cardiologia", "protocol"))
      .await
      .unwrap();

    let mut engine = QueryEngine::new(
      cache.index(),
      Arc::new(TokioScheduler),
      EngineSettings::default(),
    );
    let hit = engine.search_now("infarto")[0].clone();
    assert_eq!(hit.key, "iam");
    assert_eq!(hit.score, 2);
    assert_eq!(hit.content_type, "protocol");
    assert_eq!(source.fetches("iam"), 1);

    let record = engine.open(&cache, &hit).await.unwrap();
    assert_eq!(record.payload["conduta"][0], "AAS");
    cache.settle().await;
    assert_eq!(source.fetches("iam"), 1);
    assert_eq!(cache.records().unwrap()[0].access_count, 1);
  }
}

//! Inverted index over cached records with a bounded LRU result cache.
//!
//! # Scoring
//!
//! For each query token `t`:
//! - every key indexed under exactly `t` gains `2 * entry.score`
//! - every other key indexed under a term that starts with `t` gains `entry.score`,
//!   once per token
//!
//! Entries are stored with score 1. Results are ordered by total score (descending),
//! then shorter title, then key, and truncated to `max_results`.
//!
//! Everything here is synchronous and in-memory; the index never talks to the store or
//! the remote source.

use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::ops::Bound;
use std::time::{Duration, Instant};

use crate::cache::ContentRecord;
use crate::error::CacheError;

use super::normalize::tokenize;

/// One ranked search result. Carries no payload; load that via the cache on selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
  pub key: String,
  pub score: u32,
  pub title: String,
  pub content_type: String,
}

#[derive(Debug, Clone)]
struct IndexEntry {
  score: u32,
  title: String,
  content_type: String,
}

#[derive(Debug, Clone)]
struct CachedQuery {
  results: Vec<SearchHit>,
  inserted_at: Instant,
}

/// Tuning for [`SearchIndex`].
#[derive(Debug, Clone)]
pub struct IndexSettings {
  pub max_results: usize,
  pub query_cache_size: usize,
  /// Payload fields whose text is indexed. String and string-array values are used.
  pub fields: Vec<String>,
}

impl Default for IndexSettings {
  fn default() -> Self {
    Self {
      max_results: 20,
      query_cache_size: 100,
      fields: ["title", "subtitle", "summary", "description", "keywords", "tags"]
        .into_iter()
        .map(String::from)
        .collect(),
    }
  }
}

/// Counters describing the index and how it has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
  /// Records known to the index (including ones with no terms)
  pub records: usize,
  /// Distinct terms
  pub terms: usize,
  /// Calls to `search`
  pub searches: u64,
  /// Searches that were scored (cache misses)
  pub evaluations: u64,
  /// Searches served from the result cache
  pub cache_hits: u64,
}

pub struct SearchIndex {
  terms: BTreeMap<String, BTreeMap<String, IndexEntry>>,
  terms_by_key: HashMap<String, Vec<String>>,
  query_cache: LruCache<String, CachedQuery>,
  settings: IndexSettings,
  searches: u64,
  evaluations: u64,
  cache_hits: u64,
}

impl SearchIndex {
  pub fn new(settings: IndexSettings) -> Self {
    let capacity = NonZeroUsize::new(settings.query_cache_size).unwrap_or(NonZeroUsize::MIN);
    Self {
      terms: BTreeMap::new(),
      terms_by_key: HashMap::new(),
      query_cache: LruCache::new(capacity),
      settings,
      searches: 0,
      evaluations: 0,
      cache_hits: 0,
    }
  }

  /// Index (or re-index) one record, replacing whatever was indexed for its key.
  ///
  /// Obsolete records are removed instead. Returns the number of distinct terms, or
  /// [`CacheError::IndexBuildSkipped`] when the record has no indexable text; the record
  /// then stays known but matches no query.
  pub fn upsert(&mut self, record: &ContentRecord) -> Result<usize, CacheError> {
    if record.is_obsolete() {
      self.remove(&record.key);
      return Ok(0);
    }

    let tokens = tokenize(&self.indexable_text(&record.payload));
    self.remove_terms(&record.key);
    self.query_cache.clear();

    if tokens.is_empty() {
      self.terms_by_key.insert(record.key.clone(), Vec::new());
      return Err(CacheError::IndexBuildSkipped {
        key: record.key.clone(),
      });
    }

    let entry = IndexEntry {
      score: 1,
      title: record.title().to_string(),
      content_type: record.content_type.clone(),
    };
    for token in &tokens {
      self
        .terms
        .entry(token.clone())
        .or_default()
        .insert(record.key.clone(), entry.clone());
    }

    let count = tokens.len();
    self.terms_by_key.insert(record.key.clone(), tokens);
    Ok(count)
  }

  /// Drop a key from the index. Returns whether it was indexed.
  pub fn remove(&mut self, key: &str) -> bool {
    let known = self.remove_terms(key);
    if known {
      self.query_cache.clear();
    }
    known
  }

  fn remove_terms(&mut self, key: &str) -> bool {
    let Some(old_terms) = self.terms_by_key.remove(key) else {
      return false;
    };
    for term in old_terms {
      if let Some(postings) = self.terms.get_mut(&term) {
        postings.remove(key);
        if postings.is_empty() {
          self.terms.remove(&term);
        }
      }
    }
    true
  }

  fn indexable_text(&self, payload: &Value) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for field in &self.settings.fields {
      match payload.get(field) {
        Some(Value::String(s)) => parts.push(s),
        Some(Value::Array(items)) => parts.extend(items.iter().filter_map(Value::as_str)),
        _ => {}
      }
    }
    parts.join(" ")
  }

  /// Ranked matches for `query`.
  ///
  /// Deterministic for a fixed index state. Repeated queries (after normalization) are
  /// served from the LRU result cache, which is cleared on every index change.
  pub fn search(&mut self, query: &str) -> Vec<SearchHit> {
    self.searches += 1;

    let tokens = tokenize(query);
    if tokens.is_empty() {
      return Vec::new();
    }

    let cache_key = tokens.join(" ");
    if let Some(cached) = self.query_cache.get(&cache_key) {
      self.cache_hits += 1;
      return cached.results.clone();
    }

    self.evaluations += 1;
    let results = self.evaluate(&tokens);
    self.query_cache.put(
      cache_key,
      CachedQuery {
        results: results.clone(),
        inserted_at: Instant::now(),
      },
    );
    results
  }

  fn evaluate(&self, tokens: &[String]) -> Vec<SearchHit> {
    let mut totals: HashMap<&str, (u32, &IndexEntry)> = HashMap::new();

    for token in tokens {
      let mut matched: HashSet<&str> = HashSet::new();

      if let Some(postings) = self.terms.get(token) {
        for (key, entry) in postings {
          let total = totals.entry(key.as_str()).or_insert((0, entry));
          total.0 += 2 * entry.score;
          matched.insert(key.as_str());
        }
      }

      let longer_terms = self
        .terms
        .range::<str, _>((Bound::Excluded(token.as_str()), Bound::Unbounded))
        .take_while(|(term, _)| term.starts_with(token.as_str()));
      for (_, postings) in longer_terms {
        for (key, entry) in postings {
          if matched.insert(key.as_str()) {
            let total = totals.entry(key.as_str()).or_insert((0, entry));
            total.0 += entry.score;
          }
        }
      }
    }

    let mut hits: Vec<SearchHit> = totals
      .into_iter()
      .map(|(key, (score, entry))| SearchHit {
        key: key.to_string(),
        score,
        title: entry.title.clone(),
        content_type: entry.content_type.clone(),
      })
      .collect();

    hits.sort_by(|a, b| {
      b.score
        .cmp(&a.score)
        .then_with(|| a.title.chars().count().cmp(&b.title.chars().count()))
        .then_with(|| a.key.cmp(&b.key))
    });
    hits.truncate(self.settings.max_results);
    hits
  }

  /// How long ago `query`'s results were cached, without touching LRU order.
  pub fn cached_age(&self, query: &str) -> Option<Duration> {
    let cache_key = tokenize(query).join(" ");
    self
      .query_cache
      .peek(&cache_key)
      .map(|cached| cached.inserted_at.elapsed())
  }

  pub fn contains(&self, key: &str) -> bool {
    self.terms_by_key.contains_key(key)
  }

  pub fn stats(&self) -> IndexStats {
    IndexStats {
      records: self.terms_by_key.len(),
      terms: self.terms.len(),
      searches: self.searches,
      evaluations: self.evaluations,
      cache_hits: self.cache_hits,
    }
  }
}

impl Default for SearchIndex {
  fn default() -> Self {
    Self::new(IndexSettings::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ContentHints, RecordStatus};
  use chrono::Utc;
  use serde_json::json;

  fn record(key: &str, payload: Value) -> ContentRecord {
    ContentRecord::first_version(
      key,
      &ContentHints::new("emergencia", "protocol"),
      payload,
      String::new(),
      Utc::now(),
    )
  }

  fn keys(hits: &[SearchHit]) -> Vec<&str> {
    hits.iter().map(|h| h.key.as_str()).collect()
  }

  #[test]
  fn test_exact_match_scores_two_and_beats_prefix() {
    let mut index = SearchIndex::default();
    index
      .upsert(&record("0", json!({"title": "Infarto Agudo do Miocárdio"})))
      .unwrap();
    index
      .upsert(&record("1", json!({"title": "Infartos silenciosos"})))
      .unwrap();

    let hits = index.search("infarto");
    assert_eq!(keys(&hits), vec!["0", "1"]);
    assert_eq!(hits[0].score, 2);
    assert_eq!(hits[0].title, "Infarto Agudo do Miocárdio");
    assert_eq!(hits[0].content_type, "protocol");
    assert_eq!(hits[1].score, 1);
  }

  #[test]
  fn test_prefix_counts_once_per_token() {
    let mut index = SearchIndex::default();
    index
      .upsert(&record("a", json!({"title": "Anemia", "keywords": ["anemico", "anemias"]})))
      .unwrap();
    let hits = index.search("anem");
    assert_eq!(hits[0].score, 1);
  }

  #[test]
  fn test_scores_sum_across_tokens() {
    let mut index = SearchIndex::default();
    index
      .upsert(&record("iam", json!({"title": "Infarto Agudo do Miocárdio"})))
      .unwrap();
    index
      .upsert(&record("avc", json!({"title": "AVC agudo"})))
      .unwrap();

    let hits = index.search("agudo infar");
    assert_eq!(keys(&hits), vec!["iam", "avc"]);
    assert_eq!(hits[0].score, 3);
    assert_eq!(hits[1].score, 2);
  }

  #[test]
  fn test_ties_break_on_title_length_then_key() {
    let mut index = SearchIndex::default();
    index
      .upsert(&record("b", json!({"title": "Sepse grave"})))
      .unwrap();
    index.upsert(&record("z", json!({"title": "Sepse"}))).unwrap();
    index.upsert(&record("a", json!({"title": "Sepse"}))).unwrap();

    assert_eq!(keys(&index.search("sepse")), vec!["a", "z", "b"]);
  }

  #[test]
  fn test_results_truncated_to_max() {
    let mut index = SearchIndex::new(IndexSettings {
      max_results: 3,
      ..IndexSettings::default()
    });
    for i in 0..10 {
      index
        .upsert(&record(&format!("k{}", i), json!({"title": "Asma"})))
        .unwrap();
    }
    assert_eq!(index.search("asma").len(), 3);
  }

  #[test]
  fn test_repeat_query_is_served_from_cache() {
    let mut index = SearchIndex::default();
    index
      .upsert(&record("iam", json!({"title": "IAM com supra"})))
      .unwrap();

    let first = index.search("iam");
    let second = index.search("  IAM ");
    assert_eq!(first, second);
    assert_eq!(
      serde_json::to_vec(&first).unwrap(),
      serde_json::to_vec(&second).unwrap()
    );

    let stats = index.stats();
    assert_eq!(stats.searches, 2);
    assert_eq!(stats.evaluations, 1);
    assert_eq!(stats.cache_hits, 1);
    assert!(index.cached_age("iam").is_some());
  }

  #[test]
  fn test_reindex_replaces_old_terms_and_clears_cache() {
    let mut index = SearchIndex::default();
    index
      .upsert(&record("asma", json!({"title": "Asma brônquica"})))
      .unwrap();
    assert_eq!(index.search("bronquica").len(), 1);

    index
      .upsert(&record("asma", json!({"title": "Asma grave"})))
      .unwrap();
    assert!(index.search("bronquica").is_empty());
    assert_eq!(keys(&index.search("grave")), vec!["asma"]);
    assert_eq!(index.stats().records, 1);
  }

  #[test]
  fn test_obsolete_record_is_removed() {
    let mut index = SearchIndex::default();
    let mut rec = record("sepse", json!({"title": "Sepse"}));
    index.upsert(&rec).unwrap();

    rec.status = RecordStatus::Obsolete;
    assert_eq!(index.upsert(&rec).unwrap(), 0);
    assert!(index.search("sepse").is_empty());
    assert!(!index.contains("sepse"));
    assert_eq!(index.stats().terms, 0);
  }

  #[test]
  fn test_record_without_text_is_skipped_but_known() {
    let mut index = SearchIndex::default();
    let err = index
      .upsert(&record("dose", json!({"dose": 30, "title": "!!"})))
      .unwrap_err();
    assert!(matches!(err, CacheError::IndexBuildSkipped { .. }));
    assert!(index.contains("dose"));
    assert_eq!(index.stats().terms, 0);
  }

  #[test]
  fn test_lru_evicts_least_recently_used() {
    let mut index = SearchIndex::new(IndexSettings {
      query_cache_size: 2,
      ..IndexSettings::default()
    });
    index
      .upsert(&record("x", json!({"title": "asma sepse iam"})))
      .unwrap();

    index.search("asma");
    index.search("sepse");
    index.search("asma");
    index.search("iam");

    assert!(index.cached_age("asma").is_some());
    assert!(index.cached_age("iam").is_some());
    assert!(index.cached_age("sepse").is_none());
  }

  #[test]
  fn test_empty_query_matches_nothing() {
    let mut index = SearchIndex::default();
    index.upsert(&record("x", json!({"title": "asma"}))).unwrap();
    assert!(index.search("  ?! ").is_empty());
    assert_eq!(index.stats().evaluations, 0);
  }
}

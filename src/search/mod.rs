//! Client-side search over the cached corpus.
//!
//! - [`normalize`] turns raw text into comparable tokens
//! - [`SearchIndex`] keeps the inverted index and the LRU result cache
//! - [`QueryEngine`] gates and debounces keystrokes in front of the index

mod engine;
mod index;
pub mod normalize;

pub use engine::{EngineSettings, QueryEngine, QueryState};
pub use index::{IndexSettings, IndexStats, SearchHit, SearchIndex};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Search index shared between the cache (writer) and query engines (readers).
pub type SharedIndex = Arc<Mutex<SearchIndex>>;

/// Lock the shared index, recovering from poisoning.
pub fn lock_index(index: &SharedIndex) -> MutexGuard<'_, SearchIndex> {
  index.lock().unwrap_or_else(PoisonError::into_inner)
}

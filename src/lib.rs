//! Local-first cache for clinical reference content.
//!
//! Records are read from a local store instantly and offline, and kept eventually
//! consistent with an authoritative content source by background staleness checks.
//! A client-side inverted index over the cached corpus answers ranked searches without
//! touching the network.

pub mod cache;
pub mod config;
pub mod error;
pub mod schedule;
pub mod search;
pub mod source;
pub mod sync;

#[cfg(test)]
mod testing;

pub use cache::{ContentCache, ContentHints, ContentRecord, ContentVersion, RecordStatus};
pub use error::CacheError;
pub use search::{QueryEngine, SearchHit, SearchIndex};
pub use sync::{SyncOutcome, SyncScheduler};

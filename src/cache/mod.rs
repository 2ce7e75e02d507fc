//! Local-first content cache.
//!
//! This module provides the read-through cache for clinical reference content:
//! - Records are persisted through a pluggable key -> record store
//! - Reads are served locally; staleness checks run in the background
//! - Per-key read-modify-write is atomic; different keys never contend
//! - Offline mode: a stored record is always served, whatever the network does

mod hash;
mod layer;
mod records;
mod storage;
mod traits;

pub use hash::{normalize_payload, ContentHasher, NormalizedPayload, Sha256Hasher};
pub use layer::{CacheSettings, ContentCache, ContentCacheBuilder};
pub use records::RecordTable;
pub use storage::{MemoryStore, PersistentStore, SqliteStore};
pub use traits::{CacheResult, CacheSource, ContentHints, ContentRecord, ContentVersion, RecordStatus};

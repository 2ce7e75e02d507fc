//! Error taxonomy for the content cache.
//!
//! Only [`CacheError::NotFoundAndOffline`] ever reaches a `get` caller. Everything else
//! is produced inside background or manual sync work, where it is logged and swallowed
//! (background) or reported as the outcome of an explicit `check_and_update`.

use color_eyre::Report;

/// Errors produced by the cache, sync scheduler and search index.
///
/// The type is `Clone` because one in-flight fetch may be awaited by several callers
/// that all receive the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
  /// The remote source could not be reached or returned an error.
  #[error("FETCH_FAILURE: {key}: {reason}")]
  FetchFailure { key: String, reason: String },

  /// The source answered, but the payload could not be normalized.
  #[error("NORMALIZATION_FAILURE: {key}: {reason}")]
  NormalizationFailure { key: String, reason: String },

  /// No local record and the first-access fetch failed.
  #[error("NOT_FOUND_AND_OFFLINE: {key}: {reason}")]
  NotFoundAndOffline { key: String, reason: String },

  /// A record produced no indexable tokens.
  #[error("INDEX_BUILD_SKIPPED: {key}")]
  IndexBuildSkipped { key: String },

  /// The persistent store failed.
  #[error("STORAGE_ERROR: {0}")]
  Storage(String),

  /// The owning cache was shut down before the write could be committed.
  #[error("CANCELLED: {key}")]
  Cancelled { key: String },
}

impl CacheError {
  pub fn fetch(key: &str, err: &Report) -> Self {
    Self::FetchFailure {
      key: key.to_string(),
      reason: format!("{:#}", err),
    }
  }

  pub fn normalization(key: &str, reason: impl Into<String>) -> Self {
    Self::NormalizationFailure {
      key: key.to_string(),
      reason: reason.into(),
    }
  }

  pub fn storage(err: &Report) -> Self {
    Self::Storage(format!("{:#}", err))
  }

  /// Convert a failed first-access sync into the caller-visible offline error.
  ///
  /// Storage and cancellation errors keep their own identity.
  pub fn into_offline(self) -> Self {
    match self {
      Self::FetchFailure { key, reason } | Self::NormalizationFailure { key, reason } => {
        Self::NotFoundAndOffline { key, reason }
      }
      other => other,
    }
  }
}
